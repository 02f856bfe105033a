//! Heartbeat service client.

use std::time::Duration;

use sideload_core::protocol::heartbeat::HeartbeatMessage;
use sideload_core::ProtocolError;
use tracing::trace;

use crate::application::ports::{HeartbeatChannel, ServiceError};
use crate::infrastructure::transport::stream::{read_plist, write_plist, DeviceStream};

/// Answers the device's Marco messages over a started heartbeat service.
pub struct HeartbeatClient<S> {
    stream: S,
}

impl<S: DeviceStream> HeartbeatClient<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S: DeviceStream> HeartbeatChannel for HeartbeatClient<S> {
    fn receive_marco(&mut self, deadline: Duration) -> Result<u64, ServiceError> {
        self.stream.set_read_deadline(Some(deadline))?;
        let msg = read_plist::<_, ServiceError>(&mut self.stream)?;
        match HeartbeatMessage::from_dictionary(&msg)? {
            HeartbeatMessage::Marco { interval } => {
                trace!("marco, next in {interval}s");
                Ok(interval)
            }
            HeartbeatMessage::SleepyTime => Err(ServiceError::DeviceAsleep),
            HeartbeatMessage::Polo => Err(ProtocolError::UnexpectedValue {
                field: "Command",
                value: "Polo".to_string(),
            }
            .into()),
        }
    }

    fn send_polo(&mut self) -> Result<(), ServiceError> {
        write_plist::<_, ServiceError>(&mut self.stream, &HeartbeatMessage::Polo.to_dictionary())
    }
}
