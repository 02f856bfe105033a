//! Heartbeat (keep-alive) service messages.
//!
//! The device drives the exchange.  Every few seconds it sends a `Marco`
//! carrying the number of seconds until the next one; the host answers each
//! `Marco` with a `Polo`.  If the host stops answering, the device tears the
//! lockdown session down.
//!
//! ```text
//! Device ──[Command=Marco Interval=n]──► Host
//! Host   ──[Command=Polo]──────────────► Device
//! ```
//!
//! A `SleepyTime` command announces that the device is going to sleep and the
//! session will not survive.

use plist::{Dictionary, Value};

use crate::protocol::codec::{device_error, required_string, required_unsigned, ProtocolError};

/// A message on the heartbeat service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMessage {
    /// Device challenge; `interval` is the number of seconds until the next one.
    Marco { interval: u64 },
    /// Host acknowledgement.
    Polo,
    /// Device is about to sleep.
    SleepyTime,
}

impl HeartbeatMessage {
    /// Builds the plist dictionary sent on the wire.
    pub fn to_dictionary(&self) -> Dictionary {
        let mut msg = Dictionary::new();
        match self {
            Self::Marco { interval } => {
                msg.insert("Command".to_string(), Value::from("Marco"));
                msg.insert("Interval".to_string(), Value::from(*interval));
            }
            Self::Polo => {
                msg.insert("Command".to_string(), Value::from("Polo"));
            }
            Self::SleepyTime => {
                msg.insert("Command".to_string(), Value::from("SleepyTime"));
            }
        }
        msg
    }

    /// Parses a message received from the device.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Rejected`] if the device sent an `Error`,
    /// [`ProtocolError::UnexpectedValue`] for unknown commands, or
    /// [`ProtocolError::MissingField`] when a `Marco` lacks its interval.
    pub fn from_dictionary(msg: &Dictionary) -> Result<Self, ProtocolError> {
        if let Some(reason) = device_error(msg) {
            return Err(ProtocolError::Rejected {
                request: "Heartbeat".to_string(),
                reason: reason.to_string(),
            });
        }

        match required_string(msg, "Command")? {
            "Marco" => Ok(Self::Marco {
                interval: required_unsigned(msg, "Interval")?,
            }),
            "Polo" => Ok(Self::Polo),
            "SleepyTime" => Ok(Self::SleepyTime),
            other => Err(ProtocolError::UnexpectedValue {
                field: "Command",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polo_has_only_command_field() {
        let msg = HeartbeatMessage::Polo.to_dictionary();
        assert_eq!(msg.len(), 1);
        assert_eq!(msg.get("Command").and_then(Value::as_string), Some("Polo"));
    }

    #[test]
    fn test_marco_parses_interval() {
        // Arrange
        let msg = HeartbeatMessage::Marco { interval: 10 }.to_dictionary();

        // Act
        let parsed = HeartbeatMessage::from_dictionary(&msg).unwrap();

        // Assert
        assert_eq!(parsed, HeartbeatMessage::Marco { interval: 10 });
    }

    #[test]
    fn test_marco_without_interval_is_missing_field() {
        let mut msg = Dictionary::new();
        msg.insert("Command".to_string(), "Marco".into());
        assert_eq!(
            HeartbeatMessage::from_dictionary(&msg).unwrap_err(),
            ProtocolError::MissingField("Interval")
        );
    }

    #[test]
    fn test_sleepy_time_is_recognised() {
        let msg = HeartbeatMessage::SleepyTime.to_dictionary();
        assert_eq!(
            HeartbeatMessage::from_dictionary(&msg).unwrap(),
            HeartbeatMessage::SleepyTime
        );
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let mut msg = Dictionary::new();
        msg.insert("Command".to_string(), "Ping".into());
        assert!(matches!(
            HeartbeatMessage::from_dictionary(&msg),
            Err(ProtocolError::UnexpectedValue { field: "Command", .. })
        ));
    }

    #[test]
    fn test_device_error_takes_precedence() {
        let mut msg = Dictionary::new();
        msg.insert("Error".to_string(), "SessionInactive".into());
        assert!(matches!(
            HeartbeatMessage::from_dictionary(&msg),
            Err(ProtocolError::Rejected { .. })
        ));
    }
}
