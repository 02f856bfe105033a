//! Packet numbering for AFC requests.
//!
//! Each AFC connection numbers its requests from 0 and the device echoes the
//! number in its reply.  Requests are strictly sequential on one connection,
//! so a reply carrying any other number means the stream is out of step.

use crate::protocol::codec::ProtocolError;

/// Packet numbers of one AFC connection.
///
/// ```rust
/// use sideload_core::protocol::PacketNumbers;
///
/// let mut numbers = PacketNumbers::new();
/// let first = numbers.claim();
/// assert_eq!(first, 0);
/// assert!(PacketNumbers::check_reply(first, 0).is_ok());
/// assert!(PacketNumbers::check_reply(first, 7).is_err());
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PacketNumbers {
    next: u64,
}

impl PacketNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number for the next request.  Wraps after `u64::MAX`.
    pub fn claim(&mut self) -> u64 {
        let number = self.next;
        self.next = self.next.wrapping_add(1);
        number
    }

    /// Checks that `received` answers the request numbered `sent`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MalformedPayload`] naming both numbers.
    pub fn check_reply(sent: u64, received: u64) -> Result<(), ProtocolError> {
        if sent != received {
            return Err(ProtocolError::MalformedPayload(format!(
                "AFC reply numbered {received} for request {sent}"
            )));
        }
        Ok(())
    }
}
