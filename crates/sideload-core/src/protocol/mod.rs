//! Protocol module containing the device wire codecs.
//!
//! - [`codec`] – 4-byte big-endian length prefix + plist body, used by the
//!   lockdown broker and by every plist-speaking service.
//! - [`lockdown`] – session and service negotiation messages.
//! - [`heartbeat`] – Marco/Polo keep-alive messages.
//! - [`afc`] – the binary Apple File Conduit packet format.
//! - [`installation`] – installation-proxy requests and status updates.
//! - [`sequence`] – packet numbering for AFC requests.

pub mod afc;
pub mod codec;
pub mod heartbeat;
pub mod installation;
pub mod lockdown;
pub mod sequence;

pub use codec::{decode_plist_frame, encode_plist_frame, ProtocolError};
pub use sequence::PacketNumbers;
