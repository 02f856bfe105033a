//! Byte streams to the device and the plist framing on top of them.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use plist::Dictionary;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use sideload_core::protocol::codec::{
    decode_plist_body, encode_plist_frame, frame_body_len, LENGTH_PREFIX_SIZE,
};
use sideload_core::ProtocolError;
use tracing::trace;

use crate::application::ports::ConnectionError;
use crate::infrastructure::transport::tls;

/// A blocking, deadline-aware byte stream to the device.
pub trait DeviceStream: Read + Write + Send {
    /// Bounds subsequent reads; `None` blocks indefinitely.
    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()>;
}

impl DeviceStream for TcpStream {
    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(nonzero(deadline))
    }
}

/// A service connection, plain or wrapped in TLS.  Dropping it closes the
/// socket.
pub enum ServiceStream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl ServiceStream {
    /// Connects to `ip:port` with socket deadlines applied.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Connect`] when the device is unreachable.
    pub fn connect(
        ip: Ipv4Addr,
        port: u16,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|source| ConnectionError::Connect { addr, source })?;
        tcp.set_read_timeout(Some(io_timeout))?;
        tcp.set_write_timeout(Some(io_timeout))?;
        tcp.set_nodelay(true)?;
        trace!("connected to {addr}");
        Ok(Self::Plain(tcp))
    }

    /// Runs a TLS client handshake over a plain stream.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Tls`] if the handshake fails or the stream is
    /// already encrypted.
    pub fn into_tls(self, config: Arc<ClientConfig>, ip: Ipv4Addr) -> Result<Self, ConnectionError> {
        match self {
            Self::Plain(tcp) => tls::handshake(tcp, config, ip).map(|s| Self::Tls(Box::new(s))),
            Self::Tls(_) => Err(ConnectionError::Tls("stream is already encrypted".to_string())),
        }
    }

    fn socket(&self) -> &TcpStream {
        match self {
            Self::Plain(tcp) => tcp,
            Self::Tls(stream) => &stream.sock,
        }
    }
}

impl Read for ServiceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(tcp) => tcp.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for ServiceStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(tcp) => tcp.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(tcp) => tcp.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

impl DeviceStream for ServiceStream {
    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()> {
        self.socket().set_read_timeout(nonzero(deadline))
    }
}

impl<S: DeviceStream + ?Sized> DeviceStream for Box<S> {
    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()> {
        (**self).set_read_deadline(deadline)
    }
}

/// `set_read_timeout` rejects a zero duration.
fn nonzero(deadline: Option<Duration>) -> Option<Duration> {
    deadline.map(|d| d.max(Duration::from_millis(1)))
}

// ── Plist framing ─────────────────────────────────────────────────────────────

/// Writes one length-prefixed plist message.
///
/// # Errors
///
/// I/O or encoding failures, converted into the caller's error type.
pub fn write_plist<S, E>(stream: &mut S, message: &Dictionary) -> Result<(), E>
where
    S: Write + ?Sized,
    E: From<io::Error> + From<ProtocolError>,
{
    let frame = encode_plist_frame(message)?;
    stream.write_all(&frame)?;
    stream.flush()?;
    Ok(())
}

/// Reads one length-prefixed plist message.
///
/// # Errors
///
/// I/O failures (timeouts included) or malformed frames, converted into the
/// caller's error type.
pub fn read_plist<S, E>(stream: &mut S) -> Result<Dictionary, E>
where
    S: Read + ?Sized,
    E: From<io::Error> + From<ProtocolError>,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    stream.read_exact(&mut prefix)?;
    let mut body = vec![0u8; frame_body_len(prefix)?];
    stream.read_exact(&mut body)?;
    Ok(decode_plist_body(&body)?)
}

// ── Test support ──────────────────────────────────────────────────────────────

/// In-memory stream: reads come from a prepared buffer, writes are captured.
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Everything the code under test did to the stream.
    #[derive(Debug, Default)]
    pub struct Transcript {
        pub written: Vec<u8>,
        pub deadlines: Vec<Option<Duration>>,
    }

    pub struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        transcript: Arc<Mutex<Transcript>>,
        fail_writes_after: Option<usize>,
    }

    impl ScriptedStream {
        pub fn new(input: Vec<u8>) -> (Self, Arc<Mutex<Transcript>>) {
            let transcript = Arc::new(Mutex::new(Transcript::default()));
            (
                Self {
                    input: Cursor::new(input),
                    transcript: Arc::clone(&transcript),
                    fail_writes_after: None,
                },
                transcript,
            )
        }

        /// Writes beyond `bytes` total fail with `BrokenPipe`.
        pub fn failing_writes_after(mut self, bytes: usize) -> Self {
            self.fail_writes_after = Some(bytes);
            self
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.input.read(buf)?;
            if n == 0 && !buf.is_empty() {
                return Err(io::ErrorKind::TimedOut.into());
            }
            Ok(n)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut transcript = self.transcript.lock().unwrap();
            if let Some(limit) = self.fail_writes_after {
                if transcript.written.len() + buf.len() > limit {
                    return Err(io::ErrorKind::BrokenPipe.into());
                }
            }
            transcript.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl DeviceStream for ScriptedStream {
        fn set_read_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()> {
            self.transcript.lock().unwrap().deadlines.push(deadline);
            Ok(())
        }
    }

    /// Concatenated frames for `messages`.
    pub fn frames(messages: &[Dictionary]) -> Vec<u8> {
        messages
            .iter()
            .flat_map(|m| encode_plist_frame(m).unwrap())
            .collect()
    }

    /// Splits captured output back into plist messages.
    pub fn written_plists(bytes: &[u8]) -> Vec<Dictionary> {
        let mut out = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let (msg, used) = sideload_core::decode_plist_frame(rest).unwrap();
            out.push(msg);
            rest = &rest[used..];
        }
        out
    }
}
