//! Binary codec for the Apple File Conduit (AFC) service.
//!
//! Wire format:
//! ```text
//! [magic:8][entire_length:8][this_length:8][packet_num:8][operation:8][header payload][data payload]
//! ```
//! The magic is the ASCII string `CFA6LPAA`; every integer is little-endian.
//! `this_length` covers the 40-byte header plus the header payload;
//! `entire_length` additionally covers the data payload.
//!
//! Requests used by the staging transfer:
//!
//! | Operation   | Header payload              | Data payload | Answer            |
//! |-------------|-----------------------------|--------------|-------------------|
//! | `MakeDir`   | path + NUL                  | –            | `Status`          |
//! | `FileOpen`  | mode (u64) + path + NUL     | –            | `FileOpenResult`  |
//! | `FileWrite` | handle (u64)                | bytes        | `Status`          |
//! | `FileClose` | handle (u64)                | –            | `Status`          |

use std::fmt;

use crate::protocol::codec::ProtocolError;

/// Packet magic as it appears on the wire.
pub const AFC_MAGIC: [u8; 8] = *b"CFA6LPAA";

/// Size of the fixed AFC packet header in bytes.
pub const AFC_HEADER_SIZE: usize = 40;

/// Largest data payload sent in a single `FileWrite` packet (64 KiB).
pub const MAX_WRITE_CHUNK: usize = 64 * 1024;

/// Largest packet accepted from the device (16 MiB).
pub const MAX_PACKET_SIZE: u64 = 16 * 1024 * 1024;

// ── Operation codes ───────────────────────────────────────────────────────────

/// AFC operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum AfcOpcode {
    Status = 0x01,
    Data = 0x02,
    ReadDir = 0x03,
    RemovePath = 0x08,
    MakeDir = 0x09,
    GetFileInfo = 0x0A,
    FileOpen = 0x0D,
    FileOpenResult = 0x0E,
    FileRead = 0x0F,
    FileWrite = 0x10,
    FileClose = 0x14,
}

impl TryFrom<u64> for AfcOpcode {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::Status),
            0x02 => Ok(Self::Data),
            0x03 => Ok(Self::ReadDir),
            0x08 => Ok(Self::RemovePath),
            0x09 => Ok(Self::MakeDir),
            0x0A => Ok(Self::GetFileInfo),
            0x0D => Ok(Self::FileOpen),
            0x0E => Ok(Self::FileOpenResult),
            0x0F => Ok(Self::FileRead),
            0x10 => Ok(Self::FileWrite),
            0x14 => Ok(Self::FileClose),
            other => Err(ProtocolError::UnknownOperation(other)),
        }
    }
}

/// Access mode passed to `FileOpen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum AfcFileMode {
    /// `r`
    ReadOnly = 1,
    /// `r+`
    ReadWrite = 2,
    /// `w` – create or truncate, write only.
    WriteOnly = 3,
    /// `w+`
    WriteRead = 4,
    /// `a`
    Append = 5,
    /// `a+`
    ReadAppend = 6,
}

// ── Status codes ──────────────────────────────────────────────────────────────

/// Status code carried by an AFC `Status` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfcErrorCode {
    Success,
    UnknownError,
    OpHeaderInvalid,
    NoResources,
    ReadError,
    WriteError,
    UnknownPacketType,
    InvalidArgument,
    ObjectNotFound,
    ObjectIsDir,
    PermissionDenied,
    ServiceNotConnected,
    OpTimeout,
    TooMuchData,
    EndOfData,
    OpNotSupported,
    ObjectExists,
    ObjectBusy,
    NoSpaceLeft,
    OpWouldBlock,
    IoError,
    OpInterrupted,
    OpInProgress,
    InternalError,
    MuxError,
    NoMemory,
    NotEnoughData,
    DirNotEmpty,
    /// A code outside the documented table.
    Other(u64),
}

impl From<u64> for AfcErrorCode {
    fn from(code: u64) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::UnknownError,
            2 => Self::OpHeaderInvalid,
            3 => Self::NoResources,
            4 => Self::ReadError,
            5 => Self::WriteError,
            6 => Self::UnknownPacketType,
            7 => Self::InvalidArgument,
            8 => Self::ObjectNotFound,
            9 => Self::ObjectIsDir,
            10 => Self::PermissionDenied,
            11 => Self::ServiceNotConnected,
            12 => Self::OpTimeout,
            13 => Self::TooMuchData,
            14 => Self::EndOfData,
            15 => Self::OpNotSupported,
            16 => Self::ObjectExists,
            17 => Self::ObjectBusy,
            18 => Self::NoSpaceLeft,
            19 => Self::OpWouldBlock,
            20 => Self::IoError,
            21 => Self::OpInterrupted,
            22 => Self::OpInProgress,
            23 => Self::InternalError,
            30 => Self::MuxError,
            31 => Self::NoMemory,
            32 => Self::NotEnoughData,
            33 => Self::DirNotEmpty,
            other => Self::Other(other),
        }
    }
}

impl AfcErrorCode {
    /// The numeric code as sent by the device.
    pub fn code(self) -> u64 {
        match self {
            Self::Success => 0,
            Self::UnknownError => 1,
            Self::OpHeaderInvalid => 2,
            Self::NoResources => 3,
            Self::ReadError => 4,
            Self::WriteError => 5,
            Self::UnknownPacketType => 6,
            Self::InvalidArgument => 7,
            Self::ObjectNotFound => 8,
            Self::ObjectIsDir => 9,
            Self::PermissionDenied => 10,
            Self::ServiceNotConnected => 11,
            Self::OpTimeout => 12,
            Self::TooMuchData => 13,
            Self::EndOfData => 14,
            Self::OpNotSupported => 15,
            Self::ObjectExists => 16,
            Self::ObjectBusy => 17,
            Self::NoSpaceLeft => 18,
            Self::OpWouldBlock => 19,
            Self::IoError => 20,
            Self::OpInterrupted => 21,
            Self::OpInProgress => 22,
            Self::InternalError => 23,
            Self::MuxError => 30,
            Self::NoMemory => 31,
            Self::NotEnoughData => 32,
            Self::DirNotEmpty => 33,
            Self::Other(code) => code,
        }
    }

    /// Whether the code reports success.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for AfcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "AFC error {code}"),
            known => write!(f, "{known:?} ({})", known.code()),
        }
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// Decoded fixed-size AFC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AfcHeader {
    /// Header + header payload + data payload.
    pub entire_length: u64,
    /// Header + header payload.
    pub this_length: u64,
    /// Request sequence number echoed by the device.
    pub packet_num: u64,
    /// Raw operation code.
    pub operation: u64,
}

impl AfcHeader {
    /// Serializes the header into its 40-byte wire form.
    pub fn to_bytes(&self) -> [u8; AFC_HEADER_SIZE] {
        let mut out = [0u8; AFC_HEADER_SIZE];
        out[0..8].copy_from_slice(&AFC_MAGIC);
        out[8..16].copy_from_slice(&self.entire_length.to_le_bytes());
        out[16..24].copy_from_slice(&self.this_length.to_le_bytes());
        out[24..32].copy_from_slice(&self.packet_num.to_le_bytes());
        out[32..40].copy_from_slice(&self.operation.to_le_bytes());
        out
    }

    /// Parses and validates a 40-byte header.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BadMagic`] for a wrong magic and
    /// [`ProtocolError::MalformedPayload`] for inconsistent lengths.
    pub fn from_bytes(bytes: &[u8; AFC_HEADER_SIZE]) -> Result<Self, ProtocolError> {
        if bytes[0..8] != AFC_MAGIC {
            return Err(ProtocolError::BadMagic(read_u64(&bytes[0..8])));
        }

        let header = Self {
            entire_length: read_u64(&bytes[8..16]),
            this_length: read_u64(&bytes[16..24]),
            packet_num: read_u64(&bytes[24..32]),
            operation: read_u64(&bytes[32..40]),
        };

        if header.this_length < AFC_HEADER_SIZE as u64 || header.entire_length < header.this_length
        {
            return Err(ProtocolError::MalformedPayload(format!(
                "inconsistent AFC lengths: this={}, entire={}",
                header.this_length, header.entire_length
            )));
        }
        if header.entire_length > MAX_PACKET_SIZE {
            return Err(ProtocolError::MalformedPayload(format!(
                "AFC packet of {} bytes exceeds {MAX_PACKET_SIZE}",
                header.entire_length
            )));
        }
        Ok(header)
    }

    /// Number of header-payload bytes following the fixed header.
    pub fn header_payload_len(&self) -> usize {
        (self.this_length - AFC_HEADER_SIZE as u64) as usize
    }

    /// Number of data-payload bytes following the header payload.
    pub fn data_len(&self) -> usize {
        (self.entire_length - self.this_length) as usize
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// An outbound AFC request.
///
/// The data payload is borrowed so large writes are not copied into the
/// request; writers send [`AfcRequest::encode_head`] followed by
/// [`AfcRequest::data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfcRequest<'a> {
    operation: AfcOpcode,
    header_payload: Vec<u8>,
    data: &'a [u8],
}

impl<'a> AfcRequest<'a> {
    /// `MakeDir` for `path` (creates intermediate directories on the device).
    pub fn make_dir(path: &str) -> Self {
        Self {
            operation: AfcOpcode::MakeDir,
            header_payload: nul_terminated(path),
            data: &[],
        }
    }

    /// `FileOpen` for `path` with `mode`.
    pub fn file_open(path: &str, mode: AfcFileMode) -> Self {
        let mut header_payload = (mode as u64).to_le_bytes().to_vec();
        header_payload.extend_from_slice(&nul_terminated(path));
        Self {
            operation: AfcOpcode::FileOpen,
            header_payload,
            data: &[],
        }
    }

    /// `FileWrite` of `data` to the open `handle`.
    pub fn file_write(handle: u64, data: &'a [u8]) -> Self {
        Self {
            operation: AfcOpcode::FileWrite,
            header_payload: handle.to_le_bytes().to_vec(),
            data,
        }
    }

    /// `FileClose` for `handle`.
    pub fn file_close(handle: u64) -> Self {
        Self {
            operation: AfcOpcode::FileClose,
            header_payload: handle.to_le_bytes().to_vec(),
            data: &[],
        }
    }

    /// The request's operation.
    pub fn operation(&self) -> AfcOpcode {
        self.operation
    }

    /// The borrowed data payload.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Header and header payload, numbered `packet_num`.
    pub fn encode_head(&self, packet_num: u64) -> Vec<u8> {
        let this_length = (AFC_HEADER_SIZE + self.header_payload.len()) as u64;
        let header = AfcHeader {
            entire_length: this_length + self.data.len() as u64,
            this_length,
            packet_num,
            operation: self.operation as u64,
        };
        let mut out = Vec::with_capacity(this_length as usize);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.header_payload);
        out
    }

    /// The complete packet in one buffer.
    pub fn encode(&self, packet_num: u64) -> Vec<u8> {
        let mut out = self.encode_head(packet_num);
        out.extend_from_slice(self.data);
        out
    }
}

fn nul_terminated(path: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(path.len() + 1);
    out.extend_from_slice(path.as_bytes());
    out.push(0);
    out
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// An inbound AFC packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfcResponse {
    /// Decoded operation.
    pub operation: AfcOpcode,
    /// Echoed packet number.
    pub packet_num: u64,
    /// Bytes between the fixed header and `this_length`.
    pub header_payload: Vec<u8>,
    /// Bytes between `this_length` and `entire_length`.
    pub data: Vec<u8>,
}

impl AfcResponse {
    /// Assembles a response from an already validated header and its payloads.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownOperation`] for unsupported opcodes.
    pub fn from_parts(
        header: &AfcHeader,
        header_payload: Vec<u8>,
        data: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            operation: AfcOpcode::try_from(header.operation)?,
            packet_num: header.packet_num,
            header_payload,
            data,
        })
    }

    /// The status code if this is a `Status` packet.
    pub fn status(&self) -> Option<AfcErrorCode> {
        if self.operation != AfcOpcode::Status || self.header_payload.len() < 8 {
            return None;
        }
        Some(AfcErrorCode::from(read_u64(&self.header_payload[0..8])))
    }

    /// The file handle carried by a `FileOpenResult` packet.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedValue`] for any other packet.
    pub fn file_handle(&self) -> Result<u64, ProtocolError> {
        if self.operation != AfcOpcode::FileOpenResult || self.header_payload.len() < 8 {
            return Err(ProtocolError::UnexpectedValue {
                field: "operation",
                value: format!("{:?}", self.operation),
            });
        }
        Ok(read_u64(&self.header_payload[0..8]))
    }
}

/// Decodes one complete AFC packet from the beginning of `bytes`.
///
/// Returns the packet and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when the buffer is short, or
/// any header validation error.
pub fn decode_response(bytes: &[u8]) -> Result<(AfcResponse, usize), ProtocolError> {
    if bytes.len() < AFC_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: AFC_HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let mut head = [0u8; AFC_HEADER_SIZE];
    head.copy_from_slice(&bytes[..AFC_HEADER_SIZE]);
    let header = AfcHeader::from_bytes(&head)?;

    let total = header.entire_length as usize;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let this_length = header.this_length as usize;
    let response = AfcResponse::from_parts(
        &header,
        bytes[AFC_HEADER_SIZE..this_length].to_vec(),
        bytes[this_length..total].to_vec(),
    )?;
    Ok((response, total))
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn status_packet(code: u64, packet_num: u64) -> Vec<u8> {
        let header = AfcHeader {
            entire_length: 48,
            this_length: 48,
            packet_num,
            operation: AfcOpcode::Status as u64,
        };
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&code.to_le_bytes());
        out
    }

    #[test]
    fn test_make_dir_request_layout() {
        // Arrange
        let req = AfcRequest::make_dir("/PublicStaging");

        // Act
        let bytes = req.encode(7);

        // Assert
        assert_eq!(&bytes[0..8], b"CFA6LPAA");
        let expected_len = (AFC_HEADER_SIZE + "/PublicStaging".len() + 1) as u64;
        assert_eq!(read_u64(&bytes[8..16]), expected_len, "entire_length");
        assert_eq!(read_u64(&bytes[16..24]), expected_len, "this_length");
        assert_eq!(read_u64(&bytes[24..32]), 7, "packet_num");
        assert_eq!(read_u64(&bytes[32..40]), AfcOpcode::MakeDir as u64);
        assert_eq!(&bytes[40..], b"/PublicStaging\0");
    }

    #[test]
    fn test_file_open_places_mode_before_path() {
        let bytes = AfcRequest::file_open("/a.ipa", AfcFileMode::WriteOnly).encode(0);
        assert_eq!(read_u64(&bytes[40..48]), 3);
        assert_eq!(&bytes[48..], b"/a.ipa\0");
    }

    #[test]
    fn test_file_write_keeps_data_outside_this_length() {
        // Arrange
        let data = [0xAAu8; 100];
        let req = AfcRequest::file_write(9, &data);

        // Act
        let head = req.encode_head(1);
        let full = req.encode(1);

        // Assert
        assert_eq!(head.len(), AFC_HEADER_SIZE + 8);
        assert_eq!(read_u64(&head[16..24]), 48, "this_length excludes data");
        assert_eq!(read_u64(&head[8..16]), 148, "entire_length includes data");
        assert_eq!(read_u64(&head[40..48]), 9, "handle");
        assert_eq!(&full[48..], &data[..]);
    }

    #[test]
    fn test_decode_status_success() {
        // Arrange
        let bytes = status_packet(0, 3);

        // Act
        let (resp, consumed) = decode_response(&bytes).unwrap();

        // Assert
        assert_eq!(consumed, 48);
        assert_eq!(resp.packet_num, 3);
        assert_eq!(resp.status(), Some(AfcErrorCode::Success));
    }

    #[test]
    fn test_decode_status_object_exists() {
        let (resp, _) = decode_response(&status_packet(16, 0)).unwrap();
        assert_eq!(resp.status(), Some(AfcErrorCode::ObjectExists));
    }

    #[test]
    fn test_decode_file_open_result_handle() {
        // Arrange
        let header = AfcHeader {
            entire_length: 48,
            this_length: 48,
            packet_num: 2,
            operation: AfcOpcode::FileOpenResult as u64,
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&5u64.to_le_bytes());

        // Act
        let (resp, _) = decode_response(&bytes).unwrap();

        // Assert
        assert_eq!(resp.file_handle().unwrap(), 5);
        assert_eq!(resp.status(), None);
    }

    #[test]
    fn test_file_handle_on_status_packet_is_error() {
        let (resp, _) = decode_response(&status_packet(0, 0)).unwrap();
        assert!(resp.file_handle().is_err());
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = status_packet(0, 0);
        bytes[0] = b'X';
        assert!(matches!(
            decode_response(&bytes),
            Err(ProtocolError::BadMagic(_))
        ));
    }

    #[test]
    fn test_decode_rejects_this_length_shorter_than_header() {
        let header = AfcHeader {
            entire_length: 40,
            this_length: 12,
            packet_num: 0,
            operation: AfcOpcode::Status as u64,
        };
        assert!(matches!(
            AfcHeader::from_bytes(&header.to_bytes()),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_operation() {
        let header = AfcHeader {
            entire_length: 40,
            this_length: 40,
            packet_num: 0,
            operation: 0x7F,
        };
        assert_eq!(
            decode_response(&header.to_bytes()).unwrap_err(),
            ProtocolError::UnknownOperation(0x7F)
        );
    }

    #[test]
    fn test_decode_truncated_packet_is_insufficient_data() {
        let bytes = status_packet(0, 0);
        assert!(matches!(
            decode_response(&bytes[..44]),
            Err(ProtocolError::InsufficientData { needed: 48, .. })
        ));
    }

    #[test]
    fn test_error_code_numbering_matches_device_table() {
        assert_eq!(AfcErrorCode::from(16).code(), 16);
        assert_eq!(AfcErrorCode::from(33), AfcErrorCode::DirNotEmpty);
        assert_eq!(AfcErrorCode::from(99), AfcErrorCode::Other(99));
        assert_eq!(AfcErrorCode::Other(99).code(), 99);
    }
}
