//! AFC (file conduit) client.
//!
//! Every request gets exactly one reply: a `Status` packet for directory,
//! write and close operations, or a `FileOpenResult` carrying the handle.
//! Writes are split into [`MAX_WRITE_CHUNK`]-sized packets, each acknowledged
//! before the next is sent.

use sideload_core::protocol::afc::{
    AfcErrorCode, AfcFileMode, AfcHeader, AfcOpcode, AfcRequest, AfcResponse, AFC_HEADER_SIZE,
    MAX_WRITE_CHUNK,
};
use sideload_core::protocol::PacketNumbers;
use sideload_core::ProtocolError;
use tracing::trace;

use crate::application::ports::{FileTransferChannel, ServiceError};
use crate::infrastructure::transport::stream::DeviceStream;

pub struct AfcClient<S> {
    stream: S,
    packets: PacketNumbers,
}

impl<S: DeviceStream> AfcClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            packets: PacketNumbers::new(),
        }
    }

    /// Sends `request` and reads the single reply.
    fn send(&mut self, request: &AfcRequest<'_>) -> Result<AfcResponse, ServiceError> {
        let packet_num = self.packets.claim();
        self.stream.write_all(&request.encode_head(packet_num))?;
        if !request.data().is_empty() {
            self.stream.write_all(request.data())?;
        }
        self.stream.flush()?;

        let response = self.receive()?;
        PacketNumbers::check_reply(packet_num, response.packet_num)?;
        trace!(
            "AFC {:?} #{packet_num} -> {:?}",
            request.operation(),
            response.operation
        );
        Ok(response)
    }

    fn receive(&mut self) -> Result<AfcResponse, ServiceError> {
        let mut head = [0u8; AFC_HEADER_SIZE];
        self.stream.read_exact(&mut head)?;
        let header = AfcHeader::from_bytes(&head)?;

        let mut header_payload = vec![0u8; header.header_payload_len()];
        self.stream.read_exact(&mut header_payload)?;
        let mut data = vec![0u8; header.data_len()];
        self.stream.read_exact(&mut data)?;

        Ok(AfcResponse::from_parts(&header, header_payload, data)?)
    }

    /// Sends `request` and requires a success status back.
    fn expect_status(&mut self, request: &AfcRequest<'_>) -> Result<(), ServiceError> {
        let response = self.send(request)?;
        status_to_result(request.operation(), &response)
    }
}

fn status_to_result(operation: AfcOpcode, response: &AfcResponse) -> Result<(), ServiceError> {
    match response.status() {
        Some(code) if code.is_success() => Ok(()),
        Some(code) => Err(ServiceError::Afc { operation, code }),
        None => Err(ProtocolError::UnexpectedValue {
            field: "operation",
            value: format!("{:?}", response.operation),
        }
        .into()),
    }
}

impl<S: DeviceStream> FileTransferChannel for AfcClient<S> {
    fn make_directory(&mut self, path: &str) -> Result<(), ServiceError> {
        self.expect_status(&AfcRequest::make_dir(path))
    }

    fn open_file(&mut self, path: &str, mode: AfcFileMode) -> Result<u64, ServiceError> {
        let request = AfcRequest::file_open(path, mode);
        let response = self.send(&request)?;
        if response.operation == AfcOpcode::Status {
            // A status in reply to FileOpen is always a refusal.
            return Err(ServiceError::Afc {
                operation: AfcOpcode::FileOpen,
                code: response.status().unwrap_or(AfcErrorCode::UnknownError),
            });
        }
        Ok(response.file_handle()?)
    }

    fn write_file(&mut self, handle: u64, data: &[u8]) -> Result<(), ServiceError> {
        for chunk in data.chunks(MAX_WRITE_CHUNK) {
            self.expect_status(&AfcRequest::file_write(handle, chunk))?;
        }
        Ok(())
    }

    fn close_file(&mut self, handle: u64) -> Result<(), ServiceError> {
        self.expect_status(&AfcRequest::file_close(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::stream::scripted::ScriptedStream;
    use sideload_core::protocol::afc::decode_response;

    fn reply(operation: AfcOpcode, packet_num: u64, value: u64) -> Vec<u8> {
        let header = AfcHeader {
            entire_length: (AFC_HEADER_SIZE + 8) as u64,
            this_length: (AFC_HEADER_SIZE + 8) as u64,
            packet_num,
            operation: operation as u64,
        };
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&value.to_le_bytes());
        out
    }

    fn status(packet_num: u64, code: AfcErrorCode) -> Vec<u8> {
        reply(AfcOpcode::Status, packet_num, code.code())
    }

    /// Splits the client's output into (operation, header payload, data).
    fn sent_packets(bytes: &[u8]) -> Vec<(AfcOpcode, Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let (packet, used) = decode_response(rest).unwrap();
            out.push((packet.operation, packet.header_payload, packet.data));
            rest = &rest[used..];
        }
        out
    }

    #[test]
    fn test_make_directory_success() {
        // Arrange
        let (stream, transcript) = ScriptedStream::new(status(0, AfcErrorCode::Success));
        let mut client = AfcClient::new(stream);

        // Act
        client.make_directory("/PublicStaging").unwrap();

        // Assert
        let sent = sent_packets(&transcript.lock().unwrap().written);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, AfcOpcode::MakeDir);
        assert_eq!(sent[0].1, b"/PublicStaging\0".to_vec());
    }

    #[test]
    fn test_make_directory_reports_object_exists() {
        let (stream, _) = ScriptedStream::new(status(0, AfcErrorCode::ObjectExists));
        let mut client = AfcClient::new(stream);

        let err = client.make_directory("/PublicStaging").unwrap_err();

        assert_eq!(err.afc_code(), Some(AfcErrorCode::ObjectExists));
    }

    #[test]
    fn test_open_file_returns_handle() {
        // Arrange
        let (stream, _) = ScriptedStream::new(reply(AfcOpcode::FileOpenResult, 0, 42));
        let mut client = AfcClient::new(stream);

        // Act
        let handle = client
            .open_file("/PublicStaging/a.ipa", AfcFileMode::WriteOnly)
            .unwrap();

        // Assert
        assert_eq!(handle, 42);
    }

    #[test]
    fn test_open_file_refusal_is_afc_error() {
        let (stream, _) = ScriptedStream::new(status(0, AfcErrorCode::PermissionDenied));
        let mut client = AfcClient::new(stream);

        let err = client
            .open_file("/PublicStaging/a.ipa", AfcFileMode::WriteOnly)
            .unwrap_err();

        assert_eq!(err.afc_code(), Some(AfcErrorCode::PermissionDenied));
    }

    #[test]
    fn test_write_file_splits_into_acknowledged_chunks() {
        // Arrange
        let payload = vec![0xABu8; MAX_WRITE_CHUNK * 2 + 10];
        let mut input = Vec::new();
        for n in 0..3 {
            input.extend(status(n, AfcErrorCode::Success));
        }
        let (stream, transcript) = ScriptedStream::new(input);
        let mut client = AfcClient::new(stream);

        // Act
        client.write_file(7, &payload).unwrap();

        // Assert
        let sent = sent_packets(&transcript.lock().unwrap().written);
        let sizes: Vec<usize> = sent.iter().map(|(_, _, data)| data.len()).collect();
        assert_eq!(sizes, vec![MAX_WRITE_CHUNK, MAX_WRITE_CHUNK, 10]);
        assert!(sent
            .iter()
            .all(|(op, hp, _)| *op == AfcOpcode::FileWrite && *hp == 7u64.to_le_bytes().to_vec()));
    }

    #[test]
    fn test_write_file_stops_at_first_refused_chunk() {
        // Arrange
        let payload = vec![1u8; MAX_WRITE_CHUNK * 3];
        let mut input = status(0, AfcErrorCode::Success);
        input.extend(status(1, AfcErrorCode::NoSpaceLeft));
        let (stream, transcript) = ScriptedStream::new(input);
        let mut client = AfcClient::new(stream);

        // Act
        let err = client.write_file(7, &payload).unwrap_err();

        // Assert
        assert_eq!(err.afc_code(), Some(AfcErrorCode::NoSpaceLeft));
        assert_eq!(sent_packets(&transcript.lock().unwrap().written).len(), 2);
    }

    #[test]
    fn test_reply_with_wrong_packet_number_is_protocol_error() {
        let (stream, _) = ScriptedStream::new(status(5, AfcErrorCode::Success));
        let mut client = AfcClient::new(stream);
        assert!(matches!(
            client.close_file(1),
            Err(ServiceError::Protocol(_))
        ));
    }

    #[test]
    fn test_broken_pipe_during_write_is_io_error() {
        let (stream, _) = ScriptedStream::new(Vec::new());
        let mut client = AfcClient::new(stream.failing_writes_after(0));
        assert!(matches!(
            client.write_file(1, b"data"),
            Err(ServiceError::Io(_))
        ));
    }
}
