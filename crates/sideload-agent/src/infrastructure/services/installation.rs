//! Installation proxy client.

use std::time::Duration;

use plist::Dictionary;
use sideload_core::protocol::installation::{install_request, parse_install_status, InstallStatus};

use crate::application::ports::{InstallChannel, ServiceError};
use crate::infrastructure::transport::stream::{read_plist, write_plist, DeviceStream};

/// Longest silence tolerated between two status updates.  Verifying a large
/// package keeps the device quiet for a while.
pub const STATUS_DEADLINE: Duration = Duration::from_secs(300);

pub struct InstallProxyClient<S> {
    stream: S,
}

impl<S: DeviceStream> InstallProxyClient<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S: DeviceStream> InstallChannel for InstallProxyClient<S> {
    fn request_install(&mut self, package_path: &str) -> Result<(), ServiceError> {
        let request = install_request(package_path, Dictionary::new());
        write_plist::<_, ServiceError>(&mut self.stream, &request)
    }

    fn next_status(&mut self) -> Result<InstallStatus, ServiceError> {
        self.stream.set_read_deadline(Some(STATUS_DEADLINE))?;
        let msg = read_plist::<_, ServiceError>(&mut self.stream)?;
        Ok(parse_install_status(&msg)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::stream::scripted::{frames, written_plists, ScriptedStream};
    use plist::Value;
    use sideload_core::protocol::installation::InstallFailure;

    fn status(entries: &[(&str, Value)]) -> Dictionary {
        let mut d = Dictionary::new();
        for (k, v) in entries {
            d.insert((*k).to_string(), v.clone());
        }
        d
    }

    #[test]
    fn test_request_install_sends_install_command() {
        // Arrange
        let (stream, transcript) = ScriptedStream::new(Vec::new());
        let mut client = InstallProxyClient::new(stream);

        // Act
        client.request_install("/PublicStaging/x.ipa").unwrap();

        // Assert
        let sent = written_plists(&transcript.lock().unwrap().written);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get("Command").and_then(Value::as_string), Some("Install"));
        assert_eq!(
            sent[0].get("PackagePath").and_then(Value::as_string),
            Some("/PublicStaging/x.ipa")
        );
    }

    #[test]
    fn test_status_stream_ends_with_complete() {
        // Arrange
        let input = frames(&[
            status(&[("Status", "CopyingFile".into()), ("PercentComplete", Value::from(10u64))]),
            status(&[("Status", "Complete".into())]),
        ]);
        let (stream, _) = ScriptedStream::new(input);
        let mut client = InstallProxyClient::new(stream);

        // Act
        let first = client.next_status().unwrap();
        let second = client.next_status().unwrap();

        // Assert
        assert_eq!(
            first,
            InstallStatus::Progress {
                status: "CopyingFile".to_string(),
                percent_complete: Some(10),
            }
        );
        assert_eq!(second, InstallStatus::Complete);
    }

    #[test]
    fn test_device_error_is_failed_status() {
        // Arrange
        let input = frames(&[status(&[
            ("Error", "ApplicationVerificationFailed".into()),
            ("ErrorDescription", "bad signature".into()),
        ])]);
        let (stream, _) = ScriptedStream::new(input);
        let mut client = InstallProxyClient::new(stream);

        // Act
        let result = client.next_status().unwrap();

        // Assert
        assert_eq!(
            result,
            InstallStatus::Failed(InstallFailure {
                error: "ApplicationVerificationFailed".to_string(),
                description: Some("bad signature".to_string()),
                detail: None,
            })
        );
    }

    #[test]
    fn test_status_wait_uses_long_deadline() {
        let (stream, transcript) = ScriptedStream::new(frames(&[status(&[("Status", "Complete".into())])]));
        let mut client = InstallProxyClient::new(stream);

        client.next_status().unwrap();

        assert_eq!(transcript.lock().unwrap().deadlines, vec![Some(STATUS_DEADLINE)]);
    }
}
