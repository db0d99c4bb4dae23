//! Helper page upload over the controller's FTP server

use async_trait::async_trait;
use std::io::{Cursor, ErrorKind};
use std::net::ToSocketAddrs;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::debug;

use crate::config::{ControllerConfig, Credentials};
use crate::error::{Realm, TransportError};

/// Stores files on controller storage
#[async_trait]
pub trait FileUploader: Send + Sync {
    /// Store `contents` at `remote_path`, replacing an existing file
    async fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransportError>;
}

/// [`FileUploader`] backed by a blocking `suppaftp` session per upload
#[derive(Debug, Clone)]
pub struct FtpUploader {
    host: String,
    port: u16,
    timeout: Duration,
    credentials: Option<Credentials>,
}

impl FtpUploader {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            host: config.host().to_string(),
            port: config.ftp_port(),
            timeout: config.request_timeout(),
            credentials: config.credentials(Realm::File).cloned(),
        }
    }

    fn url(&self, remote_path: &str) -> String {
        format!("ftp://{}:{}{}", self.host, self.port, remote_path)
    }

    fn map_error(&self, remote_path: &str, error: FtpError) -> TransportError {
        match error {
            FtpError::ConnectionError(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                TransportError::Timeout {
                    url: self.url(remote_path),
                    after: self.timeout,
                }
            }
            other => TransportError::Ftp {
                path: remote_path.to_string(),
                message: other.to_string(),
            },
        }
    }

    fn store(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransportError> {
        let connect_failed = |message: String| TransportError::Connect {
            url: self.url(remote_path),
            message,
        };
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| connect_failed(e.to_string()))?
            .next()
            .ok_or_else(|| connect_failed("host name did not resolve".to_string()))?;

        let mut ftp = FtpStream::connect_timeout(addr, self.timeout).map_err(|e| {
            let timed_out = matches!(&e, FtpError::ConnectionError(io) if io.kind() == ErrorKind::TimedOut);
            if timed_out {
                self.map_error(remote_path, e)
            } else {
                connect_failed(e.to_string())
            }
        })?;
        ftp.get_ref()
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| connect_failed(e.to_string()))?;

        let (user, password) = match &self.credentials {
            Some(credentials) => (credentials.username.as_str(), credentials.password.as_str()),
            None => ("anonymous", "anonymous"),
        };
        ftp.login(user, password).map_err(|e| match e {
            FtpError::ConnectionError(_) => self.map_error(remote_path, e),
            _ => TransportError::Unauthorized { realm: Realm::File },
        })?;

        ftp.transfer_type(FileType::Binary)
            .map_err(|e| self.map_error(remote_path, e))?;
        let written = ftp
            .put_file(remote_path, &mut Cursor::new(contents))
            .map_err(|e| self.map_error(remote_path, e))?;
        debug!("Stored {} ({} bytes)", self.url(remote_path), written);

        // STOR already completed
        let _ = ftp.quit();
        Ok(())
    }
}

#[async_trait]
impl FileUploader for FtpUploader {
    async fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransportError> {
        let uploader = self.clone();
        let path = remote_path.to_string();
        let contents = contents.to_vec();

        tokio::task::spawn_blocking(move || uploader.store(&path, &contents))
            .await
            .map_err(|e| TransportError::Ftp {
                path: remote_path.to_string(),
                message: format!("upload task failed: {}", e),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = ControllerConfig::new("127.0.0.1").with_request_timeout(Duration::from_millis(500));
        config.controller.ftp_port = Some(port);
        let uploader = FtpUploader::new(&config);

        let err = uploader.upload("/td:/dmh_raw.stm", b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { ref url, .. } if url.ends_with("/td:/dmh_raw.stm")), "{:?}", err);
    }

    #[test]
    fn test_file_realm_credentials() {
        let config = ControllerConfig::new("robot")
            .with_credentials(Realm::File, Credentials::new("ftpuser", "secret"));
        let uploader = FtpUploader::new(&config);
        assert_eq!(uploader.port, 21);
        assert_eq!(uploader.credentials, Some(Credentials::new("ftpuser", "secret")));
        assert_eq!(uploader.url("/td:/dmh_scalar.stm"), "ftp://robot:21/td:/dmh_scalar.stm");
    }
}
