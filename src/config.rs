//! Configuration loading for controller connections

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use crate::error::Realm;
use crate::{ControllerError, Result};

/// Default port of the controller web server
pub const DEFAULT_HTTP_PORT: u16 = 80;
/// Default device holding the helper pages
pub const DEFAULT_HELPER_DEVICE: &str = "td:";
/// Default file the helper programs write their result to
pub const DEFAULT_RESPONSE_FILE: &str = "td:/dmh_resp.txt";
/// Default per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT: f64 = 5.0;
/// Default port of the controller FTP server
pub const DEFAULT_FTP_PORT: u16 = 21;
/// Longest accepted per-request timeout in seconds
pub const MAX_REQUEST_TIMEOUT: f64 = 3600.0;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    pub controller: ConnectionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: Option<u16>,
    pub helper_device: Option<String>,
    pub helper_dir: Option<String>,
    pub response_file: Option<String>,
    pub request_timeout: Option<f64>,
    pub ftp_port: Option<u16>,
    /// Assume the helper pages are already on the controller
    pub skip_helper_upload: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    pub kcl: Option<Credentials>,
    pub karel: Option<Credentials>,
    pub file: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl ControllerConfig {
    /// Create a configuration for `host` with all defaults
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            controller: ConnectionConfig {
                host: host.into(),
                port: None,
                helper_device: None,
                helper_dir: None,
                response_file: None,
                request_timeout: None,
                ftp_port: None,
                skip_helper_upload: None,
            },
            auth: AuthConfig::default(),
        }
    }

    pub fn load_from_path(config_path: &str) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .map_err(|e| ControllerError::Config(format!("Failed to read {}: {}", config_path, e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: ControllerConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller.host.trim().is_empty() {
            return Err(ControllerError::Config("Controller host must not be empty".to_string()));
        }
        if let Some(timeout) = self.controller.request_timeout {
            if !timeout.is_finite() || timeout <= 0.0 || timeout > MAX_REQUEST_TIMEOUT {
                return Err(ControllerError::Config(format!(
                    "Request timeout must be between 0 and {} seconds (got {})",
                    MAX_REQUEST_TIMEOUT, timeout
                )));
            }
        }
        Ok(())
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.controller.request_timeout = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_credentials(mut self, realm: Realm, credentials: Credentials) -> Self {
        match realm {
            Realm::Kcl => self.auth.kcl = Some(credentials),
            Realm::Karel => self.auth.karel = Some(credentials),
            Realm::File => self.auth.file = Some(credentials),
            Realm::Public => {}
        }
        self
    }

    pub fn host(&self) -> &str {
        &self.controller.host
    }

    /// Get web server port with default fallback
    pub fn port(&self) -> u16 {
        self.controller.port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    /// Identity of the controller endpoint (`host:port`)
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.controller.host, self.port())
    }

    /// Get request timeout with default fallback
    pub fn request_timeout(&self) -> Duration {
        let seconds = self
            .controller
            .request_timeout
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
            .min(MAX_REQUEST_TIMEOUT);
        // out of range values never pass validate()
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT as u64))
    }

    /// Get FTP port with default fallback
    pub fn ftp_port(&self) -> u16 {
        self.controller.ftp_port.unwrap_or(DEFAULT_FTP_PORT)
    }

    pub fn skip_helper_upload(&self) -> bool {
        self.controller.skip_helper_upload.unwrap_or(false)
    }

    /// Controller-side directory holding the helper pages, e.g. `td:` or `td:/dmh`
    pub fn helper_base_path(&self) -> String {
        let device = self
            .controller
            .helper_device
            .as_deref()
            .unwrap_or(DEFAULT_HELPER_DEVICE);
        let dir = self.controller.helper_dir.as_deref().unwrap_or("");
        let mut base = format!("{}/{}", device, dir);
        while base.contains("//") {
            base = base.replace("//", "/");
        }
        base.trim_end_matches('/').to_string()
    }

    /// Controller-side path of the helper response file
    pub fn response_file(&self) -> &str {
        self.controller
            .response_file
            .as_deref()
            .unwrap_or(DEFAULT_RESPONSE_FILE)
    }

    pub fn credentials(&self, realm: Realm) -> Option<&Credentials> {
        match realm {
            Realm::Kcl => self.auth.kcl.as_ref(),
            Realm::Karel => self.auth.karel.as_ref(),
            Realm::File => self.auth.file.as_ref(),
            Realm::Public => None,
        }
    }
}
