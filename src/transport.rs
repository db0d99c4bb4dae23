//! HTTP transport to the controller web server
//!
//! The transport only moves bytes: it never decides whether a controller
//! operation succeeded. The status code and headers are kept on the
//! [`ResponseDocument`] for diagnostics, but the controller's web server does
//! not set them meaningfully, so only the body is handed on for parsing.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::encoder::Request;
use crate::error::TransportError;
use crate::{ControllerError, Result};

/// Raw document returned by the controller
#[derive(Debug, Clone, Default)]
pub struct ResponseDocument {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ResponseDocument {
    /// Document with only a body, as a `200 OK` without headers
    pub fn from_body(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A single blocking request/response exchange with one controller
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the controller this transport talks to (`host:port`)
    fn endpoint(&self) -> &str;

    /// Send `request` and wait for the complete response document
    async fn execute(&self, request: &Request) -> std::result::Result<ResponseDocument, TransportError>;
}

/// [`Transport`] backed by `reqwest`
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    timeout: Duration,
    config: ControllerConfig,
}

impl HttpTransport {
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        config.validate()?;
        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ControllerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!("http://{}:{}", config.host(), config.port()),
            endpoint: config.endpoint(),
            timeout,
            config: config.clone(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_error(&self, url: &str, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }
        } else if error.is_connect() {
            TransportError::Connect {
                url: url.to_string(),
                message: error.to_string(),
            }
        } else {
            TransportError::Http(error.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute(&self, request: &Request) -> std::result::Result<ResponseDocument, TransportError> {
        let url = format!("{}{}", self.base_url, request.target());
        debug!("{} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(self.timeout);
        if let Some(credentials) = self.config.credentials(request.realm) {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = builder.send().await.map_err(|e| self.map_error(&url, e))?;

        // realm authentication happens in the web server before the
        // interpreter ever sees the request
        match response.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(TransportError::Unauthorized { realm: request.realm })
            }
            StatusCode::FORBIDDEN => {
                return Err(TransportError::Forbidden { realm: request.realm })
            }
            _ => {}
        }

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let bytes = response.bytes().await.map_err(|e| self.map_error(&url, e))?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        debug!("{} -> status {}, {} bytes", url, status, bytes.len());
        Ok(ResponseDocument { status, headers, body })
    }
}
