//! HTTP transport abstraction.
//!
//! The orchestrator builds a [`RequestDescriptor`] per attempt and hands it
//! to a [`Transport`]. An `Err` from the transport means no HTTP response
//! arrived; any response, whatever its status, is returned as `Ok`.

use crate::config::NetworkConfig;
use crate::error::{Result, TetherError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// HTTP method of an orchestrated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    /// JSON-encoded body, if any.
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            payload: None,
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set a header, replacing any previous value with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8, for error messages.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-2xx response into the matching error.
    pub fn into_result(self) -> Result<HttpResponse> {
        if self.is_success() {
            return Ok(self);
        }
        let body = self.body_text();
        match TetherError::from_status(self.status, body) {
            Some(err) => Err(err),
            None => Err(TetherError::Other(format!(
                "Unexpected HTTP status {}",
                self.status
            ))),
        }
    }
}

/// Sends requests over some wire.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse>;
}

/// Production transport backed by reqwest.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| TetherError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
            Method::Delete => self.client.delete(&request.url),
        }
        .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(payload) = &request.payload {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TetherError::Timeout(request.timeout)
            } else {
                TetherError::Network {
                    message: format!("{} {} failed: {}", request.method, request.url, e),
                    source: Some(e),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| TetherError::Network {
            message: format!("Failed to read response body from {}: {}", request.url, e),
            source: Some(e),
        })?;

        debug!("{} {} -> {}", request.method, request.url, status);
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut request = RequestDescriptor::new(Method::Get, "https://api.test/x", Duration::from_secs(5));
        request.set_header("Authorization", "Bearer old");
        request.set_header("authorization", "Bearer new");

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("AUTHORIZATION"), Some("Bearer new"));
    }

    #[test]
    fn test_response_classification() {
        assert!(HttpResponse::new(204, Vec::new()).into_result().is_ok());
        assert!(matches!(
            HttpResponse::new(404, "missing").into_result(),
            Err(TetherError::Client { status: 404, .. })
        ));
        assert!(matches!(
            HttpResponse::new(502, "bad gateway").into_result(),
            Err(TetherError::Server { status: 502, .. })
        ));
        assert!(matches!(
            HttpResponse::new(302, "").into_result(),
            Err(TetherError::Other(_))
        ));
    }

    #[test]
    fn test_method_serialization() {
        assert_eq!(serde_json::to_string(&Method::Post).unwrap(), "\"POST\"");
    }
}
