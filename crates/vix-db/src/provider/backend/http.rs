//! Blocking JSON-over-HTTP plumbing shared by the REST providers.

use crate::error::{ConnectError, QueryError, WriteError};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::trace;

/// Classified transport or status failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HttpFailure {
    Auth(String),
    NotFound(String),
    Timeout,
    Network(String),
    Status { code: u16, body: String },
    Decode(String),
}

impl HttpFailure {
    pub fn into_connect(self, timeout: Duration) -> ConnectError {
        match self {
            HttpFailure::Auth(msg) => ConnectError::auth(msg),
            HttpFailure::Timeout => ConnectError::Timeout {
                timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
            HttpFailure::Network(msg) => ConnectError::network(msg),
            HttpFailure::NotFound(msg) => ConnectError::malformed(format!("not found: {}", msg)),
            HttpFailure::Status { code, body } => {
                ConnectError::network(format!("unexpected status {}: {}", code, body))
            }
            HttpFailure::Decode(msg) => ConnectError::network(format!("bad response: {}", msg)),
        }
    }

    /// Convert for a read, naming the collection on 404.
    pub fn into_query(self, collection: &str) -> QueryError {
        match self {
            HttpFailure::NotFound(_) => QueryError::not_found(collection),
            HttpFailure::Timeout => QueryError::connection_lost("request timed out"),
            HttpFailure::Network(msg) => QueryError::connection_lost(msg),
            HttpFailure::Auth(msg) => QueryError::backend(format!("unauthorized: {}", msg)),
            HttpFailure::Status { code, body } => {
                QueryError::backend(format!("status {}: {}", code, body))
            }
            HttpFailure::Decode(msg) => QueryError::backend(format!("bad response: {}", msg)),
        }
    }

    /// Convert for a write, naming the collection on 404.
    pub fn into_write(self, collection: &str) -> WriteError {
        match self {
            HttpFailure::Status { code, body } if (400..500).contains(&code) => {
                WriteError::rejected(format!("status {}: {}", code, body))
            }
            other => other.into_query(collection).into(),
        }
    }
}

/// Minimal JSON client bound to one base URL.
#[derive(Debug, Clone)]
pub(crate) struct JsonClient {
    client: Client,
    base_url: String,
}

impl JsonClient {
    pub fn new(
        base_url: &str,
        headers: &[(&'static str, String)],
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConnectError::auth(format!("invalid characters in '{}' header", name)))?;
            header_map.insert(HeaderName::from_static(*name), value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .default_headers(header_map)
            .build()
            .map_err(|e| ConnectError::network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Same client and headers, different base URL.
    pub fn rebase(&self, base_url: &str) -> Self {
        Self {
            client: self.client.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn get(&self, path: &str) -> Result<serde_json::Value, HttpFailure> {
        self.send(self.request(Method::GET, path))
    }

    pub fn get_query(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, HttpFailure> {
        self.send(self.request(Method::GET, path).query(query))
    }

    pub fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, HttpFailure> {
        self.send(self.request(Method::POST, path).json(body))
    }

    pub fn put(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, HttpFailure> {
        self.send(self.request(Method::PUT, path).json(body))
    }

    pub fn delete(&self, path: &str) -> Result<serde_json::Value, HttpFailure> {
        self.send(self.request(Method::DELETE, path))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        trace!("{} {}", method, url);
        self.client.request(method, url)
    }

    fn send(&self, request: RequestBuilder) -> Result<serde_json::Value, HttpFailure> {
        let response = request.send().map_err(classify_transport)?;
        let status = response.status();
        let body = response.text().map_err(classify_transport)?;

        match status {
            s if s.is_success() => {
                if body.trim().is_empty() {
                    Ok(serde_json::Value::Null)
                } else {
                    serde_json::from_str(&body).map_err(|e| HttpFailure::Decode(e.to_string()))
                }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(HttpFailure::Auth(format!("status {}", status.as_u16())))
            }
            StatusCode::NOT_FOUND => Err(HttpFailure::NotFound(truncate(&body))),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Err(HttpFailure::Timeout),
            _ => Err(HttpFailure::Status {
                code: status.as_u16(),
                body: truncate(&body),
            }),
        }
    }
}

fn classify_transport(err: reqwest::Error) -> HttpFailure {
    if err.is_timeout() {
        HttpFailure::Timeout
    } else if err.is_decode() {
        HttpFailure::Decode(err.to_string())
    } else {
        // Strip the URL so query strings never reach logs.
        HttpFailure::Network(err.without_url().to_string())
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

/// Build `http(s)://host:port` from endpoint fields, or take `url` verbatim.
pub(crate) fn base_url(
    endpoint: &crate::provider::EndpointConfig,
    default_port: u64,
) -> Result<String, ConnectError> {
    if let Some(url) = endpoint.get_str("url") {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConnectError::malformed(format!(
                "url '{}' must start with http:// or https://",
                url
            )));
        }
        return Ok(url.trim_end_matches('/').to_string());
    }

    let host = endpoint
        .get_str("host")
        .ok_or_else(|| ConnectError::malformed("either 'url' or 'host' is required"))?;
    if host.contains("://") || host.contains('/') {
        return Err(ConnectError::malformed(format!(
            "host '{}' must be a bare hostname; use 'url' for full addresses",
            host
        )));
    }
    let port = match endpoint.get("port") {
        None => default_port,
        Some(_) => endpoint
            .get_u64("port")
            .filter(|p| *p > 0 && *p <= u64::from(u16::MAX))
            .ok_or_else(|| ConnectError::malformed("'port' must be between 1 and 65535"))?,
    };
    let scheme = if endpoint.get_bool("useTls").unwrap_or(false) {
        "https"
    } else {
        "http"
    };
    Ok(format!("{}://{}:{}", scheme, host, port))
}

/// Percent-encode a path segment.
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EndpointConfig;

    #[test]
    fn test_base_url_from_host_and_port() {
        let endpoint = EndpointConfig::new().with("host", "db.local").with("port", 7000);
        assert_eq!(base_url(&endpoint, 6333).unwrap(), "http://db.local:7000");

        let endpoint = EndpointConfig::new()
            .with("host", "db.local")
            .with("useTls", true);
        assert_eq!(base_url(&endpoint, 6333).unwrap(), "https://db.local:6333");
    }

    #[test]
    fn test_base_url_validation() {
        assert!(base_url(&EndpointConfig::new(), 1).is_err());
        assert!(base_url(&EndpointConfig::new().with("url", "ftp://x"), 1).is_err());
        assert!(base_url(&EndpointConfig::new().with("host", "http://x"), 1).is_err());
        assert!(base_url(
            &EndpointConfig::new().with("host", "x").with("port", 70000),
            1
        )
        .is_err());
        assert_eq!(
            base_url(&EndpointConfig::new().with("url", "https://x.io/"), 1).unwrap(),
            "https://x.io"
        );
    }

    #[test]
    fn test_failure_mapping() {
        assert!(HttpFailure::Network("reset".into())
            .into_query("c")
            .is_connection_lost());
        assert_eq!(
            HttpFailure::NotFound(String::new()).into_write("c"),
            WriteError::not_found("c")
        );
        assert_eq!(
            HttpFailure::Status {
                code: 422,
                body: "bad".into()
            }
            .into_write("c")
            .category(),
            "rejected"
        );
        assert_eq!(
            HttpFailure::Timeout
                .into_connect(Duration::from_secs(2))
                .category(),
            "timeout"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(150);
        let cut = truncate(&long);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("my docs/v1"), "my%20docs%2Fv1");
        assert_eq!(encode_segment("plain_name-1.0"), "plain_name-1.0");
    }
}
