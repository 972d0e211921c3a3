use async_trait::async_trait;
use http::StatusCode;

use crate::core::{Request, Response};
use crate::module::{Flow, Module};

/// Size limits enforced before routing.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes (default: 1MB)
    pub max_body_size: usize,
    /// Maximum URL path length (default: 2048 characters)
    pub max_path_length: usize,
    /// Maximum number of headers (default: 100)
    pub max_headers: usize,
    /// Maximum size of a single header, name plus value (default: 8KB)
    pub max_header_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024,
            max_path_length: 2048,
            max_headers: 100,
            max_header_size: 8 * 1024,
        }
    }
}

impl LimitsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn max_path_length(mut self, length: usize) -> Self {
        self.max_path_length = length;
        self
    }

    pub fn max_headers(mut self, count: usize) -> Self {
        self.max_headers = count;
        self
    }

    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }
}

/// Vetoes oversized requests with the matching 4xx status.
#[derive(Default)]
pub struct Limits {
    config: LimitsConfig,
}

impl Limits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LimitsConfig) -> Self {
        Self { config }
    }

    fn violation(&self, req: &Request) -> Option<StatusCode> {
        if req.path().len() > self.config.max_path_length {
            tracing::warn!(
                "Request path too long: {} > {}",
                req.path().len(),
                self.config.max_path_length
            );
            return Some(StatusCode::URI_TOO_LONG);
        }

        if req.headers().len() > self.config.max_headers {
            tracing::warn!(
                "Too many headers: {} > {}",
                req.headers().len(),
                self.config.max_headers
            );
            return Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
        }

        let oversized = req
            .headers()
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .find(|len| *len > self.config.max_header_size);
        if let Some(len) = oversized {
            tracing::warn!("Header too large: {} > {}", len, self.config.max_header_size);
            return Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
        }

        if req.body().len() > self.config.max_body_size {
            tracing::warn!(
                "Request body too large: {} > {}",
                req.body().len(),
                self.config.max_body_size
            );
            return Some(StatusCode::PAYLOAD_TOO_LARGE);
        }

        None
    }
}

#[async_trait]
impl Module for Limits {
    async fn on_start(&self, res: &mut Response, req: &mut Request) -> Flow {
        match self.violation(req) {
            Some(status) => {
                res.text(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Request Rejected"),
                );
                Flow::Halt
            }
            None => Flow::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Method;

    async fn status_for(config: LimitsConfig, mut req: Request) -> (Flow, u16) {
        let limits = Limits::with_config(config);
        let mut res = Response::default();
        let flow = limits.on_start(&mut res, &mut req).await;
        (flow, res.status.as_u16())
    }

    #[tokio::test]
    async fn path_length_limit() {
        let req = Request::new(Method::GET, "/very-long-path-that-exceeds-limit");
        let got = status_for(LimitsConfig::new().max_path_length(10), req).await;
        assert_eq!(got, (Flow::Halt, 414));
    }

    #[tokio::test]
    async fn body_size_limit() {
        let req = Request::new(Method::POST, "/test").with_body(b"too long body".to_vec());
        let got = status_for(LimitsConfig::new().max_body_size(5), req).await;
        assert_eq!(got, (Flow::Halt, 413));
    }

    #[tokio::test]
    async fn header_limits() {
        let req = Request::new(Method::GET, "/test")
            .header("header1", "value1")
            .header("header2", "value2")
            .header("header3", "value3");
        let got = status_for(LimitsConfig::new().max_headers(2), req).await;
        assert_eq!(got, (Flow::Halt, 431));

        let req = Request::new(Method::GET, "/test").header("x-long", "very-long-value");
        let got = status_for(LimitsConfig::new().max_header_size(10), req).await;
        assert_eq!(got, (Flow::Halt, 431));
    }

    #[tokio::test]
    async fn valid_request_passes() {
        let req = Request::new(Method::GET, "/test").with_body(b"small".to_vec());
        let got = status_for(LimitsConfig::new(), req).await;
        assert_eq!(got, (Flow::Continue, 200));
    }
}
