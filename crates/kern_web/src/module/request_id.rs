use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::{Request, Response};
use crate::module::{Flow, Module};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hex timestamp plus a process-wide counter; unique within one process.
pub fn generate() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let c = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", ts, c)
}

/// Reuses the inbound request id or generates one, stores it in the
/// request context and echoes it on the response.
#[derive(Clone)]
pub struct RequestId {
    header: &'static str,
}

impl RequestId {
    pub fn new() -> Self {
        Self {
            header: "x-request-id",
        }
    }

    pub fn with_header(header: &'static str) -> Self {
        Self { header }
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for RequestId {
    async fn on_start(&self, _res: &mut Response, req: &mut Request) -> Flow {
        let request_id = req
            .headers()
            .get(self.header)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(generate);

        if let Ok(value) = http::HeaderValue::from_str(&request_id) {
            req.headers_mut().insert(self.header, value);
        }
        req.context_mut().set_request_id(request_id);
        Flow::Continue
    }

    async fn on_end(&self, res: &mut Response, req: &Request) {
        if !res.headers.contains_key(self.header) {
            res.set_header(self.header, req.context().request_id());
        }
    }
}
