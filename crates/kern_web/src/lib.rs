//! Request dispatch for pingora servers: prefix routing with `next`
//! continuations and mountable sub-routers, request lifecycle modules, and
//! hot-reloading views.
pub mod auth;
pub mod core;
pub mod error;
pub mod logging;
pub mod module;
pub mod utils;
pub mod view;

// Re-export commonly used types at the crate root
pub use self::core::*;
pub use error::{ResponseError, WebError};
pub use http::StatusCode;
pub use logging::{Level, Logger, TracingLogger};
pub use module::{Flow, Module, ModuleRegistry};
pub use view::{HtmlView, TextView, View, ViewConfig, ViewError};

use async_trait::async_trait;
use futures::StreamExt;
use http::Response as HttpResponse;
use pingora::protocols::http::ServerSession;
use pingora::server::ShutdownWatch;
use pingora::services::listening::Service;
use pingora_core::apps::{HttpPersistentSettings, HttpServerApp, HttpServerOptions, ReusedHttpStream};
use pingora_http::ResponseHeader;
use std::sync::Arc;
use tracing::Instrument;

/// The main application: a frozen router plus its module registry.
pub struct App {
    router: Router,
    modules: ModuleRegistry,
}

impl App {
    /// Wrap `router`. A [`RequestId`](module::RequestId) module is installed
    /// first so every later module sees the id.
    pub fn new(router: Router) -> Self {
        let mut modules = ModuleRegistry::new();
        modules.register(module::RequestId::default());
        Self { router, modules }
    }

    /// Use `modules` as given, without the default request-id module.
    pub fn with_modules(router: Router, modules: ModuleRegistry) -> Self {
        Self { router, modules }
    }

    pub fn register_module<M: Module>(&mut self, module: M) {
        self.modules.register(module);
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Handle a request end-to-end through modules and the router.
    pub async fn serve(&self, mut req: Request) -> Response {
        let span = tracing::info_span!(
            "request",
            request_id = tracing::field::Empty,
            method = %req.method(),
            path = req.path(),
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        );
        let recorder = span.clone();

        async move {
            let mut res = Response::default();
            self.router.serve(&self.modules, &mut res, &mut req).await;

            recorder.record("request_id", req.context().request_id());
            recorder.record("status", res.status.as_u16());
            recorder.record("latency_ms", req.context().started_at().elapsed().as_millis() as u64);
            tracing::debug!("Request completed");

            finalize_response_headers(&mut res);
            res
        }
        .instrument(span)
        .await
    }

    /// Wrap the app in a pingora listening service named `name`.
    pub fn to_service<S: Into<String>>(self, name: S) -> Service<App> {
        Service::new(name.into(), self)
    }
}

/// Set content-length or transfer-encoding unless a handler already did.
fn finalize_response_headers(response: &mut Response) {
    if response.headers.contains_key(http::header::CONTENT_LENGTH)
        || response
            .headers
            .contains_key(http::header::TRANSFER_ENCODING)
    {
        return;
    }

    match &response.body {
        Body::Bytes(bytes) => {
            response.headers.insert(
                http::header::CONTENT_LENGTH,
                http::HeaderValue::from(bytes.len()),
            );
        }
        Body::Stream(_) => {
            response.headers.insert(
                http::header::TRANSFER_ENCODING,
                http::HeaderValue::from_static("chunked"),
            );
        }
    }
}

/// Answer for a request target that is not a valid URI; nothing is routed.
fn malformed_target(target: &str, error: &http::Error) -> Response {
    tracing::warn!(request_target = target, error = %error, "Rejected malformed request target");
    let mut res = Response::default();
    res.text(400, "Bad Request");
    finalize_response_headers(&mut res);
    res
}

#[async_trait]
impl HttpServerApp for App {
    async fn process_new_http(
        self: &Arc<Self>,
        mut http: ServerSession,
        shutdown: &ShutdownWatch,
    ) -> Option<ReusedHttpStream> {
        if !(http.read_request().await.ok()?) {
            return None;
        }
        if *shutdown.borrow() {
            http.set_keepalive(None);
        } else {
            http.set_keepalive(Some(60));
        }

        let reqh = http.req_header();
        let path = String::from_utf8_lossy(reqh.raw_path()).to_string();
        let is_head = reqh.method == Method::HEAD;

        let res = match Request::try_new(reqh.method.clone(), &path) {
            Ok(mut req) => {
                for (name, value) in reqh.headers.iter() {
                    req = req.header(name.clone(), value.clone());
                }

                // Read the body only when the headers announce one
                if !is_head {
                    let has_te = req.headers().contains_key(http::header::TRANSFER_ENCODING);
                    let has_len = req
                        .headers()
                        .get(http::header::CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(0)
                        > 0;
                    if has_te || has_len {
                        match http.read_request_body().await {
                            Ok(Some(bytes)) => req = req.with_body(bytes),
                            Ok(None) => {}
                            Err(e) => tracing::warn!(error = %e, "Reading request body failed"),
                        }
                    }
                }

                self.serve(req).await
            }
            Err(e) => {
                http.set_keepalive(None);
                malformed_target(&path, &e)
            }
        };

        let mut builder = HttpResponse::builder().status(res.status);
        for (k, v) in res.headers.iter() {
            builder = builder.header(k, v);
        }
        let parts = match builder.body(()) {
            Ok(r) => r.into_parts().0,
            Err(e) => {
                tracing::error!(error = %e, "Invalid response head");
                return None;
            }
        };
        let resp_header: ResponseHeader = parts.into();
        if http
            .write_response_header(Box::new(resp_header))
            .await
            .is_err()
        {
            return None;
        }

        // HEAD gets the GET headers without a body
        if !is_head {
            match res.body {
                Body::Bytes(bytes) => {
                    let _ = http.write_response_body(bytes.freeze(), true).await;
                }
                Body::Stream(mut s) => {
                    while let Some(chunk) = s.next().await {
                        if http.write_response_body(chunk, false).await.is_err() {
                            break;
                        }
                    }
                    let _ = http.write_response_body(bytes::Bytes::new(), true).await;
                }
            }
        }

        let persistent_settings = HttpPersistentSettings::for_session(&http);
        match http.finish().await {
            Ok(c) => c.map(|s| ReusedHttpStream::new(s, Some(persistent_settings))),
            Err(_) => None,
        }
    }

    fn h2_options(&self) -> Option<pingora::protocols::http::v2::server::H2Options> {
        None
    }

    fn server_options(&self) -> Option<&HttpServerOptions> {
        None
    }
}
