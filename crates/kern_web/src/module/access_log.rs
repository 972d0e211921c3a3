use async_trait::async_trait;
use std::sync::Arc;

use crate::core::{Request, Response};
use crate::logging::{Level, Logger, TracingLogger};
use crate::module::Module;

/// Logs one line per request with status and latency.
///
/// Latency is measured from the creation of the request context, so register
/// this module first to include the time spent in other modules.
pub struct AccessLog {
    logger: Arc<dyn Logger>,
}

impl AccessLog {
    pub fn new<L: Logger + 'static>(logger: L) -> Self {
        Self {
            logger: Arc::new(logger),
        }
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new(TracingLogger::new())
    }
}

#[async_trait]
impl Module for AccessLog {
    async fn on_end(&self, res: &mut Response, req: &Request) {
        let elapsed = req.context().started_at().elapsed().as_millis();
        let msg = format!(
            "{} {} -> {} in {}ms",
            req.method().as_str(),
            req.path(),
            res.status.as_u16(),
            elapsed
        );
        let level = if res.status.is_server_error() {
            Level::Error
        } else {
            Level::Info
        };
        self.logger.log(level, &msg, req.context().request_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Method, Router};
    use crate::module::{ModuleRegistry, RequestId};
    use std::sync::Mutex;

    struct TestLogger(Arc<Mutex<Vec<String>>>);

    impl Logger for TestLogger {
        fn log(&self, level: Level, msg: &str, request_id: &str) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{:?}|{}|{}", level, request_id, msg));
        }
    }

    #[tokio::test]
    async fn logs_status_with_request_id() {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let mut modules = ModuleRegistry::new();
        modules.register(AccessLog::new(TestLogger(logs.clone())));
        modules.register(RequestId::default());

        let mut router = Router::default();
        router.get_fn("/", |res, _req, _next| {
            res.text(200, "ok");
            Ok(())
        });

        let mut res = Response::default();
        let mut req = Request::new(Method::GET, "/").header("x-request-id", "rid-1");
        router.serve(&modules, &mut res, &mut req).await;
        let mut res = Response::default();
        let mut req = Request::new(Method::GET, "/missing").header("x-request-id", "rid-2");
        router.serve(&modules, &mut res, &mut req).await;

        let entries = logs.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].starts_with("Info|rid-1|GET / -> 200 in "));
        assert!(entries[1].starts_with("Info|rid-2|GET /missing -> 404"));
    }
}
