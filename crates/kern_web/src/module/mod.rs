//! Request lifecycle modules.
//!
//! Every request served by a [`Router`](crate::Router) first passes through
//! the start hooks of the registered modules in registration order, then
//! through routing, then through the end hooks in reverse order. A start
//! hook returning [`Flow::Halt`] vetoes routing and is responsible for
//! writing the response itself.
pub mod access_log;
pub mod limits;
pub mod request_id;
pub mod session;

pub use access_log::AccessLog;
pub use limits::{Limits, LimitsConfig};
pub use request_id::RequestId;
pub use session::{MemoryStore, Session, SessionConfig, SessionModule, SessionStore};

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::core::{Request, Response};
use crate::error::panic_message;

/// Decision returned by [`Module::on_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Called before routing. May mutate or replace the request, e.g. to
    /// attach context data. Returning [`Flow::Halt`] stops the remaining
    /// start hooks and skips routing.
    async fn on_start(&self, _res: &mut Response, _req: &mut Request) -> Flow {
        Flow::Continue
    }

    /// Called after routing, once, for every module whose start hook ran.
    async fn on_end(&self, _res: &mut Response, _req: &Request) {}
}

/// Ordered list of modules, filled during initialization.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Module>>,
}

/// Record of a [`ModuleRegistry::run_start`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    ran: usize,
    flow: Flow,
}

impl Started {
    pub fn proceed(&self) -> bool {
        self.flow == Flow::Continue
    }

    /// Number of modules whose start hook ran, including a halting one.
    pub fn ran(&self) -> usize {
        self.ran
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: Module>(&mut self, module: M) {
        self.modules.push(Arc::new(module));
    }

    pub fn register_arc(&mut self, module: Arc<dyn Module>) {
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Run start hooks in registration order until one halts.
    ///
    /// A panicking hook counts as started and halts the request with a 500.
    pub async fn run_start(&self, res: &mut Response, req: &mut Request) -> Started {
        for (i, module) in self.modules.iter().enumerate() {
            let flow = match AssertUnwindSafe(module.on_start(res, req)).catch_unwind().await {
                Ok(flow) => flow,
                Err(payload) => {
                    tracing::error!(module = i, "Panic caught in module start hook: {}", panic_message(payload.as_ref()));
                    res.clear_body();
                    res.text(500, "Internal Server Error");
                    Flow::Halt
                }
            };
            if flow == Flow::Halt {
                tracing::debug!(module = i, "Request halted by module");
                return Started {
                    ran: i + 1,
                    flow: Flow::Halt,
                };
            }
        }
        Started {
            ran: self.modules.len(),
            flow: Flow::Continue,
        }
    }

    /// Run end hooks in reverse registration order for the modules that
    /// started. A panicking end hook does not stop the ones before it.
    pub async fn run_end(&self, started: &Started, res: &mut Response, req: &Request) {
        for (i, module) in self.modules[..started.ran].iter().enumerate().rev() {
            if let Err(payload) = AssertUnwindSafe(module.on_end(res, req)).catch_unwind().await {
                tracing::error!(module = i, "Panic caught in module end hook: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Method, Router};
    use std::sync::Mutex;

    struct Probe {
        name: &'static str,
        halt: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Module for Probe {
        async fn on_start(&self, res: &mut Response, _req: &mut Request) -> Flow {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            if self.halt {
                res.text(403, "vetoed");
                return Flow::Halt;
            }
            Flow::Continue
        }

        async fn on_end(&self, _res: &mut Response, _req: &Request) {
            self.log.lock().unwrap().push(format!("end {}", self.name));
        }
    }

    fn chain(halt_b: bool) -> (ModuleRegistry, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut modules = ModuleRegistry::new();
        for (name, halt) in [("A", false), ("B", halt_b), ("C", false)] {
            modules.register(Probe {
                name,
                halt,
                log: log.clone(),
            });
        }
        (modules, log)
    }

    fn routed() -> (Router, Arc<Mutex<bool>>) {
        let hit = Arc::new(Mutex::new(false));
        let seen = hit.clone();
        let mut router = Router::default();
        router.get_fn("/", move |res, _req, _next| {
            *seen.lock().unwrap() = true;
            res.text(200, "ok");
            Ok(())
        });
        (router, hit)
    }

    #[tokio::test]
    async fn hooks_run_in_order_and_reverse() {
        let (modules, log) = chain(false);
        let (router, hit) = routed();
        let mut res = Response::default();
        let mut req = Request::new(Method::GET, "/");
        router.serve(&modules, &mut res, &mut req).await;

        assert!(*hit.lock().unwrap());
        assert_eq!(
            *log.lock().unwrap(),
            ["start A", "start B", "start C", "end C", "end B", "end A"]
        );
    }

    #[tokio::test]
    async fn veto_skips_routing_and_later_modules() {
        let (modules, log) = chain(true);
        let (router, hit) = routed();
        let mut res = Response::default();
        let mut req = Request::new(Method::GET, "/");
        router.serve(&modules, &mut res, &mut req).await;

        assert!(!*hit.lock().unwrap());
        assert_eq!(res.status.as_u16(), 403);
        assert_eq!(
            *log.lock().unwrap(),
            ["start A", "start B", "end B", "end A"]
        );
    }

    struct Faulty {
        name: &'static str,
        on: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Module for Faulty {
        async fn on_start(&self, _res: &mut Response, _req: &mut Request) -> Flow {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            if self.on == "start" {
                panic!("{} failed to start", self.name);
            }
            Flow::Continue
        }

        async fn on_end(&self, _res: &mut Response, _req: &Request) {
            self.log.lock().unwrap().push(format!("end {}", self.name));
            if self.on == "end" {
                panic!("{} failed to end", self.name);
            }
        }
    }

    fn faulty_chain(fails_on: &'static str) -> (ModuleRegistry, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut modules = ModuleRegistry::new();
        modules.register(Probe {
            name: "A",
            halt: false,
            log: log.clone(),
        });
        modules.register(Faulty {
            name: "B",
            on: fails_on,
            log: log.clone(),
        });
        modules.register(Probe {
            name: "C",
            halt: false,
            log: log.clone(),
        });
        (modules, log)
    }

    #[tokio::test]
    async fn panicking_start_hook_halts_with_500() {
        let (modules, log) = faulty_chain("start");
        let (router, hit) = routed();
        let mut res = Response::default();
        let mut req = Request::new(Method::GET, "/");
        router.serve(&modules, &mut res, &mut req).await;

        assert!(!*hit.lock().unwrap());
        assert_eq!(res.status.as_u16(), 500);
        assert_eq!(
            *log.lock().unwrap(),
            ["start A", "start B", "end B", "end A"]
        );
    }

    #[tokio::test]
    async fn panicking_end_hook_keeps_earlier_end_hooks() {
        let (modules, log) = faulty_chain("end");
        let (router, hit) = routed();
        let mut res = Response::default();
        let mut req = Request::new(Method::GET, "/");
        router.serve(&modules, &mut res, &mut req).await;

        assert!(*hit.lock().unwrap());
        assert_eq!(res.status.as_u16(), 200);
        assert_eq!(
            *log.lock().unwrap(),
            ["start A", "start B", "start C", "end C", "end B", "end A"]
        );
    }

    #[tokio::test]
    async fn start_hooks_can_replace_request() {
        struct Rewrite;
        #[async_trait]
        impl Module for Rewrite {
            async fn on_start(&self, _res: &mut Response, req: &mut Request) -> Flow {
                *req = Request::new(Method::GET, "/rewritten");
                Flow::Continue
            }
        }

        let mut modules = ModuleRegistry::new();
        modules.register(Rewrite);
        let mut router = Router::default();
        router.get_fn("/rewritten", |res, _req, _next| {
            res.write("rewritten");
            Ok(())
        });

        let mut res = Response::default();
        let mut req = Request::new(Method::POST, "/original");
        router.serve(&modules, &mut res, &mut req).await;
        assert_eq!(res.body_bytes(), Some(&b"rewritten"[..]));
    }
}
