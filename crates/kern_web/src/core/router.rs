use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::core::path;
use crate::core::{Method, Request, Response};
use crate::error::{WebError, panic_message};
use crate::module::ModuleRegistry;
use crate::utils::{Hierarchy, HierarchyDir, ServeDir};

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle a matched request by writing into `res`.
    ///
    /// Routing stops after this call unless the handler calls
    /// [`Next::resume`]; an `Err` is rendered as an error page and also stops
    /// routing.
    async fn handle(
        &self,
        res: &mut Response,
        req: &mut Request,
        next: &mut Next,
    ) -> Result<(), WebError>;
}

/// Continuation passed to every handler.
#[derive(Debug, Default)]
pub struct Next {
    resumed: bool,
    route: String,
}

impl Next {
    fn matched(route: &str) -> Self {
        Self {
            resumed: false,
            route: route.to_string(),
        }
    }

    /// Full path of the route being handled, after mounting. Empty for the
    /// not-found handler.
    pub fn route_path(&self) -> &str {
        &self.route
    }

    /// The handler matched, but routing should continue with the next route.
    pub fn resume(&mut self) {
        self.resumed = true;
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }
}

/// Wrapper for simple closure-based handlers
pub struct HandlerFn<F>
where
    F: Fn(&mut Response, &mut Request, &mut Next) -> Result<(), WebError> + Send + Sync + 'static,
{
    closure: F,
}

impl<F> HandlerFn<F>
where
    F: Fn(&mut Response, &mut Request, &mut Next) -> Result<(), WebError> + Send + Sync + 'static,
{
    pub fn new(closure: F) -> Self {
        Self { closure }
    }
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut Response, &mut Request, &mut Next) -> Result<(), WebError> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        res: &mut Response,
        req: &mut Request,
        next: &mut Next,
    ) -> Result<(), WebError> {
        (self.closure)(res, req, next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMethod {
    All,
    Only(Method),
}

impl RouteMethod {
    fn accepts(&self, method: &Method) -> bool {
        match self {
            RouteMethod::All => true,
            // HEAD is answered by GET routes; the server drops the body
            RouteMethod::Only(m) => m == method || (*m == Method::GET && *method == Method::HEAD),
        }
    }
}

impl From<Method> for RouteMethod {
    fn from(method: Method) -> Self {
        RouteMethod::Only(method)
    }
}

enum Target {
    Handler(Arc<dyn Handler>),
    Mounted(Box<Router>),
}

struct Route {
    method: RouteMethod,
    path: String,
    target: Target,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.accepts(method) && path.starts_with(self.path.as_str())
    }
}

/// Outcome of scanning a route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler took ownership of the response.
    Handled,
    /// Every route was skipped or resumed.
    Unmatched,
}

/// Ordered route table mounted at a path prefix.
///
/// Routes are evaluated top to bottom: a route matches when its method is
/// `All` or equal to the request method and the request path starts with the
/// route path. The first matching handler that does not resume its [`Next`]
/// ends routing.
pub struct Router {
    mount_point: String,
    routes: Vec<Route>,
    not_found: Option<Arc<dyn Handler>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Router {
    /// New router with its mount point fixed; route paths are joined onto it.
    pub fn new<S: AsRef<str>>(mount_point: S) -> Self {
        Self {
            mount_point: path::clean(mount_point.as_ref()),
            routes: Vec::new(),
            not_found: None,
        }
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn add<M, S>(&mut self, method: M, path: S, handler: Arc<dyn Handler>)
    where
        M: Into<RouteMethod>,
        S: AsRef<str>,
    {
        let full = path::join(&self.mount_point, path.as_ref());
        tracing::debug!(
            router = %self.mount_point,
            path = path.as_ref(),
            mounted = %full,
            "Route added"
        );
        self.routes.push(Route {
            method: method.into(),
            path: full,
            target: Target::Handler(handler),
        });
    }

    pub fn all<S: AsRef<str>>(&mut self, path: S, handler: Arc<dyn Handler>) {
        self.add(RouteMethod::All, path, handler)
    }

    pub fn get<S: AsRef<str>>(&mut self, path: S, handler: Arc<dyn Handler>) {
        self.add(Method::GET, path, handler)
    }

    pub fn post<S: AsRef<str>>(&mut self, path: S, handler: Arc<dyn Handler>) {
        self.add(Method::POST, path, handler)
    }

    /// Add an ALL route with a closure handler
    pub fn all_fn<S, F>(&mut self, path: S, handler: F)
    where
        S: AsRef<str>,
        F: Fn(&mut Response, &mut Request, &mut Next) -> Result<(), WebError>
            + Send
            + Sync
            + 'static,
    {
        self.all(path, Arc::new(HandlerFn::new(handler)))
    }

    /// Add a GET route with a closure handler
    pub fn get_fn<S, F>(&mut self, path: S, handler: F)
    where
        S: AsRef<str>,
        F: Fn(&mut Response, &mut Request, &mut Next) -> Result<(), WebError>
            + Send
            + Sync
            + 'static,
    {
        self.get(path, Arc::new(HandlerFn::new(handler)))
    }

    /// Add a POST route with a closure handler
    pub fn post_fn<S, F>(&mut self, path: S, handler: F)
    where
        S: AsRef<str>,
        F: Fn(&mut Response, &mut Request, &mut Next) -> Result<(), WebError>
            + Send
            + Sync
            + 'static,
    {
        self.post(path, Arc::new(HandlerFn::new(handler)))
    }

    /// Handler used when no route takes the request at the top level.
    pub fn not_found(&mut self, handler: Arc<dyn Handler>) {
        self.not_found = Some(handler);
    }

    /// Mount `sub` below this router's mount point.
    ///
    /// Paths of `sub` that match nothing fall through to the routes added to
    /// this router after the mount.
    pub fn mount(&mut self, mut sub: Router) {
        sub.rebase(&self.mount_point);
        tracing::debug!(router = %self.mount_point, mounted = %sub.mount_point, "Router mounted");
        self.routes.push(Route {
            method: RouteMethod::All,
            path: sub.mount_point.clone(),
            target: Target::Mounted(Box::new(sub)),
        });
    }

    /// Build a sub-router at `mount_point` and mount it.
    pub fn new_mounted<S, F>(&mut self, mount_point: S, build: F)
    where
        S: AsRef<str>,
        F: FnOnce(&mut Router),
    {
        let mut sub = Router::new(mount_point);
        build(&mut sub);
        self.mount(sub);
    }

    fn rebase(&mut self, prefix: &str) {
        self.mount_point = path::join(prefix, &self.mount_point);
        for route in &mut self.routes {
            route.path = path::join(prefix, &route.path);
            if let Target::Mounted(sub) = &mut route.target {
                sub.rebase(prefix);
            }
        }
    }

    /// Serve a fixed file on GET `path`; read errors become a 500 page.
    pub fn static_file<S, C, P>(&mut self, path: S, content_type: C, filename: P)
    where
        S: AsRef<str>,
        C: Into<String>,
        P: Into<PathBuf>,
    {
        self.get(
            path,
            Arc::new(StaticFile {
                content_type: content_type.into(),
                filename: filename.into(),
            }),
        )
    }

    /// Serve the contents of `dir` below GET `path`.
    pub fn static_dir<S: AsRef<str>, P: Into<PathBuf>>(&mut self, path: S, dir: P) {
        self.get(path, Arc::new(ServeDir::new(dir)))
    }

    /// Serve files below GET `path` from the directory `path` inside the
    /// layers of `hierarchy`.
    pub fn hierarchy_dir<S: AsRef<str>>(&mut self, hierarchy: Arc<Hierarchy>, path: S) {
        self.get(
            path.as_ref(),
            Arc::new(HierarchyDir::new(hierarchy, path.as_ref())),
        )
    }

    /// Routes every site carries, served through `hierarchy`: `/favicon.ico`
    /// from `images/favicon.ico` when a layer has one, then the `/css`, `/js`,
    /// `/images` and `/files` directories.
    pub fn site_defaults(&mut self, hierarchy: Arc<Hierarchy>) {
        if let Some(icon) = hierarchy.lookup("images/favicon.ico") {
            self.static_file("/favicon.ico", "image/x-icon", icon);
        }
        for dir in ["/css", "/js", "/images", "/files"] {
            self.hierarchy_dir(hierarchy.clone(), dir);
        }
    }

    pub fn static_text<S: AsRef<str>, T: Into<String>>(&mut self, path: S, text: T) {
        let text = text.into();
        self.get_fn(path, move |res, _req, _next| {
            res.text(200, &text);
            Ok(())
        })
    }

    pub fn static_html<S: AsRef<str>, T: Into<String>>(&mut self, path: S, html: T) {
        let html = html.into();
        self.get_fn(path, move |res, _req, _next| {
            res.html(200, &html);
            Ok(())
        })
    }
}

impl Router {
    /// Full request lifecycle: module start hooks, routing, not-found, end hooks.
    ///
    /// End hooks run for every module whose start hook ran, in reverse order,
    /// whether routing completed, was vetoed, failed or panicked.
    pub async fn serve(&self, modules: &ModuleRegistry, res: &mut Response, req: &mut Request) {
        let started = modules.run_start(res, req).await;
        if started.proceed() {
            match AssertUnwindSafe(self.dispatch(res, req)).catch_unwind().await {
                Ok(Dispatch::Handled) => {}
                Ok(Dispatch::Unmatched) => self.run_not_found(res, req).await,
                Err(payload) => {
                    tracing::error!("Panic caught in request handler: {}", panic_message(payload.as_ref()));
                    res.clear_body();
                    res.text(500, "Internal Server Error");
                }
            }
        }
        modules.run_end(&started, res, req).await;
    }

    /// Scan the route table without running modules or the not-found handler.
    pub fn dispatch<'a>(
        &'a self,
        res: &'a mut Response,
        req: &'a mut Request,
    ) -> BoxFuture<'a, Dispatch> {
        async move {
            for route in &self.routes {
                if !route.matches(req.method(), req.path()) {
                    continue;
                }
                tracing::trace!(route = %route.path, "Route matched");

                let mut next = Next::matched(&route.path);
                match &route.target {
                    Target::Handler(handler) => {
                        if let Err(e) = handler.handle(res, req, &mut next).await {
                            e.respond(res);
                            return Dispatch::Handled;
                        }
                    }
                    Target::Mounted(sub) => {
                        if sub.dispatch(res, req).await == Dispatch::Unmatched {
                            next.resume();
                        }
                    }
                }
                if !next.is_resumed() {
                    return Dispatch::Handled;
                }
            }
            Dispatch::Unmatched
        }
        .boxed()
    }

    async fn run_not_found(&self, res: &mut Response, req: &mut Request) {
        match &self.not_found {
            Some(handler) => {
                let mut ignored = Next::default();
                if let Err(e) = handler.handle(res, req, &mut ignored).await {
                    e.respond(res);
                }
            }
            None => {
                res.html(
                    404,
                    "<html lang=\"en\"><head><title>Not Found</title></head><body><h1>404 Not Found</h1>\
                     <p>set a not-found handler on the top-level Router to display a custom response</p>\
                     </body></html>",
                );
            }
        }
    }
}

struct StaticFile {
    content_type: String,
    filename: PathBuf,
}

#[async_trait]
impl Handler for StaticFile {
    async fn handle(
        &self,
        res: &mut Response,
        _req: &mut Request,
        _next: &mut Next,
    ) -> Result<(), WebError> {
        let content = tokio::fs::read(&self.filename).await?;
        res.content_type(&self.content_type);
        res.write(content);
        Ok(())
    }
}
