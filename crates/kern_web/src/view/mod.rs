//! Cached, hot-reloading views.
//!
//! A [`View`] owns one compiled template. A filesystem watcher flags it for
//! reload when its source changes; the next render recompiles it under the
//! view's lock, so renderers never see a half-swapped template. Any number
//! of change events between two renders cause a single recompile.
mod compile;
mod watch;

pub use compile::{Compile, Compiled, Markup, PlainText};

use async_trait::async_trait;
use minijinja::Value;
use notify::RecommendedWatcher;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::{Handler, Next, Request, Response};
use crate::error::{ResponseError, WebError, internal_error};

pub type HtmlView = View<Markup>;
pub type TextView = View<PlainText>;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("cannot read view {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot compile view {name}: {source}")]
    Compile {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("cannot render view {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("cannot watch view {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl ResponseError for ViewError {}

/// Values shared by every render: explicit globals and values taken from
/// the process environment.
#[derive(Debug, Clone, Default)]
pub struct ViewConfig {
    globals: BTreeMap<String, Value>,
    env: BTreeMap<String, Value>,
    strict_reload: bool,
}

impl ViewConfig {
    pub const DEFAULT_ENV_PREFIX: &'static str = "KERN_VIEW_";

    pub fn new() -> Self {
        Self::default()
    }

    /// Config with environment values read from `KERN_VIEW_*` variables.
    pub fn from_env() -> Self {
        Self::new().env_vars(Self::DEFAULT_ENV_PREFIX, std::env::vars())
    }

    pub fn global<K: Into<String>, V: Serialize>(mut self, name: K, value: V) -> Self {
        self.globals.insert(name.into(), Value::from_serialize(&value));
        self
    }

    /// Take every variable starting with `prefix`, keyed without the prefix.
    /// Values of names ending in `_HTML` are inserted unescaped.
    pub fn env_vars<I>(mut self, prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(prefix) else {
                continue;
            };
            let value = if key.ends_with("_HTML") {
                Value::from_safe_string(value)
            } else {
                Value::from(value)
            };
            self.env.insert(key.to_string(), value);
        }
        self
    }

    /// Answer a failed reload with a 500 page instead of the last good template.
    pub fn strict_reload(mut self, strict: bool) -> Self {
        self.strict_reload = strict;
        self
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    pub fn env(&self) -> &BTreeMap<String, Value> {
        &self.env
    }
}

/// Data a template is executed against.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub globals: &'a BTreeMap<String, Value>,
    pub env: &'a BTreeMap<String, Value>,
    pub locals: Value,
    /// Requested host without port.
    pub hostname: &'a str,
    /// Render time, RFC 3339 in UTC.
    pub now: String,
    /// Render time as `YYYY-MM-DD HH:MM:SS` in UTC.
    pub now_iso: String,
}

impl<'a> Envelope<'a> {
    pub fn new<L: Serialize>(config: &'a ViewConfig, req: &'a Request, locals: L) -> Self {
        let now = chrono::Utc::now();
        Self {
            globals: &config.globals,
            env: &config.env,
            locals: Value::from_serialize(&locals),
            hostname: req.hostname(),
            now: now.to_rfc3339(),
            now_iso: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

struct State<A> {
    artifact: Arc<A>,
    reload_required: bool,
}

fn lock<A>(state: &Mutex<State<A>>) -> MutexGuard<'_, State<A>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct View<C: Compile> {
    path: PathBuf,
    name: String,
    compiler: C,
    config: Arc<ViewConfig>,
    state: Arc<Mutex<State<C::Artifact>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl HtmlView {
    pub fn html<P: Into<PathBuf>>(path: P, config: Arc<ViewConfig>) -> Result<Self, ViewError> {
        Self::load(path, Markup, config)
    }
}

impl TextView {
    pub fn text<P: Into<PathBuf>>(path: P, config: Arc<ViewConfig>) -> Result<Self, ViewError> {
        Self::load(path, PlainText, config)
    }
}

fn compile_file<C: Compile>(compiler: &C, path: &Path, name: &str) -> Result<C::Artifact, ViewError> {
    let source = std::fs::read_to_string(path).map_err(|source| ViewError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    compiler.compile(name, source)
}

impl<C: Compile> View<C> {
    /// Compile `path` and start watching it for changes.
    pub fn load<P: Into<PathBuf>>(path: P, compiler: C, config: Arc<ViewConfig>) -> Result<Self, ViewError> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let artifact = compile_file(&compiler, &path, &name)?;
        let state = Arc::new(Mutex::new(State {
            artifact: Arc::new(artifact),
            reload_required: false,
        }));

        let flagged = Arc::clone(&state);
        let shown = path.display().to_string();
        let watcher = watch::watch(&path, move || {
            let mut state = lock(&flagged);
            if !state.reload_required {
                tracing::info!(view = %shown, "Change detected, reload scheduled");
            }
            state.reload_required = true;
        })?;

        Ok(Self {
            path,
            name,
            compiler,
            config,
            state,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &'static str {
        self.compiler.content_type()
    }

    /// Whether a change was observed that the next render will pick up.
    pub fn reload_pending(&self) -> bool {
        lock(&self.state).reload_required
    }

    /// Stop watching the source file. Later edits are ignored.
    pub fn unwatch(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(|p| p.into_inner());
        if watcher.take().is_some() {
            tracing::debug!(view = %self.path.display(), "View watch stopped");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .map(|w| w.is_some())
            .unwrap_or(false)
    }

    /// Current artifact, recompiled first if the source changed.
    ///
    /// A failed recompile keeps the last good artifact and returns the error
    /// alongside it.
    fn fresh_artifact(&self) -> (Arc<C::Artifact>, Option<ViewError>) {
        let mut state = lock(&self.state);
        let mut failure = None;
        if state.reload_required {
            state.reload_required = false;
            tracing::info!(view = %self.path.display(), "Reloading view");
            match compile_file(&self.compiler, &self.path, &self.name) {
                Ok(artifact) => state.artifact = Arc::new(artifact),
                Err(e) => failure = Some(e),
            }
        }
        (Arc::clone(&state.artifact), failure)
    }

    /// Render into `res` with the shared globals, environment values, the
    /// caller's `locals` and per-request fields.
    ///
    /// Execution errors are logged; output produced before the error is
    /// still written and the status is left alone.
    pub fn render<L: Serialize>(&self, res: &mut Response, req: &Request, locals: L) {
        let (artifact, failure) = self.fresh_artifact();
        if let Some(e) = failure {
            if self.config.strict_reload {
                WebError::from(e).respond(res);
                return;
            }
            tracing::error!(error = %e, "View reload failed, rendering last good version");
        }

        let envelope = Envelope::new(&self.config, req, locals);
        let mut out = Vec::new();
        if let Err(e) = self.compiler.execute(&artifact, &mut out, &envelope) {
            tracing::error!(error = %e, "View render failed");
        }
        res.content_type(self.compiler.content_type());
        res.write(out);
    }
}

struct ViewHandler<C: Compile> {
    view: Arc<View<C>>,
}

#[async_trait]
impl<C: Compile> Handler for ViewHandler<C> {
    async fn handle(
        &self,
        res: &mut Response,
        req: &mut Request,
        _next: &mut Next,
    ) -> Result<(), WebError> {
        self.view.render(res, req, ());
        Ok(())
    }
}

/// Route handler rendering `view` without locals.
pub fn handler<C: Compile>(view: Arc<View<C>>) -> Arc<dyn Handler> {
    Arc::new(ViewHandler { view })
}

#[derive(Serialize)]
struct MissingPage<'a> {
    path: &'a str,
}

struct NotFoundPage<C: Compile> {
    view: Arc<View<C>>,
}

#[async_trait]
impl<C: Compile> Handler for NotFoundPage<C> {
    async fn handle(
        &self,
        res: &mut Response,
        req: &mut Request,
        _next: &mut Next,
    ) -> Result<(), WebError> {
        let path = req.path().to_string();
        res.status = http::StatusCode::NOT_FOUND;
        self.view.render(res, req, MissingPage { path: &path });
        Ok(())
    }
}

/// Not-found handler rendering `view` with status 404 and the requested
/// path as `locals.path`.
pub fn not_found_handler<C: Compile>(view: Arc<View<C>>) -> Arc<dyn Handler> {
    Arc::new(NotFoundPage { view })
}

struct LoadFailed {
    message: String,
}

#[async_trait]
impl Handler for LoadFailed {
    async fn handle(
        &self,
        _res: &mut Response,
        _req: &mut Request,
        _next: &mut Next,
    ) -> Result<(), WebError> {
        Err(internal_error(&self.message))
    }
}

/// Load an HTML view and wrap it in a handler. A load failure is logged and
/// the handler then answers every request with an error page.
pub fn load_handler<P: Into<PathBuf>>(path: P, config: Arc<ViewConfig>) -> Arc<dyn Handler> {
    match HtmlView::html(path, config) {
        Ok(view) => handler(Arc::new(view)),
        Err(e) => {
            tracing::error!(error = %e, "View load failed");
            Arc::new(LoadFailed {
                message: e.to_string(),
            })
        }
    }
}
