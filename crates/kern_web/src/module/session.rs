//! Cookie-based sessions over a pluggable [`SessionStore`].
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::core::{Request, Response};
use crate::module::{Flow, Module};

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Persisted part of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub username: String,
    pub permissions: String,
    pub values: HashMap<String, String>,
}

/// Storage backend consulted by [`SessionModule`].
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, StoreError>;
    async fn save(&self, id: &str, data: &SessionData, ttl: Duration) -> Result<(), StoreError>;
    async fn destroy(&self, id: &str) -> Result<(), StoreError>;
}

/// In-process store with per-entry expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (SessionData, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, StoreError> {
        let map = self.entries.read().map_err(|_| "session store poisoned")?;
        Ok(map
            .get(id)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(data, _)| data.clone()))
    }

    async fn save(&self, id: &str, data: &SessionData, ttl: Duration) -> Result<(), StoreError> {
        let mut map = self.entries.write().map_err(|_| "session store poisoned")?;
        let now = Instant::now();
        map.retain(|_, (_, expires)| *expires > now);
        map.insert(id.to_string(), (data.clone(), now + ttl));
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        let mut map = self.entries.write().map_err(|_| "session store poisoned")?;
        map.remove(id);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "KERN_SESSION".to_string(),
            ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookie_name<S: Into<String>>(mut self, name: S) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Inactive,
    Active,
    Destroyed,
}

/// Session slot of the request context.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    state: State,
    config: Arc<SessionConfig>,
    pub username: String,
    pub logged_in: bool,
    pub permissions: String,
    pub values: HashMap<String, String>,
}

/// Random 256 bit identifier, hex encoded.
pub fn new_session_id() -> String {
    let buffer: [u8; 32] = rand::random();
    format!("{:x}", Sha256::digest(buffer))
}

impl Session {
    fn new(config: Arc<SessionConfig>) -> Self {
        Self {
            id: String::new(),
            state: State::Inactive,
            config,
            username: String::new(),
            logged_in: false,
            permissions: String::new(),
            values: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::new(Arc::new(SessionConfig::default()))
    }

    fn restore(&mut self, id: String, data: SessionData) {
        self.id = id;
        self.state = State::Active;
        self.logged_in = !data.username.is_empty();
        self.username = data.username;
        self.permissions = data.permissions;
        self.values = data.values;
    }

    fn data(&self) -> SessionData {
        SessionData {
            username: self.username.clone(),
            permissions: self.permissions.clone(),
            values: self.values.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// Begin a new session and hand its cookie to the client.
    pub fn start(&mut self, res: &mut Response) {
        if self.is_active() {
            tracing::warn!(session = %self.id, "Session already active, not restarting");
            return;
        }
        self.id = new_session_id();
        self.state = State::Active;
        self.set_cookie(res);
    }

    /// End the session; the store entry is removed once the request completes.
    pub fn destroy(&mut self, res: &mut Response) {
        if !self.is_active() {
            return;
        }
        self.state = State::Destroyed;
        self.logged_in = false;
        res.append_header(
            http::header::SET_COOKIE,
            format!(
                "{}=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
                self.config.cookie_name
            ),
        );
    }

    fn set_cookie(&self, res: &mut Response) {
        let ttl = chrono::Duration::from_std(self.config.ttl).unwrap_or(chrono::Duration::hours(1));
        let expires = (chrono::Utc::now() + ttl).format("%a, %d %b %Y %H:%M:%S GMT");
        res.append_header(
            http::header::SET_COOKIE,
            format!("{}={}; Path=/; Expires={}", self.config.cookie_name, self.id, expires),
        );
    }
}

/// Loads the session named by the request cookie on start and persists or
/// destroys it on end.
pub struct SessionModule {
    store: Arc<dyn SessionStore>,
    config: Arc<SessionConfig>,
}

impl SessionModule {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(store, SessionConfig::default())
    }

    pub fn with_config(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Module for SessionModule {
    async fn on_start(&self, res: &mut Response, req: &mut Request) -> Flow {
        let mut session = Session::new(self.config.clone());

        if let Some(id) = req.cookie(&self.config.cookie_name).map(str::to_string) {
            match self.store.load(&id).await {
                Ok(Some(data)) => {
                    session.restore(id, data);
                    session.set_cookie(res);
                    tracing::info!(session = %session.id, user = %session.username, "Session loaded");
                }
                Ok(None) => tracing::debug!("Session cookie without stored session"),
                Err(e) => tracing::error!(error = %e, "Session load failed"),
            }
        }

        req.context_mut().session = Some(session);
        Flow::Continue
    }

    async fn on_end(&self, _res: &mut Response, req: &Request) {
        let Some(session) = &req.context().session else {
            return;
        };
        match session.state {
            State::Active => {
                match self.store.save(&session.id, &session.data(), self.config.ttl).await {
                    Ok(()) => tracing::info!(session = %session.id, user = %session.username, "Session saved"),
                    Err(e) => tracing::error!(error = %e, "Session save failed"),
                }
            }
            State::Destroyed => {
                tracing::info!(session = %session.id, "Destroying session");
                if let Err(e) = self.store.destroy(&session.id).await {
                    tracing::error!(error = %e, "Session delete failed");
                }
            }
            State::Inactive => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Method, Router};
    use crate::module::ModuleRegistry;

    fn app(store: Arc<MemoryStore>) -> (Router, ModuleRegistry) {
        let mut modules = ModuleRegistry::new();
        modules.register(SessionModule::new(store));

        let mut router = Router::default();
        router.get_fn("/login", |res, req, _next| {
            let session = req.context_mut().session.as_mut().expect("session slot");
            session.start(res);
            session.username = "bob".into();
            session.values.insert("theme".into(), "dark".into());
            res.text(200, "in");
            Ok(())
        });
        router.get_fn("/whoami", |res, req, _next| {
            let name = req
                .context()
                .active_session()
                .filter(|s| s.logged_in)
                .map(|s| s.username.clone())
                .unwrap_or_else(|| "nobody".into());
            res.text(200, name);
            Ok(())
        });
        router.get_fn("/logout", |res, req, _next| {
            if let Some(session) = req.context_mut().session.as_mut() {
                session.destroy(res);
            }
            res.text(200, "out");
            Ok(())
        });
        (router, modules)
    }

    async fn get(router: &Router, modules: &ModuleRegistry, path: &str, cookie: Option<&str>) -> Response {
        let mut req = Request::new(Method::GET, path);
        if let Some(c) = cookie {
            req = req.header("cookie", c);
        }
        let mut res = Response::default();
        router.serve(modules, &mut res, &mut req).await;
        res
    }

    fn cookie_pair(res: &Response) -> String {
        let header = res.headers.get("set-cookie").unwrap().to_str().unwrap();
        header.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn session_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let (router, modules) = app(store.clone());

        let res = get(&router, &modules, "/whoami", None).await;
        assert_eq!(res.body_bytes(), Some(&b"nobody"[..]));
        assert!(store.is_empty());

        let res = get(&router, &modules, "/login", None).await;
        let cookie = cookie_pair(&res);
        assert!(cookie.starts_with("KERN_SESSION="));
        assert_eq!(store.len(), 1);

        let res = get(&router, &modules, "/whoami", Some(&cookie)).await;
        assert_eq!(res.body_bytes(), Some(&b"bob"[..]));
        // loaded sessions refresh their cookie
        assert!(res.headers.contains_key("set-cookie"));

        let id = cookie.trim_start_matches("KERN_SESSION=");
        let data = store.load(id).await.unwrap().unwrap();
        assert_eq!(data.values.get("theme").map(String::as_str), Some("dark"));

        let res = get(&router, &modules, "/logout", Some(&cookie)).await;
        assert!(res
            .headers
            .get_all("set-cookie")
            .iter()
            .any(|v| v.to_str().unwrap().contains("1970")));
        assert!(store.is_empty());

        let res = get(&router, &modules, "/whoami", Some(&cookie)).await;
        assert_eq!(res.body_bytes(), Some(&b"nobody"[..]));
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryStore::new();
        store
            .save("a", &SessionData::default(), Duration::from_millis(0))
            .await
            .unwrap();
        assert!(store.load("a").await.unwrap().is_none());
    }

    #[test]
    fn session_ids_are_hex() {
        let id = new_session_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
