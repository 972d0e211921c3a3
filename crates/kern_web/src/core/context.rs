use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Instant;

use crate::module::session::Session;

/// Request-scoped state shared between modules and handlers.
///
/// Exactly one `Context` lives inside each [`Request`](crate::Request); it is
/// created together with the request and dropped when serving completes.
/// Framework-known data has explicit slots; anything else a module wants to
/// carry goes into the type-keyed extension map.
pub struct Context {
    request_id: String,
    started_at: Instant,
    /// Populated by [`SessionModule`](crate::module::SessionModule) when registered.
    pub session: Option<Session>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("session", &self.session)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            request_id: String::new(),
            started_at: Instant::now(),
            session: None,
            extensions: HashMap::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn set_request_id<S: Into<String>>(&mut self, id: S) {
        self.request_id = id.into();
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Session of the current request if it is active (loaded or started).
    pub fn active_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|s| s.is_active())
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|b| *b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter(u32);

    #[test]
    fn extensions_are_keyed_by_type() {
        let mut ctx = Context::new();
        assert!(ctx.insert(Counter(1)).is_none());
        assert!(ctx.insert(7u8).is_none());

        ctx.get_mut::<Counter>().unwrap().0 += 1;
        assert_eq!(ctx.get::<Counter>(), Some(&Counter(2)));
        assert_eq!(ctx.get::<u8>(), Some(&7));

        assert_eq!(ctx.insert(Counter(9)), Some(Counter(2)));
        assert_eq!(ctx.remove::<Counter>(), Some(Counter(9)));
        assert!(ctx.get::<Counter>().is_none());
    }

    #[test]
    fn no_active_session_by_default() {
        let ctx = Context::new();
        assert!(ctx.session.is_none());
        assert!(ctx.active_session().is_none());
        assert_eq!(ctx.request_id(), "");
    }
}
