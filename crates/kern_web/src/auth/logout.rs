use std::sync::Arc;

use serde::Serialize;

use super::{Message, MessageKind};
use crate::core::Router;
use crate::view::HtmlView;

#[derive(Serialize)]
struct Locals {
    messages: Vec<Message>,
}

/// Router at `path` that destroys the current session and renders `view`
/// with a message saying whether there was anything to log out of.
pub fn logout<P: AsRef<str>>(path: P, view: Arc<HtmlView>) -> Router {
    let mut router = Router::new(path);
    router.all_fn("/", move |res, req, _next| {
        let message = match req.context_mut().session.as_mut().filter(|s| s.is_active()) {
            Some(session) => {
                tracing::info!(user = %session.username, "Logout");
                session.destroy(res);
                Message::new(MessageKind::Success, "Logout", "Have a nice day ;)")
            }
            None => Message::new(
                MessageKind::Error,
                "No session found",
                "You are not logged in, maybe the session already expired?",
            ),
        };
        view.render(
            res,
            req,
            Locals {
                messages: vec![message],
            },
        );
        Ok(())
    });
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Method, Request, Response};
    use crate::module::{MemoryStore, ModuleRegistry, SessionModule};
    use crate::view::ViewConfig;

    #[tokio::test]
    async fn logout_destroys_active_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("logout.html");
        std::fs::write(&file, "{% for m in locals.messages %}{{ m.type }}:{{ m.title }}{% endfor %}").unwrap();
        let view = Arc::new(HtmlView::html(&file, Arc::new(ViewConfig::new())).unwrap());

        let store = Arc::new(MemoryStore::new());
        let mut modules = ModuleRegistry::new();
        modules.register_arc(Arc::new(SessionModule::new(store.clone())));

        let mut router = Router::default();
        router.get_fn("/login", |res, req, _next| {
            if let Some(session) = req.context_mut().session.as_mut() {
                session.start(res);
                session.username = "bob".into();
                session.logged_in = true;
            }
            Ok(())
        });
        router.mount(logout("/logout", view));

        let mut res = Response::default();
        let mut req = Request::new(Method::GET, "/login");
        router.serve(&modules, &mut res, &mut req).await;
        let cookie = res.headers["set-cookie"].to_str().unwrap().split(';').next().unwrap().to_string();
        assert_eq!(store.len(), 1);

        let mut res = Response::default();
        let mut req = Request::new(Method::POST, "/logout").header("cookie", cookie.as_str());
        router.serve(&modules, &mut res, &mut req).await;
        assert_eq!(res.body_bytes(), Some(&b"success:Logout"[..]));
        assert!(store.is_empty());

        let mut res = Response::default();
        let mut req = Request::new(Method::GET, "/logout").header("cookie", cookie.as_str());
        router.serve(&modules, &mut res, &mut req).await;
        assert_eq!(res.body_bytes(), Some(&b"error:No session found"[..]));
    }
}
