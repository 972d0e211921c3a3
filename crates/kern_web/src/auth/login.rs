use std::sync::Arc;

use serde::Serialize;

use super::{CredentialChecker, Credentials, Message, MessageKind};
use crate::core::{Method, Request, Response, Router};
use crate::error::{WebError, forbidden, internal_error};
use crate::module::session::{Session, new_session_id};
use crate::view::HtmlView;

/// Form field a login POST must carry; generated once per router so only
/// forms rendered by this process are accepted.
#[derive(Debug, Clone)]
struct LoginToken {
    field: String,
    value: String,
}

#[derive(Serialize)]
struct FormLocals<'a> {
    login_field: &'a str,
    login_value: &'a str,
    username: String,
    messages: Vec<Message>,
}

struct Gate {
    permission: String,
    credentials: Arc<Credentials>,
    view: Arc<HtmlView>,
    token: LoginToken,
}

fn has_permission(session: &Session, permission: &str) -> bool {
    permission.is_empty()
        || session
            .permissions
            .split(',')
            .map(str::trim)
            .any(|p| p == permission || p == "*")
}

impl Gate {
    /// `Ok(true)` when the request may continue, an error when the user is
    /// logged in but lacks the permission.
    fn session_ok(&self, req: &Request) -> Result<bool, WebError> {
        let Some(session) = req.context().active_session().filter(|s| s.logged_in) else {
            return Ok(false);
        };
        if has_permission(session, &self.permission) {
            Ok(true)
        } else {
            tracing::warn!(user = %session.username, permission = %self.permission, "Permission denied");
            Err(forbidden(format!("permission '{}' required", self.permission)))
        }
    }

    fn login(&self, res: &mut Response, req: &mut Request, messages: &mut Vec<Message>) -> Result<bool, WebError> {
        if req.form_value(&self.token.field).as_deref() != Some(self.token.value.as_str()) {
            messages.push(Message::new(
                MessageKind::Error,
                "No Login Field",
                "Your POST request does not contain a correct login key. Please log in (again)",
            ));
            return Ok(false);
        }

        let username = req.form_value("username").unwrap_or_default();
        let password = req.form_value("password").unwrap_or_default();
        let Some(permissions) = self.credentials.check(&username, &password) else {
            tracing::info!(user = %username, "Login rejected");
            messages.push(Message::new(
                MessageKind::Error,
                "Wrong credentials",
                "Please provide a correct username and password",
            ));
            return Ok(false);
        };

        let session = req
            .context_mut()
            .session
            .as_mut()
            .ok_or_else(|| internal_error("login requires the session module"))?;
        session.start(res);
        tracing::info!(user = %username, "Login");
        session.username = username;
        session.permissions = permissions;
        session.logged_in = true;
        Ok(true)
    }

    fn render_form(&self, res: &mut Response, req: &Request, messages: Vec<Message>) {
        let locals = FormLocals {
            login_field: &self.token.field,
            login_value: &self.token.value,
            username: req.form_value("username").unwrap_or_default(),
            messages,
        };
        self.view.render(res, req, locals);
    }
}

/// Router at `path` that stops routing unless the session is logged in and
/// holds `permission`. Anonymous requests get the login form rendered by
/// `view`. A successful login POST continues routing as a GET, so the page
/// behind the form is served directly.
///
/// `permission` may be empty to require only a login. A session with the
/// permission `*` passes every check.
pub fn permission_required<P, S>(
    path: P,
    permission: S,
    credentials: Arc<Credentials>,
    view: Arc<HtmlView>,
) -> Router
where
    P: AsRef<str>,
    S: Into<String>,
{
    let gate = Arc::new(Gate {
        permission: permission.into(),
        credentials,
        view,
        token: LoginToken {
            field: new_session_id(),
            value: new_session_id(),
        },
    });

    let mut router = Router::new(path);

    let post_gate = gate.clone();
    router.post_fn("/", move |res, req, next| {
        if post_gate.session_ok(req)? {
            next.resume();
            return Ok(());
        }
        let mut messages = Vec::new();
        if post_gate.login(res, req, &mut messages)? {
            req.set_method(Method::GET);
            next.resume();
            return Ok(());
        }
        post_gate.render_form(res, req, messages);
        Ok(())
    });

    router.get_fn("/", move |res, req, next| {
        if gate.session_ok(req)? {
            next.resume();
            return Ok(());
        }
        gate.render_form(res, req, Vec::new());
        Ok(())
    });

    router
}
