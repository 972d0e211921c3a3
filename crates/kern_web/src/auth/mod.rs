//! Credential checking plus login and logout routers built on sessions.
pub mod login;
pub mod logout;

pub use login::permission_required;
pub use logout::logout;

use serde::Serialize;
use std::collections::BTreeMap;

/// Decides whether a username/password pair may log in.
pub trait CredentialChecker: Send + Sync + 'static {
    /// Permissions of the user on success.
    fn check(&self, username: &str, password: &str) -> Option<String>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
    pub permissions: String,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password", &!self.password.is_empty())
            .field("permissions", &self.permissions)
            .finish()
    }
}

impl User {
    fn check(&self, username: &str, password: &str) -> Option<String> {
        (self.username == username && self.password == password).then(|| self.permissions.clone())
    }
}

/// A single fixed user. Meant for development setups.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    user: User,
}

impl StaticCredentials {
    pub fn new<U, P, R>(username: U, password: P, permissions: R) -> Self
    where
        U: Into<String>,
        P: Into<String>,
        R: Into<String>,
    {
        Self {
            user: User {
                username: username.into(),
                password: password.into(),
                permissions: permissions.into(),
            },
        }
    }
}

impl CredentialChecker for StaticCredentials {
    fn check(&self, username: &str, password: &str) -> Option<String> {
        self.user.check(username, password)
    }
}

/// Users defined through environment variables, e.g.
/// `KERN_USER_bob=secret` and `KERN_PERMISSIONS_bob=view,edit`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    users: BTreeMap<String, User>,
}

impl EnvCredentials {
    pub const USER_PREFIX: &'static str = "KERN_USER_";
    pub const PERMISSIONS_PREFIX: &'static str = "KERN_PERMISSIONS_";

    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from `(name, value)` pairs. Users without a password cannot log
    /// in and are dropped.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut users: BTreeMap<String, User> = BTreeMap::new();
        for (name, value) in vars {
            let (username, is_password) = if let Some(u) = name.strip_prefix(Self::USER_PREFIX) {
                (u, true)
            } else if let Some(u) = name.strip_prefix(Self::PERMISSIONS_PREFIX) {
                (u, false)
            } else {
                continue;
            };
            let user = users.entry(username.to_string()).or_insert_with(|| User {
                username: username.to_string(),
                password: String::new(),
                permissions: String::new(),
            });
            if is_password {
                user.password = value;
            } else {
                user.permissions = value;
            }
        }

        users.retain(|name, user| {
            if user.password.is_empty() {
                tracing::error!(user = %name, "User has no password set, login disabled");
                return false;
            }
            if user.permissions.is_empty() {
                tracing::warn!(user = %name, "User has no permissions set");
            }
            tracing::info!(user = ?user, "Environment user added");
            true
        });
        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl CredentialChecker for EnvCredentials {
    fn check(&self, username: &str, password: &str) -> Option<String> {
        self.users.get(username)?.check(username, password)
    }
}

/// Ordered checkers; the first one accepting the credentials wins.
#[derive(Default)]
pub struct Credentials {
    checkers: Vec<Box<dyn CredentialChecker>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: CredentialChecker>(&mut self, checker: C) {
        self.checkers.push(Box::new(checker));
    }

    pub fn with<C: CredentialChecker>(mut self, checker: C) -> Self {
        self.register(checker);
        self
    }
}

impl CredentialChecker for Credentials {
    fn check(&self, username: &str, password: &str) -> Option<String> {
        self.checkers.iter().find_map(|c| c.check(username, password))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Success,
    Info,
    Warning,
    Error,
}

/// Notice shown to the user by a rendered view.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub title: String,
    pub text: String,
}

impl Message {
    pub fn new<T: Into<String>, X: Into<String>>(kind: MessageKind, title: T, text: X) -> Self {
        Self {
            kind,
            title: title.into(),
            text: text.into(),
        }
    }
}
