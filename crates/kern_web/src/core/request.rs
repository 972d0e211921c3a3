use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde::de::DeserializeOwned;

use crate::core::context::Context;
use crate::error::ResponseError;

#[derive(Debug)]
pub struct Request {
    pub inner: http::Request<Bytes>,
    pub context: Context,
}

impl Request {
    /// Request for a well-formed `path`. A target that does not parse keeps
    /// the method and is routed as `/`; servers use [`Request::try_new`].
    pub fn new<M: Into<Method>, S: AsRef<str>>(method: M, path: S) -> Self {
        let method = method.into();
        Self::try_new(method.clone(), path).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Unparsable request target replaced by /");
            let mut inner = http::Request::new(Bytes::new());
            *inner.method_mut() = method;
            Self {
                inner,
                context: Context::new(),
            }
        })
    }

    /// Request for a raw request target, failing when it is not a valid URI.
    pub fn try_new<M: Into<Method>, S: AsRef<str>>(method: M, target: S) -> Result<Self, http::Error> {
        let inner = http::Request::builder()
            .method(method.into())
            .uri(target.as_ref())
            .body(Bytes::new())?;

        Ok(Self {
            inner,
            context: Context::new(),
        })
    }

    pub fn header<K, V>(mut self, k: K, v: V) -> Self
    where
        K: TryInto<http::HeaderName>,
        V: TryInto<HeaderValue>,
        K::Error: std::fmt::Debug,
        V::Error: std::fmt::Debug,
    {
        if let (Ok(key), Ok(value)) = (k.try_into(), v.try_into()) {
            self.inner.headers_mut().append(key, value);
        }
        self
    }

    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        *self.inner.body_mut() = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    /// Rewrite the method seen by routes evaluated after this point.
    pub fn set_method(&mut self, method: Method) {
        *self.inner.method_mut() = method;
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn path(&self) -> &str {
        self.inner.uri().path()
    }

    pub fn headers(&self) -> &HeaderMap<HeaderValue> {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap<HeaderValue> {
        self.inner.headers_mut()
    }

    pub fn body(&self) -> &Bytes {
        self.inner.body()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Host the client asked for, without a port.
    pub fn hostname(&self) -> &str {
        let host = self
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.uri().host())
            .unwrap_or("");
        match host.split_once(':') {
            Some((name, _port)) => name,
            None => host,
        }
    }

    /// Value of the cookie `name` from the `Cookie` request headers.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers()
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// Deserialize an `application/x-www-form-urlencoded` body.
    pub fn form<T: DeserializeOwned>(&self) -> Result<T, FormParseError> {
        serde_urlencoded::from_bytes(self.body()).map_err(FormParseError)
    }

    /// First value of the form field `name`, if the body is a valid form.
    pub fn form_value(&self, name: &str) -> Option<String> {
        self.form::<Vec<(String, String)>>()
            .ok()?
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }
}

#[derive(Debug)]
pub struct FormParseError(serde_urlencoded::de::Error);

impl std::fmt::Display for FormParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid form body: {}", self.0)
    }
}

impl std::error::Error for FormParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl ResponseError for FormParseError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_strips_port() {
        let req = Request::new(Method::GET, "/").header("host", "example.org:8080");
        assert_eq!(req.hostname(), "example.org");

        let req = Request::new(Method::GET, "/").header("host", "example.org");
        assert_eq!(req.hostname(), "example.org");

        let req = Request::new(Method::GET, "/");
        assert_eq!(req.hostname(), "");
    }

    #[test]
    fn cookies_are_parsed_from_header() {
        let req = Request::new(Method::GET, "/")
            .header("cookie", "a=1; KERN_SESSION=abc")
            .header("cookie", "b=2");
        assert_eq!(req.cookie("KERN_SESSION"), Some("abc"));
        assert_eq!(req.cookie("b"), Some("2"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn form_values() {
        #[derive(serde::Deserialize)]
        struct Login {
            username: String,
        }

        let req = Request::new(Method::POST, "/login").with_body("username=bob&password=s%20s");
        assert_eq!(req.form_value("password").as_deref(), Some("s s"));
        assert_eq!(req.form::<Login>().unwrap().username, "bob");
        assert!(req.form_value("nope").is_none());
    }

    #[test]
    fn malformed_targets_are_rejected() {
        for target in ["/admin/a b", "/admin/<x>"] {
            assert!(Request::try_new(Method::POST, target).is_err(), "{target}");
        }
        let req = Request::try_new(Method::POST, "/admin/x?y=1").unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.path(), "/admin/x");

        let req = Request::new(Method::POST, "/admin/<x>");
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn set_method_rewrites() {
        let mut req = Request::new(Method::POST, "/x");
        req.set_method(Method::GET);
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.path(), "/x");
    }
}
