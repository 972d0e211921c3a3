use super::ResponseError;
use crate::core::Response;

/// Error type returned by route handlers.
///
/// Wraps any [`ResponseError`]; request context such as the request id is
/// attached by the surrounding tracing span, not stored here.
#[derive(Debug)]
pub struct WebError {
    inner: Box<dyn ResponseError>,
}

impl WebError {
    #[track_caller]
    pub fn new<T: ResponseError + 'static>(err: T) -> Self {
        Self {
            inner: Box::new(err),
        }
    }

    pub fn as_response_error(&self) -> &dyn ResponseError {
        &*self.inner
    }

    /// Log the error and render it into `res`.
    pub fn respond(&self, res: &mut Response) {
        tracing::error!(
            status_code = %self.inner.status_code(),
            error = %self.inner,
            "Request failed",
        );
        self.inner.error_response(res);
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for WebError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl From<crate::core::request::FormParseError> for WebError {
    #[track_caller]
    fn from(err: crate::core::request::FormParseError) -> Self {
        Self::new(err)
    }
}

impl From<std::io::Error> for WebError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::new(err)
    }
}

impl From<crate::view::ViewError> for WebError {
    #[track_caller]
    fn from(err: crate::view::ViewError) -> Self {
        Self::new(err)
    }
}

impl From<crate::error::SimpleError> for WebError {
    #[track_caller]
    fn from(err: crate::error::SimpleError) -> Self {
        Self::new(err)
    }
}

impl ResponseError for WebError {
    fn status_code(&self) -> http::StatusCode {
        self.inner.status_code()
    }

    fn error_response(&self, res: &mut Response) {
        self.inner.error_response(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimpleError;
    use http::StatusCode;

    #[test]
    fn web_error_keeps_status() {
        let web_err: WebError =
            SimpleError::new(StatusCode::BAD_REQUEST, "Test error".to_string()).into();

        assert_eq!(
            web_err.as_response_error().status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(web_err.to_string(), "Test error");
    }

    #[test]
    fn respond_replaces_body_with_error_page() {
        let mut res = Response::default();
        res.write("partial");

        let err = WebError::from(std::io::Error::other("disk <gone>"));
        err.respond(&mut res);

        assert_eq!(res.status.as_u16(), 500);
        let body = std::str::from_utf8(res.body_bytes().unwrap()).unwrap();
        assert_eq!(body, "<h1>Error</h1><pre>disk &lt;gone&gt;</pre>");
    }
}
