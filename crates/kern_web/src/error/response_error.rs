use crate::core::Response;
use crate::core::response::escape_html;
use http::StatusCode;

/// Trait for errors that know how to render themselves as an HTTP response.
///
/// Route handlers return `Result<(), WebError>`; the router turns an `Err`
/// into an error page through this trait and logs it.
pub trait ResponseError: std::error::Error + Send + Sync {
    /// Return the HTTP status code for this error.
    ///
    /// The default implementation returns 500 Internal Server Error.
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Replace whatever was buffered so far with an HTML error page.
    fn error_response(&self, res: &mut Response) {
        res.clear_body();
        res.html(
            self.status_code().as_u16(),
            format!("<h1>Error</h1><pre>{}</pre>", escape_html(&self.to_string())),
        );
    }
}
