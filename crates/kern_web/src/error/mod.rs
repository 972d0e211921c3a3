mod response_error;
mod web_error;

pub use response_error::ResponseError;
pub use web_error::WebError;

use http::StatusCode;
use std::any::Any;

pub fn unauthorized<T: std::fmt::Display>(msg: T) -> WebError {
    WebError::new(SimpleError::new(StatusCode::UNAUTHORIZED, msg.to_string()))
}

pub fn forbidden<T: std::fmt::Display>(msg: T) -> WebError {
    WebError::new(SimpleError::new(StatusCode::FORBIDDEN, msg.to_string()))
}

pub fn internal_error<T: std::fmt::Display>(msg: T) -> WebError {
    WebError::new(SimpleError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        msg.to_string(),
    ))
}

/// A status and a message, for failures without a richer error type.
#[derive(Debug)]
pub struct SimpleError {
    status: StatusCode,
    message: String,
}

impl SimpleError {
    pub fn new(status: StatusCode, message: String) -> Self {
        Self { status, message }
    }
}

impl std::fmt::Display for SimpleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SimpleError {}

impl ResponseError for SimpleError {
    fn status_code(&self) -> StatusCode {
        self.status
    }
}

// static files read through `?`
impl ResponseError for std::io::Error {}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Response;

    #[test]
    fn constructors_carry_status() {
        assert_eq!(forbidden("no").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(unauthorized("who").status_code(), StatusCode::UNAUTHORIZED);

        let mut res = Response::default();
        internal_error("disk on fire").respond(&mut res);
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
