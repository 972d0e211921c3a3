pub mod context;
pub mod path;
pub mod request;
pub mod response;
pub mod router;

pub use context::Context;
pub use http::Method;
pub use request::{FormParseError, Request};
pub use response::{Body, Response};
pub use router::{Dispatch, Handler, HandlerFn, Next, RouteMethod, Router};
