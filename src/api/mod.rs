pub mod middleware;
pub mod routes;
pub mod ws;

pub use middleware::{Caller, USER_HEADER, log_request_errors};
pub use routes::*;
pub use ws::comments_ws;
