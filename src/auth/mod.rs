pub mod credential;
pub mod middleware;

pub use credential::{Authorization, Caller, Scope};
pub use middleware::AdminCaller;
