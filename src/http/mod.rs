//! HTTP layer: rate limiting middleware and the server that hosts it.

mod middleware;
mod server;

pub use middleware::{client_ip, rate_limit, LimiterState, TOKEN_HEADER};
pub use server::{router, HttpServer};
