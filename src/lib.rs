//! Tollgate - Per-Client Request Quotas
//!
//! This crate enforces request quotas on an HTTP service. Clients are
//! identified by their `API_KEY` token when present and by network address
//! otherwise. Counters and blocks live in a counter store that is either held
//! in process or shared through Redis between instances.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod telemetry;
