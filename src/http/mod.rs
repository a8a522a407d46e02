//! HTTP layer: router, handlers, and per-caller rate limiting.

pub mod ratelimit;
pub mod routes;

pub use routes::router;
