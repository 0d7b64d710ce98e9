//! HTTP layer: request construction, transport abstraction, retrying executor.

pub mod client;
pub mod executor;
pub mod request;
pub mod response;
