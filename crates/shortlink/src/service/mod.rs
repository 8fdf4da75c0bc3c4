//! Caller-facing cache-aside service.
//!
//! [`ShortLinkService`] validates requests and wires the cache, the
//! [`WriteBatcher`](crate::WriteBatcher) and the
//! [`ReadCoalescer`](crate::ReadCoalescer) together.

mod config;
mod handler;
#[cfg(test)]
mod tests;

pub use config::*;
pub use handler::*;
