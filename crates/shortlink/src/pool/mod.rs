//! Elastic supervision of worker loops.
//!
//! ## Structure
//!
//! - [`manager`] - the [`ElasticPool`] supervisor and its scaling policy.
//! - [`queue`] - the receiver shared by the workers of one pool.

mod manager;
mod queue;

pub use manager::*;
pub(crate) use queue::SharedReceiver;
