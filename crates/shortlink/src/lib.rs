#![doc = include_str!("../README.md")]

mod backend;
mod batcher;
mod coalescer;
mod error;
mod generator;
mod pool;
mod rand;
mod service;
pub mod telemetry;
#[cfg(test)]
mod test_util;
mod types;

pub use crate::backend::*;
pub use crate::batcher::*;
pub use crate::coalescer::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::pool::*;
pub use crate::rand::*;
pub use crate::service::*;
pub use crate::types::*;
