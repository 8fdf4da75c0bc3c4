//! # Shared Types and Constants
//!
//! Canonical types that flow between the caller-facing service, the worker
//! loops and the storage collaborators.
//!
//! - [`ShortId`] - the short code handed back to callers
//! - [`MappingRecord`] - the durable `id -> target` row
//! - [`DEFAULT_ID_LEN`] / [`ALPHABET`] - the identifier shape

/// The short identifier mapped to a target URL.
pub type ShortId = String;

/// Number of characters in a generated [`ShortId`].
///
/// With a 62-character alphabet six characters give ~5.7e10 combinations,
/// enough that a collision inside one batch is rare but still possible. The
/// batch persister retries on conflicts rather than assuming uniqueness.
pub const DEFAULT_ID_LEN: usize = 6;

/// Characters identifiers are drawn from.
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A durable `id -> target` mapping.
///
/// Records are built by a write worker at flush time, are immutable once
/// persisted, and only disappear through an explicit bulk delete. Uniqueness
/// of `id` is enforced by the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MappingRecord {
    pub id: ShortId,
    pub target: String,
}

impl MappingRecord {
    pub fn new(id: impl Into<ShortId>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
        }
    }
}
