//! Errors reported by the bounded retry operations.

use thiserror::Error;

/// A bounded operation failed its optimistic validation on every attempt.
///
/// This is never returned for a key that is missing or already present, those
/// outcomes are `Ok(false)`. It only means that concurrent writers kept
/// invalidating the nodes this operation had locked, and that the operation
/// made no change. The caller is free to try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation aborted after {attempts} failed validations, retry")]
pub struct Contended {
    /// How many attempts were made before giving up.
    pub attempts: usize,
}
