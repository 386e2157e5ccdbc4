//! Crate-wide error type.
//!
//! Leaf modules define their own small `thiserror` enums (see
//! [`crate::equivalence::EquivalenceError`], [`crate::propagate::PropagationError`],
//! [`crate::config::ConfigError`]); this module composes them into one
//! `CvcError` via `#[from]`, the way the teacher's binaries collapse
//! `SrsSetupError`/`StreamError`/`AirError` at the call site rather than
//! each module reinventing a top-level error.

use crate::config::ConfigError;
use crate::database::DatabaseError;
use crate::equivalence::EquivalenceError;
use crate::ingest::IngestError;
use crate::propagate::PropagationError;

/// Tier-3 ("internal invariant") and configuration errors surfaced to the
/// top-level driver. Tier-1 user-data errors don't arise here since the
/// parsers that would produce them are out of scope (see `SPEC_FULL.md`
/// §7); tier-2 electrical errors are reported as [`crate::detect::ErrorRecord`]
/// values, not as `CvcError`.
#[derive(Debug, thiserror::Error)]
pub enum CvcError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Equivalence(#[from] EquivalenceError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("verification was interrupted before completion")]
    Interrupted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
