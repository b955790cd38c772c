//! Error types for Chora operations.
//!
//! Two layers: `ChoraError` is the canonical `Result` error used throughout
//! the crate (auto-converts from library errors via `#[from]`), and
//! `ErrorKind` is the closed dispatch taxonomy surfaced to callers in
//! `DispatchResult` envelopes and mapped to CLI exit codes.

use std::io;
use thiserror::Error;

/// Closed taxonomy of dispatch-level error kinds.
///
/// Every `ok: false` dispatch result carries exactly one of these. Store
/// failure modes without a dispatch-level counterpart (`duplicate_id`,
/// `invalid_data`, `archive_has_bonds`) are folded into this set at the
/// dispatch boundary by [`ChoraError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IntentNotFound,
    PrimitiveNotFound,
    ProtocolNotFound,
    InvalidInputs,
    PhysicsViolation,
    ExecutionError,
    NotFound,
    AlreadyResolved,
    DependencyUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IntentNotFound => "intent_not_found",
            ErrorKind::PrimitiveNotFound => "primitive_not_found",
            ErrorKind::ProtocolNotFound => "protocol_not_found",
            ErrorKind::InvalidInputs => "invalid_inputs",
            ErrorKind::PhysicsViolation => "physics_violation",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyResolved => "already_resolved",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
        }
    }

    /// Parse a wire-format kind, defaulting unknown strings to
    /// `execution_error` so the taxonomy stays closed.
    pub fn parse(s: &str) -> ErrorKind {
        match s {
            "intent_not_found" => ErrorKind::IntentNotFound,
            "primitive_not_found" => ErrorKind::PrimitiveNotFound,
            "protocol_not_found" => ErrorKind::ProtocolNotFound,
            "invalid_inputs" => ErrorKind::InvalidInputs,
            "physics_violation" => ErrorKind::PhysicsViolation,
            "not_found" => ErrorKind::NotFound,
            "already_resolved" => ErrorKind::AlreadyResolved,
            "dependency_unavailable" => ErrorKind::DependencyUnavailable,
            _ => ErrorKind::ExecutionError,
        }
    }

    /// CLI exit code contract: 0 success, 1 generic failure, 2 invalid
    /// input, 3 not found, 4 physics violation.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::InvalidInputs => 2,
            ErrorKind::NotFound
            | ErrorKind::IntentNotFound
            | ErrorKind::PrimitiveNotFound
            | ErrorKind::ProtocolNotFound => 3,
            ErrorKind::PhysicsViolation => 4,
            _ => 1,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error type for all Chora operations.
#[derive(Error, Debug)]
pub enum ChoraError {
    /// SQLite database error (auto-converts from `rusqlite::Error`)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error (auto-converts from `std::io::Error`)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Referenced entity, bond, or capability does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bond write rejected by the physics table
    #[error("Physics violation: {0}")]
    PhysicsViolation(String),

    /// Manifesting an id that already exists with a different type
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// Payload rejected by boundary validation
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Archive refused: entity still has live bonds
    #[error("Archive refused, entity has active bonds: {0}")]
    ArchiveHasBonds(String),

    /// Signal or focus is not in a resolvable state
    #[error("Already resolved: {0}")]
    AlreadyResolved(String),

    /// Protocol or primitive execution failure
    #[error("Execution error: {0}")]
    Execution(String),

    /// Optional collaborator (vectorizer, key material) unavailable
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl ChoraError {
    /// Fold into the closed dispatch taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChoraError::NotFound(_) => ErrorKind::NotFound,
            ChoraError::PhysicsViolation(_) => ErrorKind::PhysicsViolation,
            ChoraError::DuplicateId(_)
            | ChoraError::InvalidData(_)
            | ChoraError::ArchiveHasBonds(_)
            | ChoraError::Json(_) => ErrorKind::InvalidInputs,
            ChoraError::AlreadyResolved(_) => ErrorKind::AlreadyResolved,
            ChoraError::DependencyUnavailable(_) => ErrorKind::DependencyUnavailable,
            _ => ErrorKind::ExecutionError,
        }
    }
}
