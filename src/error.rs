// src/error.rs

//! Crate-wide error type
//!
//! Every failure an introspection run can surface is one of these variants.
//! The HTTP boundary (out of scope here) maps them to user-visible status
//! codes; inside the crate they are propagated with `?` and never retried,
//! except for the power-state poll which has its own schedule.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or incomplete inventory payload. Raised before any
    /// external mutation, so the ramdisk can simply retry.
    #[error("invalid introspection data: {0}")]
    ValidationError(String),

    /// No registered node matched the payload, or its lease is held by a
    /// concurrent run.
    #[error("node not found or locked: {0}")]
    NotRegistered(String),

    /// The fleet record vanished between registration and processing.
    #[error("node not found in fleet inventory: {0}")]
    ExternalNotFound(String),

    /// Forced power-off was rejected. Raised after properties and ports
    /// were already committed; surfaced distinctly so operators can see
    /// the partial success.
    #[error("Failed to power off node {0}")]
    PowerOffFailed(String),

    /// A stored rule could not be evaluated. Only surfaced in strict mode;
    /// otherwise the offending rule is logged and skipped.
    #[error("rule evaluation failed: {0}")]
    RuleError(String),

    /// Unexpected fleet API failure outside the tolerated cases.
    #[error("fleet API error: {0}")]
    FleetError(String),

    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),
}
