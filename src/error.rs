//! Error taxonomy (§7). No `anyhow`/`thiserror` in the dependency table, so
//! this crate keeps the hand-rolled enum + `Display` idiom, generalized
//! across every adapter-facing concern rather than just order placement.

use std::fmt;

/// Errors surfaced by `SourceClient`/`MirrorClient` adapters.
#[derive(Debug, Clone)]
pub enum AdapterError {
    /// Network timeout or socket error. Policy: back off, retry, then
    /// surface to the caller fiber.
    Transport(String),
    /// Explicit non-idempotent error code from the venue.
    VenueBusiness(String),
    /// Recognized idempotent codes (`not_found`, `already_canceled`, ...).
    /// Callers treat this identically to success.
    AlreadyDone,
    /// Unparseable or unexpected payload shape.
    Schema(String),
    /// HTTP 429 or venue-level rate-limit signal.
    RateLimited,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Transport(s) => write!(f, "transport error: {s}"),
            AdapterError::VenueBusiness(s) => write!(f, "venue error: {s}"),
            AdapterError::AlreadyDone => write!(f, "already done (idempotent)"),
            AdapterError::Schema(s) => write!(f, "schema mismatch: {s}"),
            AdapterError::RateLimited => write!(f, "rate limited"),
        }
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    /// Recognized idempotent venue codes are treated as success per spec §7.
    pub fn is_idempotent_success(&self) -> bool {
        match self {
            AdapterError::AlreadyDone => true,
            AdapterError::VenueBusiness(code) => {
                let c = code.to_lowercase();
                c.contains("not_found")
                    || c.contains("not found")
                    || c.contains("order_does_not_exist")
                    || c.contains("already_canceled")
                    || c.contains("already canceled")
            }
            _ => false,
        }
    }
}

/// Errors surfaced by the reconciliation core (wraps `AdapterError` plus
/// invariant/config failures that are not venue-shaped).
#[derive(Debug, Clone)]
pub enum ReconcileError {
    Adapter(AdapterError),
    /// Impossible state detected (e.g. mismatched mapping tables).
    Invariant(String),
    /// Startup-only: bad configuration or missing credentials.
    Configuration(String),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Adapter(e) => write!(f, "{e}"),
            ReconcileError::Invariant(s) => write!(f, "invariant violation: {s}"),
            ReconcileError::Configuration(s) => write!(f, "configuration error: {s}"),
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<AdapterError> for ReconcileError {
    fn from(e: AdapterError) -> Self {
        ReconcileError::Adapter(e)
    }
}
