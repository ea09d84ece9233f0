// ── Core error types ──
//
// User-facing errors from fieldgate-core. Consumers never see raw
// protocol errors; connect/read failures are translated into domain
// variants when a connection records its fault, and write-path errors
// carry exactly the distinction the caller needs: permission vs
// availability vs validation.

use thiserror::Error;

use crate::connection::LinkState;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Recoverable controller faults ────────────────────────────────
    #[error("cannot connect to controller at {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("bulk read failed on {controller}: {reason}")]
    ReadFailed { controller: String, reason: String },

    // ── Write-path rejections (surfaced, never retried) ──────────────
    #[error("viewer '{viewer}' has no access to controller {address}")]
    PermissionDenied { viewer: String, address: String },

    #[error("controller {address} is not connected (state: {state})")]
    ControllerUnavailable { address: String, state: LinkState },

    #[error("no controller configured at address {address}")]
    UnknownController { address: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
