use thiserror::Error;

/// Top-level error type for the `fieldgate-proto` crate.
///
/// Covers every failure mode of a controller session: opening it,
/// enumerating the address space, bulk reads, and node writes.
/// `fieldgate-core` maps these into its own domain variants.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Session could not be opened (refused, unresolvable, handshake fault).
    #[error("cannot open session to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Address-space enumeration under the discovery root failed.
    #[error("browse under {root} failed: {reason}")]
    Browse { root: String, reason: String },

    /// Bulk read failed. The whole read is failed as a unit -- the
    /// protocol gives no usable partial result.
    #[error("bulk read failed: {reason}")]
    Read { reason: String },

    /// Write to a single node was rejected or the session dropped mid-call.
    #[error("write to {address} failed: {reason}")]
    Write { address: String, reason: String },

    /// The protocol stack did not answer within its own deadline.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Operation attempted on a session that is already closed.
    #[error("session closed")]
    SessionClosed,
}
