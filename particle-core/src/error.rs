//! Error types shared by every particle transport substrate.

use thiserror::Error;

/// Result type alias used throughout `particle-core` and its dependents.
pub type Result<T> = std::result::Result<T, ParticleError>;

/// Error taxonomy for particle transports (spec.md §7).
#[derive(Error, Debug)]
pub enum ParticleError {
    /// I/O errors surfaced from the underlying OS primitives.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ring or staging queue is full; transient backpressure (§7.1).
    #[error("backpressure: {substrate} is full")]
    Backpressure {
        /// Name of the saturated substrate (e.g. "ipc ring", "mpsc queue").
        substrate: &'static str,
    },

    /// Payload larger than the substrate's configured maximum (§7.2).
    #[error("oversize payload: {len} bytes exceeds limit of {limit} bytes")]
    Oversize {
        /// Length of the rejected payload.
        len: usize,
        /// Maximum allowed length for this substrate.
        limit: usize,
    },

    /// Invalid frame length or corrupt header (§7.3).
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// Description of the violation.
        reason: String,
    },

    /// Peer disappeared: EOF, socket error, or stale heartbeat (§7.4).
    #[error("peer disconnected: {reason}")]
    PeerDisconnected {
        /// Description of why the peer is considered gone.
        reason: String,
    },

    /// Slab/pool exhaustion (§7.5).
    #[error("resource exhausted: {resource}")]
    ResourceExhausted {
        /// Name of the exhausted resource.
        resource: &'static str,
    },

    /// Send-after-dispose, double-attach, and similar misuse (§7.6).
    #[error("lifecycle misuse: {reason}")]
    LifecycleMisuse {
        /// Description of the misuse.
        reason: String,
    },

    /// Mapping/notification primitive not yet created by the peer (§7.7).
    #[error("attach timed out after {attempts} attempts: {reason}")]
    AttachTimeout {
        /// Number of retry attempts made before giving up.
        attempts: u32,
        /// Description of what failed to attach.
        reason: String,
    },

    /// Invalid configuration supplied to a constructor.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Operation attempted after cancellation/dispose.
    #[error("operation cancelled")]
    Cancelled,
}

impl ParticleError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Create a protocol violation error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation { reason: reason.into() }
    }

    /// Create a peer-disconnected error.
    pub fn peer_disconnected(reason: impl Into<String>) -> Self {
        Self::PeerDisconnected { reason: reason.into() }
    }

    /// Create a lifecycle misuse error.
    pub fn misuse(reason: impl Into<String>) -> Self {
        Self::LifecycleMisuse { reason: reason.into() }
    }

    /// Whether retrying the same operation later has a chance of succeeding.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Backpressure { .. } | Self::Io(_) | Self::AttachTimeout { .. })
    }

    /// Whether this error should terminate the endpoint's lifecycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PeerDisconnected { .. } | Self::Cancelled)
    }
}
