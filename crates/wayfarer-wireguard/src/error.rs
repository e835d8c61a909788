//! Error types for peer registry and allocation operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::AddressFamily;

/// Result type alias for `WireGuard` registry operations.
pub type Result<T> = std::result::Result<T, WireGuardError>;

/// Errors that can occur while managing peers on a gateway.
#[derive(Debug, Error)]
pub enum WireGuardError {
    /// Invalid key format.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid base64 encoding.
    #[error("invalid base64 encoding: {0}")]
    InvalidBase64(String),

    /// Invalid key length.
    #[error("invalid key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    /// Invalid CIDR notation.
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Invalid endpoint.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Address pool configuration is unusable.
    #[error("invalid {family} pool: {reason}")]
    InvalidPool {
        /// Family of the offending pool.
        family: AddressFamily,
        /// Why the pool was rejected.
        reason: String,
    },

    /// Every allocatable offset in the pool is held by a peer.
    #[error("{family} pool exhausted: offsets {start}..={end} are all assigned")]
    AllocationExhausted {
        /// Family of the exhausted pool.
        family: AddressFamily,
        /// First allocatable offset.
        start: u128,
        /// Last allocatable offset.
        end: u128,
    },

    /// No peer matches the requested name or key.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// A peer with this name already exists.
    #[error("peer already exists: {0}")]
    PeerExists(String),

    /// Peer name contains unsupported characters.
    #[error("invalid peer name '{0}': use 1-64 characters from [A-Za-z0-9_.-]")]
    InvalidPeerName(String),

    /// A registry block could not be interpreted.
    #[error("corrupt registry block at line {line}: {message}")]
    RegistryCorrupt {
        /// Line of the block header (1-based).
        line: usize,
        /// What was wrong with the block.
        message: String,
    },

    /// A configuration line could not be parsed.
    #[error("parse error at line {line}: {message}")]
    ParseError {
        /// Line number (1-based).
        line: usize,
        /// Description of the error.
        message: String,
    },

    /// The registry has no `[Interface]` block.
    #[error("registry has no [Interface] block")]
    MissingInterface,

    /// The registry artifact already exists.
    #[error("registry already exists: {}", .0.display())]
    RegistryExists(PathBuf),

    /// The single-writer lock could not be taken.
    #[error("failed to lock {}: {message}", path.display())]
    Lock {
        /// Lock file path.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },

    /// An external `wg` invocation failed.
    #[error("command failed: {command} exited with {exit_code}: {stderr}")]
    CommandFailed {
        /// The command that was executed.
        command: String,
        /// Exit code of the command.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<base64::DecodeError> for WireGuardError {
    fn from(err: base64::DecodeError) -> Self {
        Self::InvalidBase64(err.to_string())
    }
}
