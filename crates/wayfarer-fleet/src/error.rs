//! Error types for fleet reconciliation and status probing.

use std::time::Duration;

use thiserror::Error;
use wayfarer_wireguard::AddressFamily;

use crate::types::RecordType;

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors that can occur while reconciling or probing a gateway fleet.
#[derive(Error, Debug)]
pub enum FleetError {
    /// The instance never reported an address in a required family.
    #[error("instance {instance_id} reported no {family} address after {waited:?}")]
    AddressResolutionFailed {
        /// Instance that was being resolved.
        instance_id: String,
        /// Family that did not resolve.
        family: AddressFamily,
        /// How long resolution was retried.
        waited: Duration,
    },

    /// Publishing a rendezvous record failed upstream.
    #[error("failed to update {record_type} record {name}: {reason}")]
    RendezvousUpdateFailed {
        /// Record name.
        name: String,
        /// Record type.
        record_type: RecordType,
        /// Description of the failure.
        reason: String,
    },

    /// A lifecycle event could not be read.
    #[error("invalid fleet event: {0}")]
    InvalidEvent(String),

    /// Unknown probe transport.
    #[error("invalid probe transport '{0}': expected udp or tcp")]
    InvalidTransport(String),

    /// An external hook produced output that could not be interpreted.
    #[error("invalid output from {command}: {message}")]
    InvalidOutput {
        /// The hook that was executed.
        command: String,
        /// What was wrong with the output.
        message: String,
    },

    /// An external hook exited unsuccessfully.
    #[error("command failed: {command} exited with {exit_code}: {stderr}")]
    CommandFailed {
        /// The hook that was executed.
        command: String,
        /// Exit code of the hook.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// An external hook did not finish in time and was killed.
    #[error("command timed out: {command} did not finish within {timeout:?}")]
    CommandTimedOut {
        /// The hook that was executed.
        command: String,
        /// The bound that expired.
        timeout: Duration,
    },

    /// An external hook is not configured.
    #[error("no {0} command configured")]
    NotConfigured(&'static str),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
