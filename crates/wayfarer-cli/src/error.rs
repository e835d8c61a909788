//! CLI error types.

use thiserror::Error;
use wayfarer_fleet::FleetError;
use wayfarer_wireguard::WireGuardError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Peer registry or interface failure.
    #[error(transparent)]
    WireGuard(#[from] WireGuardError),

    /// Reconciliation or probe failure.
    #[error(transparent)]
    Fleet(#[from] FleetError),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_error_display_config() {
        let err = CliError::Config("rendezvous is not set".into());
        assert_eq!(err.to_string(), "configuration error: rendezvous is not set");
    }

    #[test]
    fn library_errors_keep_their_message() {
        let err = CliError::from(WireGuardError::PeerNotFound("alice".into()));
        assert_eq!(err.to_string(), "peer not found: alice");
        let err = CliError::from(FleetError::NotConfigured("fleet_state"));
        assert_eq!(err.to_string(), "no fleet_state command configured");
    }

    #[test]
    fn cli_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let cli_err = CliError::from(io_err);
        assert!(matches!(cli_err, CliError::Io(_)));
    }
}
