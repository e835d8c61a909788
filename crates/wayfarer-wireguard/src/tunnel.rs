//! Tunnel status as reported by the running interface.
//!
//! The `wg show <interface> dump` format is tab separated. The first line
//! describes the interface; every following line describes one peer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WireGuardError};
use crate::keys::PublicKey;
use crate::types::AllowedIp;

/// A handshake older than this marks the peer as stale.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 180;

/// Default keepalive interval written into client configs.
pub const DEFAULT_KEEPALIVE_SECS: u16 = 25;

const NONE: &str = "(none)";

/// Connection state of a peer, derived from its latest handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No handshake has ever completed.
    #[default]
    Disconnected,
    /// A handshake completed within the timeout.
    Connected,
    /// The last handshake is older than the timeout.
    Stale,
}

impl ConnectionState {
    /// Derives the state from a handshake timestamp (unix seconds, 0 = never).
    #[must_use]
    pub fn from_handshake(latest_handshake: u64, now: u64) -> Self {
        if latest_handshake == 0 {
            Self::Disconnected
        } else if now.saturating_sub(latest_handshake) <= DEFAULT_HANDSHAKE_TIMEOUT_SECS {
            Self::Connected
        } else {
            Self::Stale
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// Status of one peer on the running interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    /// The peer's public key.
    pub public_key: PublicKey,
    /// Last observed remote endpoint.
    pub endpoint: Option<String>,
    /// Routing scope configured for the peer.
    pub allowed_ips: Vec<AllowedIp>,
    /// Unix time of the latest handshake, if any.
    pub latest_handshake: Option<u64>,
    /// Bytes received from the peer.
    pub rx_bytes: u64,
    /// Bytes sent to the peer.
    pub tx_bytes: u64,
    /// Derived connection state.
    pub state: ConnectionState,
}

/// Status of the running interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStatus {
    /// The interface public key.
    pub public_key: PublicKey,
    /// UDP listen port.
    pub listen_port: u16,
    /// Peers on the interface.
    pub peers: Vec<PeerStatus>,
}

impl InterfaceStatus {
    /// Number of peers currently connected.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|p| p.state == ConnectionState::Connected)
            .count()
    }
}

/// Parses `wg show <interface> dump` output.
///
/// `now` is the current unix time in seconds, used to classify handshakes.
///
/// # Errors
///
/// Returns [`WireGuardError::ParseError`] if a line has the wrong shape.
pub fn parse_wg_dump(text: &str, now: u64) -> Result<InterfaceStatus> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines.next().ok_or_else(|| WireGuardError::ParseError {
        line: 1,
        message: "empty dump".to_string(),
    })?;
    let fields: Vec<&str> = header.split('\t').collect();
    if fields.len() < 3 {
        return Err(WireGuardError::ParseError {
            line: 1,
            message: format!("expected at least 3 interface fields, got {}", fields.len()),
        });
    }
    let public_key = PublicKey::from_base64(fields[1]).map_err(|e| WireGuardError::ParseError {
        line: 1,
        message: e.to_string(),
    })?;
    let listen_port = parse_field(fields[2], 1)?;

    let mut peers = Vec::new();
    for (idx, line) in lines {
        peers.push(parse_peer_line(line, idx + 1, now)?);
    }

    Ok(InterfaceStatus {
        public_key,
        listen_port,
        peers,
    })
}

fn parse_peer_line(line: &str, line_no: usize, now: u64) -> Result<PeerStatus> {
    let err = |message: String| WireGuardError::ParseError {
        line: line_no,
        message,
    };
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 7 {
        return Err(err(format!(
            "expected at least 7 peer fields, got {}",
            fields.len()
        )));
    }

    let public_key = PublicKey::from_base64(fields[0]).map_err(|e| err(e.to_string()))?;
    let endpoint = (fields[2] != NONE).then(|| fields[2].to_string());
    let allowed_ips = if fields[3] == NONE {
        Vec::new()
    } else {
        AllowedIp::parse_list(fields[3]).map_err(|e| err(e.to_string()))?
    };
    let handshake: u64 = parse_field(fields[4], line_no)?;

    Ok(PeerStatus {
        public_key,
        endpoint,
        allowed_ips,
        latest_handshake: (handshake != 0).then_some(handshake),
        rx_bytes: parse_field(fields[5], line_no)?,
        tx_bytes: parse_field(fields[6], line_no)?,
        state: ConnectionState::from_handshake(handshake, now),
    })
}

fn parse_field<T: std::str::FromStr>(value: &str, line: usize) -> Result<T> {
    value.parse().map_err(|_| WireGuardError::ParseError {
        line,
        message: format!("invalid numeric field '{value}'"),
    })
}
