//! Live `WireGuard` interface updates.
//!
//! The registry file is what the interface loads at start. Changes made while
//! the interface is running are pushed through this trait so new peers can
//! connect without a restart.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, WireGuardError};
use crate::keys::PublicKey;
use crate::registry::PeerRecord;
use crate::types::AllowedIp;

/// Trait for pushing peer changes to a running interface.
#[allow(async_fn_in_trait)]
pub trait WireGuardInterface {
    /// Adds or updates a peer on the running interface.
    async fn add_peer(&self, interface: &str, peer: &PeerRecord) -> Result<()>;

    /// Removes a peer from the running interface.
    async fn remove_peer(&self, interface: &str, public_key: &PublicKey) -> Result<()>;

    /// Returns the `wg show <interface> dump` text of the running interface.
    async fn dump(&self, interface: &str) -> Result<String>;
}

/// Interface control through the `wg` command-line tool.
#[derive(Debug, Clone)]
pub struct WgCommand {
    program: String,
}

impl Default for WgCommand {
    fn default() -> Self {
        Self::new("wg")
    }
}

impl WgCommand {
    /// Creates a controller that runs `program` (normally `wg`).
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(program = %self.program, ?args, "running wg");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(WireGuardError::CommandFailed {
                command: format!("{} {}", self.program, args.join(" ")),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl WireGuardInterface for WgCommand {
    async fn add_peer(&self, interface: &str, peer: &PeerRecord) -> Result<()> {
        let key = peer.public_key.to_base64();
        let ips: Vec<String> = peer.allowed_ips.iter().map(AllowedIp::to_cidr).collect();
        let ips = ips.join(",");
        self.run(&["set", interface, "peer", &key, "allowed-ips", &ips])
            .await
            .map(|_| ())
    }

    async fn remove_peer(&self, interface: &str, public_key: &PublicKey) -> Result<()> {
        let key = public_key.to_base64();
        self.run(&["set", interface, "peer", &key, "remove"])
            .await
            .map(|_| ())
    }

    async fn dump(&self, interface: &str) -> Result<String> {
        self.run(&["show", interface, "dump"]).await
    }
}

/// An in-memory interface for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct FakeWireGuardInterface {
    peers: Arc<RwLock<HashMap<String, HashMap<PublicKey, Vec<AllowedIp>>>>>,
}

impl FakeWireGuardInterface {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the peers currently configured on `interface`.
    pub async fn peer_keys(&self, interface: &str) -> Vec<PublicKey> {
        let peers = self.peers.read().await;
        peers
            .get(interface)
            .map(|p| p.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl WireGuardInterface for FakeWireGuardInterface {
    async fn add_peer(&self, interface: &str, peer: &PeerRecord) -> Result<()> {
        let mut peers = self.peers.write().await;
        peers
            .entry(interface.to_string())
            .or_default()
            .insert(peer.public_key, peer.allowed_ips.clone());
        Ok(())
    }

    async fn remove_peer(&self, interface: &str, public_key: &PublicKey) -> Result<()> {
        let mut peers = self.peers.write().await;
        peers
            .get_mut(interface)
            .and_then(|p| p.remove(public_key))
            .map(|_| ())
            .ok_or_else(|| WireGuardError::PeerNotFound(public_key.to_base64()))
    }

    async fn dump(&self, interface: &str) -> Result<String> {
        let peers = self.peers.read().await;
        let mut out = String::from("(hidden)\t(none)\t51820\toff\n");
        for (key, ips) in peers.get(interface).into_iter().flatten() {
            let ips: Vec<String> = ips.iter().map(AllowedIp::to_cidr).collect();
            out.push_str(&format!(
                "{key}\t(none)\t(none)\t{}\t0\t0\t0\toff\n",
                ips.join(",")
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;
    use crate::tunnel::parse_wg_dump;

    fn peer() -> PeerRecord {
        let (_, key) = generate_keypair();
        PeerRecord::new("alice", key, vec![AllowedIp::from_cidr("10.8.0.2/32").expect("cidr")])
    }

    #[tokio::test]
    async fn fake_tracks_peers_per_interface() {
        let fake = FakeWireGuardInterface::new();
        let alice = peer();
        fake.add_peer("wg0", &alice).await.expect("add");
        assert_eq!(fake.peer_keys("wg0").await, vec![alice.public_key]);
        assert!(fake.peer_keys("wg1").await.is_empty());

        fake.remove_peer("wg0", &alice.public_key).await.expect("remove");
        assert!(fake.peer_keys("wg0").await.is_empty());
        assert!(fake.remove_peer("wg0", &alice.public_key).await.is_err());
    }

    #[tokio::test]
    async fn fake_dump_is_parseable() {
        let fake = FakeWireGuardInterface::new();
        let alice = peer();
        fake.add_peer("wg0", &alice).await.expect("add");
        let status = parse_wg_dump(&fake.dump("wg0").await.expect("dump"), 0).expect("parse");
        assert_eq!(status.peers.len(), 1);
        assert_eq!(status.peers[0].public_key, alice.public_key);
    }

    #[tokio::test]
    async fn missing_wg_binary_is_an_error() {
        let wg = WgCommand::new("/nonexistent/wayfarer-wg");
        assert!(wg.dump("wg0").await.is_err());
    }
}
