//! Peer management commands: `add-peer`, `remove-peer`, `list-peers`.

use std::fs;
use std::io::Write;

use tracing::warn;
use wayfarer_wireguard::{
    AddressFamily, PeerManager, PeerRegistry, RegistryDocument, WgCommand, WireGuardInterface,
};

use crate::cli::AddPeerArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, PeerAdded, PeerList, PeerRemoved, PeerRow, render_qr};
use crate::settings::Settings;

/// Handler for peer subcommands.
pub struct PeerCommand<'a> {
    settings: &'a Settings,
}

impl<'a> PeerCommand<'a> {
    /// Creates a new peer command handler.
    #[must_use]
    pub const fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    fn manager<I: WireGuardInterface>(&self, interface: I) -> Result<PeerManager<I>, CliError> {
        let registry = PeerRegistry::open(&self.settings.registry_path)?;
        Ok(PeerManager::new(
            registry,
            self.settings.allocator()?,
            self.settings.manager_config()?,
            interface,
        ))
    }

    /// Adds a peer and prints its client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or invalid, the pool is exhausted,
    /// or the registry cannot be written.
    pub async fn add<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &AddPeerArgs,
    ) -> Result<(), CliError> {
        self.add_with(out, format, args, WgCommand::default()).await
    }

    async fn add_with<W: Write, I: WireGuardInterface>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &AddPeerArgs,
        interface: I,
    ) -> Result<(), CliError> {
        let mut manager = self.manager(interface)?;
        let material = manager.add_peer(&args.name).await?;
        let qr = if args.no_qr || format.is_json() {
            None
        } else {
            scannable(&material.name, &material.config_text)
        };
        format.write(out, &PeerAdded { material, qr })
    }

    /// Removes a peer by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is unknown or the registry cannot be written.
    pub async fn remove<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        name: &str,
    ) -> Result<(), CliError> {
        self.remove_with(out, format, name, WgCommand::default()).await
    }

    async fn remove_with<W: Write, I: WireGuardInterface>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        name: &str,
        interface: I,
    ) -> Result<(), CliError> {
        let mut manager = self.manager(interface)?;
        let removed = manager.remove_peer(name).await?;
        format.write(
            out,
            &PeerRemoved {
                name: removed.name,
                public_key: removed.public_key,
            },
        )
    }

    /// Lists registered peers. Reads the registry without taking the writer lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub fn list<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let text = fs::read_to_string(&self.settings.registry_path)?;
        let peers = RegistryDocument::parse(&text)
            .peers()
            .into_iter()
            .map(|peer| PeerRow {
                ipv4: peer.address(AddressFamily::V4),
                ipv6: peer.address(AddressFamily::V6),
                name: peer.name,
                public_key: peer.public_key,
            })
            .collect();
        format.write(out, &PeerList { peers })
    }
}

/// The peer is already committed here, so an encoding failure only drops the QR code.
fn scannable(name: &str, config_text: &str) -> Option<String> {
    match render_qr(config_text) {
        Ok(qr) => Some(qr),
        Err(e) => {
            warn!(peer = %name, error = %e, "printing client config without QR code");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Format, InitArgs};
    use crate::commands::InitCommand;
    use tempfile::TempDir;
    use wayfarer_wireguard::FakeWireGuardInterface;

    fn settings(dir: &TempDir) -> Settings {
        let settings = Settings {
            registry_path: dir.path().join("wg0.conf"),
            clients_dir: Some(dir.path().join("clients")),
            rendezvous: Some("vpn.example.com".into()),
            apply_live: false,
            ..Settings::default()
        };
        InitCommand::new(&settings)
            .execute(&mut Vec::new(), &OutputFormat::default(), &InitArgs { private_key_file: None })
            .expect("init");
        settings
    }

    fn args(name: &str) -> AddPeerArgs {
        AddPeerArgs {
            name: name.to_string(),
            no_qr: false,
        }
    }

    #[tokio::test]
    async fn add_prints_config_and_qr() {
        let dir = TempDir::new().expect("tempdir");
        let settings = settings(&dir);
        let mut out = Vec::new();
        PeerCommand::new(&settings)
            .add(&mut out, &OutputFormat::default(), &args("alice"))
            .await
            .expect("add");
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.starts_with("[Interface]\n"));
        assert!(out.contains("Address = 10.8.0.2/32\n"));
        assert!(out.contains("Endpoint = vpn.example.com:51820\n"));
        assert!(out.contains('\u{2580}') || out.contains('\u{2584}') || out.contains('\u{2588}'));
        assert!(dir.path().join("clients/alice.conf").exists());
    }

    #[test]
    fn oversized_config_prints_without_qr() {
        assert!(scannable("alice", "[Interface]\n").is_some());
        assert!(scannable("alice", &"x".repeat(8000)).is_none());
    }

    #[tokio::test]
    async fn add_json_omits_qr() {
        let dir = TempDir::new().expect("tempdir");
        let settings = settings(&dir);
        let mut out = Vec::new();
        PeerCommand::new(&settings)
            .add(&mut out, &OutputFormat::new(Format::Json), &args("alice"))
            .await
            .expect("add");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["name"], "alice");
        assert_eq!(value["assignment"]["ipv4"], "10.8.0.2");
        assert!(value.get("qr").is_none());
    }

    #[tokio::test]
    async fn live_interface_receives_added_and_removed_peers() {
        let dir = TempDir::new().expect("tempdir");
        let settings = Settings {
            apply_live: true,
            ..settings(&dir)
        };
        let fake = FakeWireGuardInterface::new();
        let command = PeerCommand::new(&settings);

        command
            .add_with(&mut Vec::new(), &OutputFormat::default(), &args("alice"), fake.clone())
            .await
            .expect("add");
        assert_eq!(fake.peer_keys("wg0").await.len(), 1);

        command
            .remove_with(&mut Vec::new(), &OutputFormat::default(), "alice", fake.clone())
            .await
            .expect("remove");
        assert!(fake.peer_keys("wg0").await.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_peer_fails() {
        let dir = TempDir::new().expect("tempdir");
        let settings = settings(&dir);
        let err = PeerCommand::new(&settings)
            .remove(&mut Vec::new(), &OutputFormat::default(), "ghost")
            .await
            .expect_err("unknown");
        assert_eq!(err.to_string(), "peer not found: ghost");
    }

    #[tokio::test]
    async fn list_shows_names_and_addresses() {
        let dir = TempDir::new().expect("tempdir");
        let settings = settings(&dir);
        let command = PeerCommand::new(&settings);
        for name in ["a", "b", "c"] {
            let mut no_qr = args(name);
            no_qr.no_qr = true;
            command
                .add(&mut Vec::new(), &OutputFormat::default(), &no_qr)
                .await
                .expect("add");
        }
        command
            .remove(&mut Vec::new(), &OutputFormat::default(), "b")
            .await
            .expect("remove");

        let mut out = Vec::new();
        command
            .list(&mut out, &OutputFormat::new(Format::Json))
            .expect("list");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        let peers = value["peers"].as_array().expect("array");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0]["name"], "a");
        assert_eq!(peers[1]["ipv4"], "10.8.0.4");
    }
}
