//! Gateway status command.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::Write;
use std::process::Stdio;

use chrono::{DateTime, TimeZone, Utc};
use tokio::process::Command;
use tracing::{debug, warn};
use wayfarer_wireguard::{
    ConnectionState, RegistryDocument, WgCommand, WireGuardInterface, parse_wg_dump,
};

use crate::error::CliError;
use crate::output::{GatewayStatus, OutputFormat, PeerStatusRow};
use crate::settings::Settings;

/// Where `status` reads the running gateway from.
pub trait GatewaySource: Send + Sync {
    /// Service manager state of the VPN unit, such as `active` or `failed`.
    fn service_state(&self, interface: &str) -> impl Future<Output = String> + Send;

    /// `wg show <interface> dump` output.
    fn dump(&self, interface: &str) -> impl Future<Output = wayfarer_wireguard::Result<String>> + Send;
}

/// The local systemd unit `wg-quick@<interface>` and the `wg` tool.
#[derive(Debug, Clone, Default)]
pub struct SystemGateway {
    wg: WgCommand,
}

impl GatewaySource for SystemGateway {
    async fn service_state(&self, interface: &str) -> String {
        let unit = format!("wg-quick@{interface}");
        let output = Command::new("systemctl")
            .args(["is-active", &unit])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;
        match output {
            // is-active exits non-zero for inactive units but still prints the state.
            Ok(output) => {
                let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if state.is_empty() {
                    "unknown".to_string()
                } else {
                    state
                }
            }
            Err(e) => {
                debug!(unit = %unit, error = %e, "systemctl unavailable");
                "unknown".to_string()
            }
        }
    }

    async fn dump(&self, interface: &str) -> wayfarer_wireguard::Result<String> {
        self.wg.dump(interface).await
    }
}

/// Handler for `status`.
pub struct StatusCommand<'a> {
    settings: &'a Settings,
}

impl<'a> StatusCommand<'a> {
    /// Creates a new status command handler.
    #[must_use]
    pub const fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Prints the service state and the connected peers.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the output fails.
    pub async fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        self.execute_with(out, format, &SystemGateway::default(), Utc::now())
            .await
    }

    async fn execute_with<W: Write, G: GatewaySource>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        source: &G,
        now: DateTime<Utc>,
    ) -> Result<(), CliError> {
        let interface = &self.settings.interface;
        let service = source.service_state(interface).await;

        let names = self.peer_names();
        let now_secs = u64::try_from(now.timestamp()).unwrap_or(0);
        let running = match source.dump(interface).await {
            Ok(text) => match parse_wg_dump(&text, now_secs) {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(interface = %interface, error = %e, "unreadable interface dump");
                    None
                }
            },
            Err(e) => {
                warn!(interface = %interface, error = %e, "interface is not running");
                None
            }
        };

        let (listen_port, peers) = match running {
            Some(status) => {
                let peers = status
                    .peers
                    .into_iter()
                    .map(|peer| PeerStatusRow {
                        name: names.get(&peer.public_key.to_base64()).cloned(),
                        latest_handshake: peer
                            .latest_handshake
                            .and_then(|secs| i64::try_from(secs).ok())
                            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
                        public_key: peer.public_key,
                        endpoint: peer.endpoint,
                        state: peer.state,
                        rx_bytes: peer.rx_bytes,
                        tx_bytes: peer.tx_bytes,
                    })
                    .collect();
                (Some(status.listen_port), peers)
            }
            None => (None, Vec::new()),
        };

        let report = GatewayStatus {
            interface: interface.clone(),
            service,
            listen_port,
            connected: peers
                .iter()
                .filter(|p| p.state == ConnectionState::Connected)
                .count(),
            peers,
            now,
        };
        format.write(out, &report)
    }

    fn peer_names(&self) -> HashMap<String, String> {
        match fs::read_to_string(&self.settings.registry_path) {
            Ok(text) => RegistryDocument::parse(&text)
                .peers()
                .into_iter()
                .filter_map(|peer| peer.name.map(|name| (peer.public_key.to_base64(), name)))
                .collect(),
            Err(e) => {
                debug!(path = %self.settings.registry_path.display(), error = %e, "registry unreadable");
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;
    use tempfile::TempDir;
    use wayfarer_wireguard::WireGuardError;

    const GATEWAY: &str = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=";
    const ALICE: &str = "AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgI=";
    const BOB: &str = "AwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwM=";

    struct FakeGateway {
        service: &'static str,
        dump: Option<String>,
    }

    impl GatewaySource for FakeGateway {
        async fn service_state(&self, _interface: &str) -> String {
            self.service.to_string()
        }

        async fn dump(&self, interface: &str) -> wayfarer_wireguard::Result<String> {
            self.dump.clone().ok_or_else(|| WireGuardError::CommandFailed {
                command: format!("wg show {interface} dump"),
                exit_code: 1,
                stderr: "Unable to access interface: No such device".into(),
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("time")
    }

    fn settings(dir: &TempDir) -> Settings {
        let path = dir.path().join("wg0.conf");
        fs::write(
            &path,
            format!(
                "[Interface]\nPrivateKey = {GATEWAY}\nListenPort = 51820\n\n\
                 [Peer]\n# Name = alice\nPublicKey = {ALICE}\nAllowedIPs = 10.8.0.2/32\n"
            ),
        )
        .expect("registry");
        Settings {
            registry_path: path,
            ..Settings::default()
        }
    }

    fn dump() -> String {
        format!(
            "{GATEWAY}\t{GATEWAY}\t51820\toff\n\
             {ALICE}\t(none)\t203.0.113.7:40000\t10.8.0.2/32\t1699999970\t4096\t2048\t25\n\
             {BOB}\t(none)\t(none)\t10.8.0.3/32\t0\t0\t0\toff\n"
        )
    }

    #[tokio::test]
    async fn names_connected_peers_from_registry() {
        let dir = TempDir::new().expect("tempdir");
        let settings = settings(&dir);
        let source = FakeGateway {
            service: "active",
            dump: Some(dump()),
        };
        let mut out = Vec::new();
        StatusCommand::new(&settings)
            .execute_with(&mut out, &OutputFormat::new(Format::Json), &source, now())
            .await
            .expect("status");

        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["service"], "active");
        assert_eq!(value["listen_port"], 51820);
        assert_eq!(value["connected"], 1);
        assert_eq!(value["peers"][0]["name"], "alice");
        assert_eq!(value["peers"][0]["state"], serde_json::json!(ConnectionState::Connected));
        assert!(value["peers"][1]["name"].is_null());
        assert!(value["peers"][1]["latest_handshake"].is_null());
    }

    #[tokio::test]
    async fn stopped_interface_reports_no_peers() {
        let dir = TempDir::new().expect("tempdir");
        let settings = settings(&dir);
        let source = FakeGateway {
            service: "inactive",
            dump: None,
        };
        let mut out = Vec::new();
        StatusCommand::new(&settings)
            .execute_with(&mut out, &OutputFormat::default(), &source, now())
            .await
            .expect("status");
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.contains("Service:      inactive"));
        assert!(out.contains("Connected:    0/0"));
    }
}
