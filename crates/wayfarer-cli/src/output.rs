//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats. Everything written
//! here goes to stdout; logs go to stderr.

use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use qrcode::QrCode;
use qrcode::render::unicode;
use serde::Serialize;
use wayfarer_fleet::{RegionDeployment, RendezvousRecord};
use wayfarer_wireguard::{ClientMaterial, ConnectionState, PublicKey};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value in human-readable form.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Renders `text` as a terminal QR code.
///
/// # Errors
///
/// Returns an error if the text does not fit in a QR code.
pub fn render_qr(text: &str) -> Result<String, CliError> {
    let code = QrCode::new(text.as_bytes())
        .map_err(|e| CliError::Format(format!("QR encoding failed: {e}")))?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Result of `init`.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    /// Interface name.
    pub interface: String,
    /// Registry artifact path.
    pub registry_path: PathBuf,
    /// Gateway public key.
    pub public_key: PublicKey,
    /// Listen port.
    pub listen_port: u16,
    /// Gateway tunnel addresses.
    pub addresses: Vec<String>,
}

impl TableDisplay for InitReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Created {}", self.registry_path.display())?;
        writeln!(writer, "  Interface:   {}", self.interface)?;
        writeln!(writer, "  Public key:  {}", self.public_key)?;
        writeln!(writer, "  Listen port: {}", self.listen_port)?;
        writeln!(writer, "  Addresses:   {}", self.addresses.join(", "))?;
        Ok(())
    }
}

/// Result of `add-peer`.
#[derive(Debug, Clone, Serialize)]
pub struct PeerAdded {
    /// Connection material.
    #[serde(flatten)]
    pub material: ClientMaterial,
    /// Terminal QR code of the client config.
    #[serde(skip)]
    pub qr: Option<String>,
}

impl TableDisplay for PeerAdded {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        write!(writer, "{}", self.material.config_text)?;
        if let Some(qr) = &self.qr {
            writeln!(writer)?;
            writeln!(writer, "{qr}")?;
        }
        Ok(())
    }
}

/// Result of `remove-peer`.
#[derive(Debug, Clone, Serialize)]
pub struct PeerRemoved {
    /// Peer name.
    pub name: String,
    /// The removed peer's public key, if its block had a readable one.
    pub public_key: Option<PublicKey>,
}

impl TableDisplay for PeerRemoved {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        match &self.public_key {
            Some(key) => writeln!(writer, "Removed peer {} ({key})", self.name)?,
            None => writeln!(writer, "Removed peer {}", self.name)?,
        }
        Ok(())
    }
}

/// One row of `list-peers`.
#[derive(Debug, Clone, Serialize)]
pub struct PeerRow {
    /// Peer name, if recorded.
    pub name: Option<String>,
    /// Public key.
    pub public_key: PublicKey,
    /// Assigned IPv4 address.
    pub ipv4: Option<IpAddr>,
    /// Assigned IPv6 address.
    pub ipv6: Option<IpAddr>,
}

/// Result of `list-peers`.
#[derive(Debug, Clone, Serialize)]
pub struct PeerList {
    /// Peers in registry order.
    pub peers: Vec<PeerRow>,
}

impl TableDisplay for PeerList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.peers.is_empty() {
            writeln!(writer, "No peers")?;
            return Ok(());
        }

        writeln!(
            writer,
            "{:<24}  {:<44}  {:<15}  {}",
            "NAME", "PUBLIC KEY", "IPV4", "IPV6"
        )?;
        writeln!(writer, "{}", "─".repeat(100))?;
        for peer in &self.peers {
            writeln!(
                writer,
                "{:<24}  {:<44}  {:<15}  {}",
                truncate(peer.name.as_deref().unwrap_or("-"), 24),
                peer.public_key,
                opt(peer.ipv4.as_ref()),
                opt(peer.ipv6.as_ref()),
            )?;
        }
        writeln!(writer)?;
        writeln!(writer, "Total: {} peer(s)", self.peers.len())?;
        Ok(())
    }
}

/// One peer of `status`.
#[derive(Debug, Clone, Serialize)]
pub struct PeerStatusRow {
    /// Peer name from the registry, if known.
    pub name: Option<String>,
    /// Public key.
    pub public_key: PublicKey,
    /// Last observed endpoint.
    pub endpoint: Option<String>,
    /// Latest handshake.
    pub latest_handshake: Option<DateTime<Utc>>,
    /// Connection state.
    pub state: ConnectionState,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes sent.
    pub tx_bytes: u64,
}

/// Result of `status`.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    /// Interface name.
    pub interface: String,
    /// Service state as reported by the service manager.
    pub service: String,
    /// Listen port of the running interface.
    pub listen_port: Option<u16>,
    /// Number of connected peers.
    pub connected: usize,
    /// Peers on the running interface.
    pub peers: Vec<PeerStatusRow>,
    /// Time of the query.
    #[serde(skip)]
    pub now: DateTime<Utc>,
}

impl TableDisplay for GatewayStatus {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Gateway {}", self.interface)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Service:      {}", self.service)?;
        if let Some(port) = self.listen_port {
            writeln!(writer, "Listen port:  {port}")?;
        }
        writeln!(writer, "Connected:    {}/{}", self.connected, self.peers.len())?;

        let connected: Vec<&PeerStatusRow> = self
            .peers
            .iter()
            .filter(|p| p.state == ConnectionState::Connected)
            .collect();
        if connected.is_empty() {
            return Ok(());
        }

        writeln!(writer)?;
        writeln!(
            writer,
            "{:<24}  {:<24}  {:<10}  {:>10}  {:>10}",
            "PEER", "ENDPOINT", "HANDSHAKE", "RX", "TX"
        )?;
        for peer in connected {
            let name = peer
                .name
                .clone()
                .unwrap_or_else(|| truncate(&peer.public_key.to_base64(), 12));
            writeln!(
                writer,
                "{:<24}  {:<24}  {:<10}  {:>10}  {:>10}",
                truncate(&name, 24),
                peer.endpoint.as_deref().unwrap_or("-"),
                peer.latest_handshake
                    .map_or_else(|| "never".to_string(), |t| format_ago(self.now, t)),
                format_bytes(peer.rx_bytes),
                format_bytes(peer.tx_bytes),
            )?;
        }
        Ok(())
    }
}

/// Result of `region-status`.
#[derive(Debug, Clone, Serialize)]
pub struct RegionStatus {
    /// Region identifier.
    pub region: String,
    /// Deployment state.
    pub state: RegionDeployment,
}

impl TableDisplay for RegionStatus {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}", self.state)?;
        Ok(())
    }
}

/// Result of `reconcile`.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Instance from the event.
    pub instance_id: String,
    /// Whether the event was acted on.
    pub skipped: bool,
    /// Published records.
    pub records: Vec<RendezvousRecord>,
}

impl TableDisplay for ReconcileReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.skipped {
            writeln!(writer, "Skipped {}: instance failed to launch", self.instance_id)?;
            return Ok(());
        }
        for record in &self.records {
            writeln!(
                writer,
                "{} {} {} ttl={}",
                record.name, record.record_type, record.value, record.ttl
            )?;
        }
        Ok(())
    }
}

fn opt<T: ToString>(value: Option<&T>) -> String {
    value.map_or_else(|| "-".to_string(), ToString::to_string)
}

/// Truncate a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Format a timestamp relative to `now`.
fn format_ago(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86400),
    }
}

/// Format bytes in human-readable units.
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wayfarer_wireguard::generate_keypair;

    fn key() -> PublicKey {
        generate_keypair().1
    }

    #[test]
    fn truncate_long_strings() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-peer-name", 10), "a-very-...");
    }

    #[test]
    fn format_ago_units() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().expect("time");
        assert_eq!(format_ago(now, now - chrono::Duration::seconds(42)), "42s ago");
        assert_eq!(format_ago(now, now - chrono::Duration::minutes(5)), "5m ago");
        assert_eq!(format_ago(now, now - chrono::Duration::hours(3)), "3h ago");
        assert_eq!(format_ago(now, now + chrono::Duration::seconds(5)), "0s ago");
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn peer_list_table_and_json() {
        let list = PeerList {
            peers: vec![PeerRow {
                name: Some("alice".into()),
                public_key: key(),
                ipv4: Some("10.8.0.2".parse().expect("ip")),
                ipv6: None,
            }],
        };
        let mut table = Vec::new();
        OutputFormat::new(Format::Table)
            .write(&mut table, &list)
            .expect("table");
        let table = String::from_utf8(table).expect("utf8");
        assert!(table.contains("alice"));
        assert!(table.contains("10.8.0.2"));
        assert!(table.contains("Total: 1 peer(s)"));

        let mut json = Vec::new();
        OutputFormat::new(Format::Json)
            .write(&mut json, &list)
            .expect("json");
        let value: serde_json::Value = serde_json::from_slice(&json).expect("valid json");
        assert_eq!(value["peers"][0]["ipv4"], "10.8.0.2");
        assert!(value["peers"][0]["ipv6"].is_null());
    }

    #[test]
    fn region_status_prints_bare_state() {
        let status = RegionStatus {
            region: "eu-west-1".into(),
            state: RegionDeployment::Unhealthy,
        };
        let mut out = Vec::new();
        OutputFormat::default().write(&mut out, &status).expect("write");
        assert_eq!(String::from_utf8(out).expect("utf8"), "UNHEALTHY\n");

        let mut out = Vec::new();
        OutputFormat::new(Format::Json)
            .write(&mut out, &status)
            .expect("write");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("valid json");
        assert_eq!(value["state"], "UNHEALTHY");
    }

    #[test]
    fn status_lists_only_connected_peers() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().expect("time");
        let status = GatewayStatus {
            interface: "wg0".into(),
            service: "active".into(),
            listen_port: Some(51820),
            connected: 1,
            peers: vec![
                PeerStatusRow {
                    name: Some("alice".into()),
                    public_key: key(),
                    endpoint: Some("203.0.113.7:40000".into()),
                    latest_handshake: Some(now - chrono::Duration::seconds(30)),
                    state: ConnectionState::Connected,
                    rx_bytes: 2048,
                    tx_bytes: 10,
                },
                PeerStatusRow {
                    name: Some("bob".into()),
                    public_key: key(),
                    endpoint: None,
                    latest_handshake: None,
                    state: ConnectionState::Disconnected,
                    rx_bytes: 0,
                    tx_bytes: 0,
                },
            ],
            now,
        };
        let mut out = Vec::new();
        OutputFormat::default().write(&mut out, &status).expect("write");
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.contains("Service:      active"));
        assert!(out.contains("Connected:    1/2"));
        assert!(out.contains("alice"));
        assert!(out.contains("30s ago"));
        assert!(!out.contains("bob"));
    }

    #[test]
    fn qr_renders_client_config() {
        let qr = render_qr("[Interface]\nPrivateKey = abc\n").expect("qr");
        assert!(qr.lines().count() > 10);
    }
}
