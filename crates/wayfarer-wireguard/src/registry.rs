//! The gateway's peer registry.
//!
//! The registry is the gateway's own `wg-quick` configuration file: one
//! `[Interface]` block followed by one `[Peer]` block per client. It is parsed
//! into a list of blocks that keep their raw lines, so rewriting the file after
//! adding or removing a peer leaves every other block byte-for-byte intact.
//!
//! ```text
//! [Interface]
//! PrivateKey = <gateway key>
//! ListenPort = 51820
//! Address = 10.8.0.1/24, fd42:42:42::1/64
//!
//! [Peer]
//! # Name = alice
//! PublicKey = <alice's key>
//! AllowedIPs = 10.8.0.2/32, fd42:42:42::2/128
//! ```
//!
//! A block spans from its `[Section]` header to the line before the next header
//! (or end of file). A peer's human-readable name is kept in a `# Name =`
//! comment, which the tunnel daemon ignores.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::error::{Result, WireGuardError};
use crate::keys::{PrivateKey, PublicKey};
use crate::types::{AddressFamily, AllowedIp};

const NAME_KEY: &str = "Name";

/// The section type of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// The gateway's own `[Interface]` block.
    Interface,
    /// A `[Peer]` block.
    Peer,
    /// Any other section, retained verbatim.
    Other(String),
}

impl BlockKind {
    fn from_section(name: &str) -> Self {
        match name.trim() {
            "Interface" => Self::Interface,
            "Peer" => Self::Peer,
            other => Self::Other(other.to_string()),
        }
    }
}

fn section_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
        return None;
    }
    trimmed
        .split_once('=')
        .map(|(key, value)| (key.trim(), value.trim()))
}

fn name_comment(line: &str) -> Option<&str> {
    let body = line.trim().strip_prefix('#')?;
    let (key, value) = body.split_once('=')?;
    key.trim()
        .eq_ignore_ascii_case(NAME_KEY)
        .then(|| value.trim())
        .filter(|value| !value.is_empty())
}

/// One `[Section]` block with its raw lines (line terminators included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    kind: BlockKind,
    lines: Vec<String>,
    first_line: usize,
}

impl Block {
    /// Returns the block's section type.
    #[must_use]
    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    /// 1-based line number of the block's header in the parsed text (0 for new blocks).
    #[must_use]
    pub fn first_line(&self) -> usize {
        self.first_line
    }

    /// Returns the first value for `key` (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values(key).next()
    }

    /// Returns every value for `key` (case-insensitive), in file order.
    pub fn values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        self.lines
            .iter()
            .skip(1)
            .filter_map(|line| key_value(line))
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Returns the `# Name =` annotation, if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.lines.iter().skip(1).find_map(|line| name_comment(line))
    }

    fn render_into(&self, out: &mut String) {
        for line in &self.lines {
            out.push_str(line);
        }
    }

    fn ends_with_blank_line(&self) -> bool {
        self.lines.last().is_some_and(|line| line.trim().is_empty())
    }
}

/// The registry file as an ordered list of blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDocument {
    preamble: Vec<String>,
    blocks: Vec<Block>,
}

impl RegistryDocument {
    /// Parses registry text. Parsing never fails; typed views report bad blocks.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut document = Self::default();
        for (index, line) in text.split_inclusive('\n').enumerate() {
            if let Some(name) = section_name(line) {
                document.blocks.push(Block {
                    kind: BlockKind::from_section(name),
                    lines: vec![line.to_string()],
                    first_line: index + 1,
                });
            } else if let Some(block) = document.blocks.last_mut() {
                block.lines.push(line.to_string());
            } else {
                document.preamble.push(line.to_string());
            }
        }
        document
    }

    /// Renders the document back to text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
        }
        for block in &self.blocks {
            block.render_into(&mut out);
        }
        out
    }

    /// Returns all blocks in file order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    fn peer_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.kind == BlockKind::Peer)
    }

    /// Returns the typed `[Interface]` block.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no interface block or it is malformed.
    pub fn interface(&self) -> Result<InterfaceRecord> {
        let block = self
            .blocks
            .iter()
            .find(|b| b.kind == BlockKind::Interface)
            .ok_or(WireGuardError::MissingInterface)?;
        InterfaceRecord::from_block(block)
    }

    /// Returns every well-formed peer. Corrupt blocks are skipped with a warning.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.peer_blocks()
            .filter_map(|block| match PeerRecord::from_block(block) {
                Ok(peer) => Some(peer),
                Err(e) => {
                    warn!(error = %e, "skipping corrupt peer block");
                    None
                }
            })
            .collect()
    }

    /// Finds a peer by its `# Name =` annotation.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<PeerRecord> {
        self.peers()
            .into_iter()
            .find(|peer| peer.name.as_deref() == Some(name))
    }

    /// Returns true if any peer block (well-formed or not) carries `name`.
    #[must_use]
    pub fn has_name(&self, name: &str) -> bool {
        self.peer_blocks().any(|block| block.name() == Some(name))
    }

    /// Lists every exact-host address of `family` assigned to any peer.
    ///
    /// Each `AllowedIPs` entry is read on its own, so an unparseable entry or a
    /// bad key in one block only hides that entry, never the rest of the registry.
    #[must_use]
    pub fn list_assigned_addresses(&self, family: AddressFamily) -> Vec<IpAddr> {
        let mut addresses = Vec::new();
        for block in self.peer_blocks() {
            for value in block.values("AllowedIPs") {
                for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                    match AllowedIp::from_cidr(entry) {
                        Ok(ip) => addresses.extend(
                            ip.host_addr().filter(|addr| AddressFamily::of(addr) == family),
                        ),
                        Err(e) => warn!(
                            line = block.first_line,
                            entry,
                            error = %e,
                            "ignoring unparseable AllowedIPs entry"
                        ),
                    }
                }
            }
        }
        addresses
    }

    /// Appends a peer block after the last block.
    pub fn push_peer(&mut self, peer: &PeerRecord) {
        let needs_newline = self
            .blocks
            .last()
            .and_then(|b| b.lines.last())
            .or_else(|| self.preamble.last())
            .is_some_and(|line| !line.ends_with('\n'));
        let needs_separator = match self.blocks.last() {
            Some(block) => !block.ends_with_blank_line(),
            None => false,
        };
        if let Some(last) = self.blocks.last_mut() {
            if needs_newline {
                if let Some(line) = last.lines.last_mut() {
                    line.push('\n');
                }
            }
            if needs_separator {
                last.lines.push("\n".to_string());
            }
        } else if needs_newline {
            if let Some(line) = self.preamble.last_mut() {
                line.push('\n');
            }
        }
        self.blocks.push(peer.to_block());
    }

    /// Removes the peer block whose `PublicKey` is `key`, returning it.
    pub fn remove_peer(&mut self, key: &PublicKey) -> Option<Block> {
        let index = self.blocks.iter().position(|block| {
            block.kind == BlockKind::Peer
                && block
                    .get("PublicKey")
                    .and_then(|value| PublicKey::from_base64(value).ok())
                    .is_some_and(|k| &k == key)
        })?;
        Some(self.blocks.remove(index))
    }

    /// Removes the first peer block annotated with `name`, well-formed or not.
    pub fn remove_named(&mut self, name: &str) -> Option<Block> {
        let index = self
            .blocks
            .iter()
            .position(|block| block.kind == BlockKind::Peer && block.name() == Some(name))?;
        Some(self.blocks.remove(index))
    }

    fn push_block(&mut self, block: Block) {
        self.blocks.push(block);
    }
}

/// Typed view of the `[Interface]` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    /// The gateway's private key.
    pub private_key: PrivateKey,
    /// UDP port the gateway listens on.
    pub listen_port: Option<u16>,
    /// The gateway's own tunnel addresses, with pool prefix lengths.
    pub addresses: Vec<AllowedIp>,
}

impl InterfaceRecord {
    /// Creates an interface record.
    #[must_use]
    pub fn new(private_key: PrivateKey) -> Self {
        Self {
            private_key,
            listen_port: None,
            addresses: Vec::new(),
        }
    }

    /// Sets the listen port.
    #[must_use]
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// Adds an address.
    #[must_use]
    pub fn with_address(mut self, address: AllowedIp) -> Self {
        self.addresses.push(address);
        self
    }

    /// The gateway's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    /// Reads an `[Interface]` block.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::RegistryCorrupt`] for a missing or invalid field.
    pub fn from_block(block: &Block) -> Result<Self> {
        let corrupt = |message: String| WireGuardError::RegistryCorrupt {
            line: block.first_line,
            message,
        };

        let private_key = block
            .get("PrivateKey")
            .ok_or_else(|| corrupt("missing PrivateKey".to_string()))
            .and_then(|v| {
                PrivateKey::from_base64(v).map_err(|e| corrupt(format!("invalid PrivateKey: {e}")))
            })?;

        let listen_port = block
            .get("ListenPort")
            .map(|v| {
                v.parse::<u16>()
                    .map_err(|_| corrupt(format!("invalid ListenPort: {v}")))
            })
            .transpose()?;

        let mut addresses = Vec::new();
        for value in block.values("Address") {
            addresses.extend(
                AllowedIp::parse_list(value).map_err(|e| corrupt(format!("invalid Address: {e}")))?,
            );
        }

        Ok(Self {
            private_key,
            listen_port,
            addresses,
        })
    }

    /// Renders the record as a fresh block.
    #[must_use]
    pub fn to_block(&self) -> Block {
        let mut lines = vec![
            "[Interface]\n".to_string(),
            format!("PrivateKey = {}\n", self.private_key.to_base64()),
        ];
        if let Some(port) = self.listen_port {
            lines.push(format!("ListenPort = {port}\n"));
        }
        if !self.addresses.is_empty() {
            let addrs: Vec<String> = self.addresses.iter().map(AllowedIp::to_cidr).collect();
            lines.push(format!("Address = {}\n", addrs.join(", ")));
        }
        Block {
            kind: BlockKind::Interface,
            lines,
            first_line: 0,
        }
    }
}

/// Typed view of a `[Peer]` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Human-readable name, unique within the gateway.
    pub name: Option<String>,
    /// The peer's public key; the canonical identifier in the registry.
    pub public_key: PublicKey,
    /// Routing scope; exact-host entries are the peer's tunnel addresses.
    pub allowed_ips: Vec<AllowedIp>,
}

impl PeerRecord {
    /// Creates a named peer record.
    #[must_use]
    pub fn new(name: impl Into<String>, public_key: PublicKey, allowed_ips: Vec<AllowedIp>) -> Self {
        Self {
            name: Some(name.into()),
            public_key,
            allowed_ips,
        }
    }

    /// Returns the peer's assigned address in `family`, if any.
    #[must_use]
    pub fn address(&self, family: AddressFamily) -> Option<IpAddr> {
        self.allowed_ips
            .iter()
            .filter_map(AllowedIp::host_addr)
            .find(|addr| AddressFamily::of(addr) == family)
    }

    /// Reads a `[Peer]` block.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::RegistryCorrupt`] for a missing key or bad routing entry.
    pub fn from_block(block: &Block) -> Result<Self> {
        let corrupt = |message: String| WireGuardError::RegistryCorrupt {
            line: block.first_line,
            message,
        };

        let public_key = block
            .get("PublicKey")
            .ok_or_else(|| corrupt("missing PublicKey".to_string()))
            .and_then(|v| {
                PublicKey::from_base64(v).map_err(|e| corrupt(format!("invalid PublicKey: {e}")))
            })?;

        let mut allowed_ips = Vec::new();
        for value in block.values("AllowedIPs") {
            allowed_ips.extend(
                AllowedIp::parse_list(value)
                    .map_err(|e| corrupt(format!("invalid AllowedIPs: {e}")))?,
            );
        }

        Ok(Self {
            name: block.name().map(ToString::to_string),
            public_key,
            allowed_ips,
        })
    }

    /// Renders the record as a fresh block.
    #[must_use]
    pub fn to_block(&self) -> Block {
        let mut lines = vec!["[Peer]\n".to_string()];
        if let Some(name) = &self.name {
            lines.push(format!("# {NAME_KEY} = {name}\n"));
        }
        lines.push(format!("PublicKey = {}\n", self.public_key.to_base64()));
        if !self.allowed_ips.is_empty() {
            let ips: Vec<String> = self.allowed_ips.iter().map(AllowedIp::to_cidr).collect();
            lines.push(format!("AllowedIPs = {}\n", ips.join(", ")));
        }
        Block {
            kind: BlockKind::Peer,
            lines,
            first_line: 0,
        }
    }
}

/// Exclusive advisory lock held for the lifetime of a [`PeerRegistry`].
#[derive(Debug)]
struct RegistryLock {
    file: File,
}

impl RegistryLock {
    fn acquire(registry_path: &Path) -> Result<Self> {
        let mut name = registry_path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".lock");
        let lock_path = registry_path.with_file_name(name);

        let lock_err = |message: String| WireGuardError::Lock {
            path: lock_path.clone(),
            message,
        };

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| lock_err(format!("failed to open lock file: {e}")))?;

        if file.try_lock_exclusive().is_err() {
            info!(path = %lock_path.display(), "registry is locked by another writer, waiting");
            file.lock_exclusive()
                .map_err(|e| lock_err(format!("failed to acquire exclusive lock: {e}")))?;
        }
        Ok(Self { file })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// The durable peer registry of one gateway.
///
/// Holding a `PeerRegistry` means holding the registry's single-writer lock.
/// Every mutation renders the whole document to a temporary file next to the
/// artifact and renames it into place; the in-memory copy only changes once
/// that rename has succeeded.
#[derive(Debug)]
pub struct PeerRegistry {
    path: PathBuf,
    document: RegistryDocument,
    _lock: RegistryLock,
}

impl PeerRegistry {
    /// Opens an existing registry, waiting for the single-writer lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or the file cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = RegistryLock::acquire(&path)?;
        let text = fs::read_to_string(&path)?;
        let document = RegistryDocument::parse(&text);
        debug!(path = %path.display(), blocks = document.blocks.len(), "opened peer registry");
        Ok(Self {
            path,
            document,
            _lock: lock,
        })
    }

    /// Creates a new registry containing only the gateway's interface block.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::RegistryExists`] if the artifact is already present.
    pub fn create(path: impl AsRef<Path>, interface: &InterfaceRecord) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock = RegistryLock::acquire(&path)?;
        if path.exists() {
            return Err(WireGuardError::RegistryExists(path));
        }

        let mut document = RegistryDocument::default();
        document.push_block(interface.to_block());
        let mut registry = Self {
            path,
            document: RegistryDocument::default(),
            _lock: lock,
        };
        registry.commit(document)?;
        info!(path = %registry.path.display(), "created peer registry");
        Ok(registry)
    }

    /// Path of the registry artifact.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parsed registry document.
    #[must_use]
    pub fn document(&self) -> &RegistryDocument {
        &self.document
    }

    /// The gateway's interface block.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface block is missing or malformed.
    pub fn interface(&self) -> Result<InterfaceRecord> {
        self.document.interface()
    }

    /// The gateway public key, derived from the interface private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface block is missing or malformed.
    pub fn gateway_public_key(&self) -> Result<PublicKey> {
        self.interface().map(|i| i.public_key())
    }

    /// The gateway listen port, if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface block is missing or malformed.
    pub fn listen_port(&self) -> Result<Option<u16>> {
        self.interface().map(|i| i.listen_port)
    }

    /// Every well-formed peer.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.document.peers()
    }

    /// Finds a peer by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<PeerRecord> {
        self.document.find_by_name(name)
    }

    /// Lists assigned addresses of one family across all peers.
    #[must_use]
    pub fn list_assigned_addresses(&self, family: AddressFamily) -> Vec<IpAddr> {
        self.document.list_assigned_addresses(family)
    }

    /// Appends a peer block and persists the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be written; the artifact is then unchanged.
    pub fn add_peer_block(&mut self, peer: &PeerRecord) -> Result<()> {
        let mut next = self.document.clone();
        next.push_peer(peer);
        self.commit(next)?;
        info!(
            peer = peer.name.as_deref().unwrap_or("-"),
            key = %peer.public_key,
            "added peer block"
        );
        Ok(())
    }

    /// Removes the peer block whose key is `key` and persists the registry.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::PeerNotFound`] (artifact untouched) if no block matches.
    pub fn remove_peer_block(&mut self, key: &PublicKey) -> Result<()> {
        let mut next = self.document.clone();
        if next.remove_peer(key).is_none() {
            return Err(WireGuardError::PeerNotFound(key.to_base64()));
        }
        self.commit(next)?;
        info!(key = %key, "removed peer block");
        Ok(())
    }

    /// Removes the peer block annotated with `name` and persists the registry.
    /// Matches corrupt blocks too, so they can be cleared by name.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::PeerNotFound`] (artifact untouched) if no block matches.
    pub fn remove_named_block(&mut self, name: &str) -> Result<Block> {
        let mut next = self.document.clone();
        let block = next
            .remove_named(name)
            .ok_or_else(|| WireGuardError::PeerNotFound(name.to_string()))?;
        self.commit(next)?;
        info!(peer = name, line = block.first_line(), "removed peer block by name");
        Ok(block)
    }

    fn commit(&mut self, next: RegistryDocument) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".wayfarer-registry-")
            .tempfile_in(dir)?;
        tmp.write_all(next.render().as_bytes())?;
        tmp.as_file().sync_all()?;

        // New temp files are owner-only; an existing artifact keeps its mode.
        if let Ok(meta) = fs::metadata(&self.path) {
            fs::set_permissions(tmp.path(), meta.permissions())?;
        }

        tmp.persist(&self.path).map_err(|e| WireGuardError::Io(e.error))?;
        self.document = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;

    const SAMPLE: &str = "\
# managed by wayfarer
[Interface]
PrivateKey = AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=
ListenPort = 51820
Address = 10.8.0.1/24
PostUp = iptables -A FORWARD -i %i -j ACCEPT

[Peer]
# Name = alice
PublicKey = AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgI=
AllowedIPs = 10.8.0.2/32

[Peer]
# Name = bob
PublicKey=AwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwM=
AllowedIPs = 10.8.0.3/32, fd42:42:42::3/128
";

    fn key(byte: u8) -> PublicKey {
        PublicKey::from_bytes_array([byte; 32])
    }

    #[test]
    fn parse_render_is_lossless() {
        let doc = RegistryDocument::parse(SAMPLE);
        assert_eq!(doc.render(), SAMPLE);
        assert_eq!(doc.blocks().len(), 3);
    }

    #[test]
    fn parse_render_keeps_missing_trailing_newline() {
        let text = SAMPLE.trim_end();
        assert_eq!(RegistryDocument::parse(text).render(), text);
    }

    #[test]
    fn typed_views() {
        let doc = RegistryDocument::parse(SAMPLE);
        let interface = doc.interface().expect("interface");
        assert_eq!(interface.listen_port, Some(51820));
        assert_eq!(interface.addresses[0].to_cidr(), "10.8.0.1/24");

        let peers = doc.peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].name.as_deref(), Some("alice"));
        assert_eq!(peers[1].public_key, key(3));
        assert_eq!(
            peers[1].address(AddressFamily::V6),
            Some("fd42:42:42::3".parse().expect("ip"))
        );
    }

    #[test]
    fn list_assigned_addresses_by_family() {
        let doc = RegistryDocument::parse(SAMPLE);
        let v4: Vec<String> = doc
            .list_assigned_addresses(AddressFamily::V4)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(v4, vec!["10.8.0.2", "10.8.0.3"]);
        assert_eq!(doc.list_assigned_addresses(AddressFamily::V6).len(), 1);
    }

    #[test]
    fn corrupt_block_is_skipped_not_fatal() {
        let text = format!(
            "{SAMPLE}\n[Peer]\n# Name = broken\nAllowedIPs = 10.8.0.9/32, nonsense\n"
        );
        let doc = RegistryDocument::parse(&text);
        assert_eq!(doc.peers().len(), 2);
        let v4 = doc.list_assigned_addresses(AddressFamily::V4);
        assert_eq!(v4.len(), 3, "valid entries of a corrupt block still count");
        assert!(doc.has_name("broken"));
        assert!(doc.find_by_name("broken").is_none());
    }

    #[test]
    fn corrupt_block_is_removable_by_name() {
        let text = format!("{SAMPLE}\n[Peer]\n# Name = broken\nAllowedIPs = 10.8.0.9/32\n");
        let mut doc = RegistryDocument::parse(&text);
        let removed = doc.remove_named("broken").expect("broken present");
        assert_eq!(removed.get("AllowedIPs"), Some("10.8.0.9/32"));
        assert!(!doc.has_name("broken"));
        assert_eq!(doc.peers().len(), 2);
        assert!(doc.remove_named("broken").is_none());
    }

    #[test]
    fn corrupt_block_reports_line() {
        let doc = RegistryDocument::parse("[Peer]\nAllowedIPs = 10.8.0.2/32\n");
        let err = PeerRecord::from_block(&doc.blocks()[0]).expect_err("missing key");
        assert!(matches!(err, WireGuardError::RegistryCorrupt { line: 1, .. }));
    }

    #[test]
    fn remove_excises_exactly_one_block() {
        let mut doc = RegistryDocument::parse(SAMPLE);
        let removed = doc.remove_peer(&key(2)).expect("alice present");
        assert_eq!(removed.name(), Some("alice"));
        let expected = SAMPLE.replace(
            "[Peer]\n# Name = alice\nPublicKey = AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgI=\nAllowedIPs = 10.8.0.2/32\n\n",
            "",
        );
        assert_eq!(doc.render(), expected);
    }

    #[test]
    fn remove_last_block_runs_to_end_of_file() {
        let mut doc = RegistryDocument::parse(SAMPLE);
        assert!(doc.remove_peer(&key(3)).is_some());
        assert!(doc.render().ends_with("AllowedIPs = 10.8.0.2/32\n\n"));
        assert!(!doc.render().contains("bob"));
    }

    #[test]
    fn remove_unknown_key_is_none() {
        let mut doc = RegistryDocument::parse(SAMPLE);
        assert!(doc.remove_peer(&key(9)).is_none());
        assert_eq!(doc.render(), SAMPLE);
    }

    #[test]
    fn push_peer_separates_blocks() {
        let mut doc = RegistryDocument::parse(SAMPLE.trim_end());
        let peer = PeerRecord::new("carol", key(4), vec![AllowedIp::from_cidr("10.8.0.4/32").expect("cidr")]);
        doc.push_peer(&peer);
        let rendered = doc.render();
        assert!(rendered.contains("fd42:42:42::3/128\n\n[Peer]\n# Name = carol\n"));

        let reparsed = RegistryDocument::parse(&rendered);
        assert_eq!(reparsed.find_by_name("carol").expect("carol"), peer);
    }

    #[test]
    fn registry_create_open_add_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wg0.conf");
        let (private, _) = generate_keypair();
        let interface = InterfaceRecord::new(private)
            .with_listen_port(51820)
            .with_address(AllowedIp::from_cidr("10.8.0.1/24").expect("cidr"));

        {
            let registry = PeerRegistry::create(&path, &interface).expect("create");
            assert_eq!(registry.interface().expect("interface"), interface);
        }
        assert!(matches!(
            PeerRegistry::create(&path, &interface),
            Err(WireGuardError::RegistryExists(_))
        ));

        let mut registry = PeerRegistry::open(&path).expect("open");
        let (_, alice) = generate_keypair();
        let peer = PeerRecord::new("alice", alice, vec![AllowedIp::from_cidr("10.8.0.2/32").expect("cidr")]);
        registry.add_peer_block(&peer).expect("add");
        assert_eq!(fs::read_to_string(&path).expect("read"), registry.document().render());

        registry.remove_peer_block(&alice).expect("remove");
        let after_first = fs::read(&path).expect("read");
        let err = registry.remove_peer_block(&alice).expect_err("already removed");
        assert!(matches!(err, WireGuardError::PeerNotFound(_)));
        assert_eq!(fs::read(&path).expect("read"), after_first);
    }

    #[cfg(unix)]
    #[test]
    fn commit_preserves_artifact_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wg0.conf");
        fs::write(&path, SAMPLE).expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).expect("chmod");

        let mut registry = PeerRegistry::open(&path).expect("open");
        registry.remove_peer_block(&key(2)).expect("remove");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}
