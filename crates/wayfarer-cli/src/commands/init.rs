//! First-boot registry creation.

use std::io::Write;

use tracing::info;
use wayfarer_wireguard::{AllowedIp, InterfaceRecord, PeerRegistry, PrivateKey};

use crate::cli::InitArgs;
use crate::error::CliError;
use crate::output::{InitReport, OutputFormat};
use crate::settings::Settings;

/// Handler for `init`.
pub struct InitCommand<'a> {
    settings: &'a Settings,
}

impl<'a> InitCommand<'a> {
    /// Creates a new init command handler.
    #[must_use]
    pub const fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Creates the registry with the gateway key, listen port and the gateway
    /// address of every enabled pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry already exists or cannot be written.
    pub fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &InitArgs,
    ) -> Result<(), CliError> {
        let private_key = match &args.private_key_file {
            Some(path) => PrivateKey::read_from(path)?,
            None => PrivateKey::generate(),
        };

        let mut interface = InterfaceRecord::new(private_key).with_listen_port(self.settings.vpn_port);
        for pool in self.settings.allocator()?.pools() {
            interface = interface.with_address(pool.gateway_interface_address());
        }

        let registry = PeerRegistry::create(&self.settings.registry_path, &interface)?;
        info!(path = %registry.path().display(), "initialized gateway registry");

        let report = InitReport {
            interface: self.settings.interface.clone(),
            registry_path: registry.path().to_path_buf(),
            public_key: interface.public_key(),
            listen_port: self.settings.vpn_port,
            addresses: interface.addresses.iter().map(AllowedIp::to_cidr).collect(),
        };
        format.write(out, &report)
    }
}
