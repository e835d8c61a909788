//! Gateway settings.
//!
//! Layered with `figment`: built-in defaults, then a TOML file, then
//! `WAYFARER_`-prefixed environment variables. Nested keys use a double
//! underscore, e.g. `WAYFARER_IPV6__ENABLED=true`.
//!
//! ```toml
//! rendezvous = "eu-west-1.vpn.example.com"
//! region_rendezvous = "{region}.vpn.example.com"
//! vpn_port = 51820
//! dns = ["1.1.1.1"]
//!
//! [ipv4]
//! prefix = "10.8.0.0/24"
//! start = 2
//! end = 254
//!
//! [ipv6]
//! enabled = true
//!
//! [hooks]
//! fleet_state = "/usr/local/bin/wayfarer-fleet-state"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use wayfarer_fleet::{
    CommandFleetState, CommandPublisher, CommandResolver, DEFAULT_TTL_SECS, FleetError,
    DEFAULT_HOOK_TIMEOUT, HookCommand, NetworkProbe, ProbeTransport, ReconcilerConfig, RetryPolicy,
};
use wayfarer_wireguard::{
    AddressAllocator, AddressFamily, AddressPool, DEFAULT_KEEPALIVE_SECS, Endpoint, ManagerConfig,
};

use crate::error::CliError;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wayfarer/wayfarer.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "WAYFARER_";

/// Placeholder replaced by the queried region in `region_rendezvous`.
pub const REGION_PLACEHOLDER: &str = "{region}";

/// One address family's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Whether peers receive an address in this family.
    pub enabled: bool,
    /// Base prefix of the pool.
    pub prefix: String,
    /// First allocatable offset.
    pub start: u64,
    /// Last allocatable offset.
    pub end: u64,
}

impl PoolSettings {
    fn pool(&self) -> Result<Option<AddressPool>, CliError> {
        if !self.enabled {
            return Ok(None);
        }
        let pool = AddressPool::parse(&self.prefix, u128::from(self.start), u128::from(self.end))?;
        Ok(Some(pool))
    }
}

/// External hook commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSettings {
    /// Prints an instance's public addresses as JSON.
    pub resolve_instance: Option<String>,
    /// Upserts one rendezvous record.
    pub publish_record: Option<String>,
    /// Prints a region's deployment state as JSON.
    pub fleet_state: Option<String>,
}

impl HookSettings {
    fn hook(
        value: Option<&String>,
        key: &'static str,
        timeout: Duration,
    ) -> Result<HookCommand, CliError> {
        let line = value.ok_or(FleetError::NotConfigured(key))?;
        Ok(HookCommand::parse(line)?.with_timeout(timeout))
    }
}

/// Everything the operator commands read from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Name of the `WireGuard` interface.
    pub interface: String,
    /// The registry artifact (the interface's `wg-quick` config).
    pub registry_path: PathBuf,
    /// Where per-peer client configs are stored.
    pub clients_dir: Option<PathBuf>,
    /// This gateway's rendezvous name or address. Client configs point at it
    /// and `reconcile` publishes it.
    pub rendezvous: Option<String>,
    /// Host probed by `region-status`; `{region}` is replaced by the queried
    /// region. Defaults to `rendezvous`.
    pub region_rendezvous: Option<String>,
    /// VPN listen port.
    pub vpn_port: u16,
    /// Resolvers written into client configs.
    pub dns: Vec<String>,
    /// Client keepalive interval in seconds; zero disables it.
    pub keepalive: u16,
    /// Push peer changes to the running interface.
    pub apply_live: bool,
    /// IPv4 pool.
    pub ipv4: PoolSettings,
    /// IPv6 pool.
    pub ipv6: PoolSettings,
    /// Rendezvous record time to live in seconds.
    pub ttl: u32,
    /// How long to wait for a new instance's addresses, in seconds.
    pub resolve_timeout: u64,
    /// Reachability probe timeout in seconds.
    pub probe_timeout: u64,
    /// Reachability probe transport.
    pub probe_transport: ProbeTransport,
    /// Bound on a single hook run in seconds.
    pub hook_timeout: u64,
    /// Require an IPv4 rendezvous record; defaults to whether the IPv4 pool is enabled.
    pub require_ipv4: Option<bool>,
    /// Require an IPv6 rendezvous record; defaults to whether the IPv6 pool is enabled.
    pub require_ipv6: Option<bool>,
    /// External hook commands.
    pub hooks: HookSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: "wg0".to_string(),
            registry_path: PathBuf::from("/etc/wireguard/wg0.conf"),
            clients_dir: Some(PathBuf::from("/etc/wireguard/clients")),
            rendezvous: None,
            region_rendezvous: None,
            vpn_port: 51820,
            dns: Vec::new(),
            keepalive: DEFAULT_KEEPALIVE_SECS,
            apply_live: true,
            ipv4: PoolSettings {
                enabled: true,
                prefix: "10.8.0.0/24".to_string(),
                start: 2,
                end: 254,
            },
            ipv6: PoolSettings {
                enabled: false,
                prefix: "fd42:42:42::/64".to_string(),
                start: 2,
                end: 65534,
            },
            ttl: DEFAULT_TTL_SECS,
            resolve_timeout: 120,
            probe_timeout: 3,
            probe_transport: ProbeTransport::Tcp,
            hook_timeout: DEFAULT_HOOK_TIMEOUT.as_secs(),
            require_ipv4: None,
            require_ipv6: None,
            hooks: HookSettings::default(),
        }
    }
}

impl Settings {
    /// Loads and validates settings.
    ///
    /// An explicit `path` must exist; the default path is optional.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Config`] if a source cannot be read or the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let file = match path {
            Some(path) if !path.exists() => {
                return Err(CliError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_PATH),
        };

        let settings: Self = Self::figment(&file)
            .extract()
            .map_err(|e| CliError::Config(format!("failed to load configuration: {e}")))?;
        settings.validate()?;
        tracing::debug!(config = %file.display(), ?settings, "loaded settings");
        Ok(settings)
    }

    fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Checks that the settings describe a usable gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if no family is enabled, a pool is invalid, or
    /// `rendezvous` contains the region placeholder.
    pub fn validate(&self) -> Result<(), CliError> {
        self.allocator()?;
        if self.interface.trim().is_empty() {
            return Err(CliError::Config("interface must not be empty".to_string()));
        }
        if self.rendezvous.is_some() {
            self.rendezvous()?;
        }
        Ok(())
    }

    /// Builds the allocator over the enabled pools.
    ///
    /// # Errors
    ///
    /// Returns an error if no family is enabled or a pool is invalid.
    pub fn allocator(&self) -> Result<AddressAllocator, CliError> {
        Ok(AddressAllocator::new(self.ipv4.pool()?, self.ipv6.pool()?)?)
    }

    /// The rendezvous endpoint written into client configs.
    ///
    /// # Errors
    ///
    /// Returns an error if no rendezvous is configured.
    pub fn endpoint(&self) -> Result<Endpoint, CliError> {
        Ok(Endpoint::new(self.rendezvous()?, self.vpn_port)?)
    }

    fn rendezvous(&self) -> Result<&str, CliError> {
        let name = self.rendezvous.as_deref().ok_or_else(|| {
            CliError::Config(format!(
                "rendezvous is not set; add it to the config file or set {ENV_PREFIX}RENDEZVOUS"
            ))
        })?;
        if name.contains(REGION_PLACEHOLDER) {
            return Err(CliError::Config(format!(
                "rendezvous must name this gateway; put the {REGION_PLACEHOLDER} pattern in region_rendezvous"
            )));
        }
        Ok(name)
    }

    /// Settings for the peer manager.
    ///
    /// # Errors
    ///
    /// Returns an error if no rendezvous is configured.
    pub fn manager_config(&self) -> Result<ManagerConfig, CliError> {
        let mut config = ManagerConfig::new(&self.interface, self.endpoint()?)
            .with_keepalive(self.keepalive)
            .with_apply_live(self.apply_live);
        if let Some(dir) = &self.clients_dir {
            config = config.with_clients_dir(dir);
        }
        for dns in &self.dns {
            config = config.with_dns(dns);
        }
        Ok(config)
    }

    /// Families the rendezvous name must carry.
    #[must_use]
    pub fn required_families(&self) -> Vec<AddressFamily> {
        let v4 = self.require_ipv4.unwrap_or(self.ipv4.enabled);
        let v6 = self.require_ipv6.unwrap_or(self.ipv6.enabled);
        AddressFamily::ALL
            .into_iter()
            .zip([v4, v6])
            .filter_map(|(family, required)| required.then_some(family))
            .collect()
    }

    /// Settings for the endpoint reconciler.
    ///
    /// # Errors
    ///
    /// Returns an error if no rendezvous is configured or no family is required.
    pub fn reconciler_config(&self) -> Result<ReconcilerConfig, CliError> {
        let families = self.required_families();
        if families.is_empty() {
            return Err(CliError::Config(
                "require_ipv4 and require_ipv6 are both false".to_string(),
            ));
        }
        let retry = RetryPolicy::default().with_timeout(Duration::from_secs(self.resolve_timeout));
        Ok(ReconcilerConfig::new(self.rendezvous()?)
            .with_families(families)
            .with_ttl(self.ttl)
            .with_retry(retry))
    }

    /// The rendezvous host pattern probed by `region-status`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `region_rendezvous` nor `rendezvous` is configured.
    pub fn rendezvous_pattern(&self) -> Result<String, CliError> {
        match &self.region_rendezvous {
            Some(pattern) => Ok(pattern.clone()),
            None => self.rendezvous().map(ToString::to_string),
        }
    }

    fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout)
    }

    /// The network reachability probe.
    #[must_use]
    pub fn network_probe(&self) -> NetworkProbe {
        NetworkProbe::new(self.probe_transport, Duration::from_secs(self.probe_timeout))
    }

    /// Instance resolver hook.
    ///
    /// # Errors
    ///
    /// Returns an error if the hook is not configured.
    pub fn resolver(&self) -> Result<CommandResolver, CliError> {
        HookSettings::hook(self.hooks.resolve_instance.as_ref(), "resolve_instance", self.hook_timeout())
            .map(CommandResolver::new)
    }

    /// Rendezvous publisher hook.
    ///
    /// # Errors
    ///
    /// Returns an error if the hook is not configured.
    pub fn publisher(&self) -> Result<CommandPublisher, CliError> {
        HookSettings::hook(self.hooks.publish_record.as_ref(), "publish_record", self.hook_timeout())
            .map(CommandPublisher::new)
    }

    /// Fleet state hook.
    ///
    /// # Errors
    ///
    /// Returns an error if the hook is not configured.
    pub fn fleet_state(&self) -> Result<CommandFleetState, CliError> {
        HookSettings::hook(self.hooks.fleet_state.as_ref(), "fleet_state", self.hook_timeout())
            .map(CommandFleetState::new)
    }
}
