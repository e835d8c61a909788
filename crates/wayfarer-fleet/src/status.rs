//! Region deployment status from cheap signals.
//!
//! The state is derived on every query and never stored:
//!
//! | deployment exists | desired count | reachable | state        |
//! |-------------------|---------------|-----------|--------------|
//! | no                | any           | any       | `UNDEPLOYED` |
//! | yes               | 0             | any       | `STOPPED`    |
//! | yes               | > 0           | yes       | `RUNNING`    |
//! | yes               | > 0           | no        | `UNHEALTHY`  |

use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};

/// Default bound on a single reachability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Deployment state of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegionDeployment {
    /// Nothing is deployed in the region.
    Undeployed,
    /// Deployed, scaled to zero.
    Stopped,
    /// Scaled up and reachable.
    Running,
    /// Scaled up but not reachable.
    Unhealthy,
}

impl RegionDeployment {
    /// Derives the state from the three signals.
    #[must_use]
    pub fn derive(exists: bool, desired: u32, reachable: bool) -> Self {
        match (exists, desired, reachable) {
            (false, _, _) => Self::Undeployed,
            (true, 0, _) => Self::Stopped,
            (true, _, true) => Self::Running,
            (true, _, false) => Self::Unhealthy,
        }
    }
}

impl fmt::Display for RegionDeployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undeployed => write!(f, "UNDEPLOYED"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// What the fleet manager knows about a region's deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    /// Desired instance count.
    pub desired: u32,
}

/// Reads deployment state from the fleet manager.
pub trait FleetState: Send + Sync {
    /// Returns the region's deployment, or `None` if nothing is deployed there.
    ///
    /// # Errors
    ///
    /// Returns an error if the fleet manager cannot be queried.
    fn deployment(&self, region: &str)
    -> impl Future<Output = Result<Option<DeploymentInfo>>> + Send;
}

/// A bounded connectivity check against the gateway endpoint.
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if something answers at `host:port` within the probe's timeout.
    fn probe(&self, host: &str, port: u16) -> impl Future<Output = bool> + Send;
}

/// Transport used by [`NetworkProbe`].
///
/// `WireGuard` drops unauthenticated datagrams without answering, so a UDP
/// probe only succeeds against a responder that echoes. The default is a TCP
/// connect to a health listener on the VPN port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeTransport {
    /// Datagram probe; reachable only if a reply arrives.
    Udp,
    /// Stream connect probe.
    #[default]
    Tcp,
}

impl FromStr for ProbeTransport {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            _ => Err(FleetError::InvalidTransport(s.to_string())),
        }
    }
}

impl fmt::Display for ProbeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Probes the network directly.
///
/// A TCP probe succeeds when the connect completes. A UDP probe succeeds only
/// when a reply arrives; a rejection (ICMP port unreachable, surfaced as
/// connection refused) or silence until the timeout is unreachable.
#[derive(Debug, Clone, Copy)]
pub struct NetworkProbe {
    transport: ProbeTransport,
    timeout: Duration,
}

impl Default for NetworkProbe {
    fn default() -> Self {
        Self::new(ProbeTransport::default(), DEFAULT_PROBE_TIMEOUT)
    }
}

impl NetworkProbe {
    /// Creates a probe.
    #[must_use]
    pub fn new(transport: ProbeTransport, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn probe_addr(&self, addr: SocketAddr) -> std::io::Result<bool> {
        match self.transport {
            ProbeTransport::Tcp => match timeout(self.timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => Ok(true),
                Ok(Err(e)) => Err(e),
                Err(_) => Ok(false),
            },
            ProbeTransport::Udp => {
                let bind = if addr.is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = UdpSocket::bind(bind).await?;
                socket.connect(addr).await?;
                socket.send(&[0u8]).await?;
                let mut buf = [0u8; 64];
                match timeout(self.timeout, socket.recv(&mut buf)).await {
                    Ok(Ok(_)) => Ok(true),
                    Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => Ok(false),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Ok(false),
                }
            }
        }
    }
}

impl ReachabilityProbe for NetworkProbe {
    async fn probe(&self, host: &str, port: u16) -> bool {
        let addrs: Vec<SocketAddr> = match timeout(self.timeout, lookup_host((host, port))).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => {
                warn!(host, error = %e, "rendezvous name did not resolve");
                return false;
            }
            Err(_) => {
                warn!(host, "rendezvous resolution timed out");
                return false;
            }
        };

        for addr in addrs {
            match self.probe_addr(addr).await {
                Ok(true) => {
                    debug!(%addr, transport = %self.transport, "endpoint reachable");
                    return true;
                }
                Ok(false) => debug!(%addr, transport = %self.transport, "endpoint did not answer"),
                Err(e) => debug!(%addr, transport = %self.transport, error = %e, "probe failed"),
            }
        }
        false
    }
}

/// Computes region status from fleet state and a reachability probe.
#[derive(Debug)]
pub struct FleetStatusProbe<S, P> {
    state: S,
    probe: P,
    rendezvous: String,
    port: u16,
}

impl<S: FleetState, P: ReachabilityProbe> FleetStatusProbe<S, P> {
    /// Creates a status probe.
    ///
    /// `rendezvous` may contain `{region}`, which is replaced by the queried region.
    #[must_use]
    pub fn new(state: S, probe: P, rendezvous: impl Into<String>, port: u16) -> Self {
        Self {
            state,
            probe,
            rendezvous: rendezvous.into(),
            port,
        }
    }

    /// The rendezvous host probed for `region`.
    #[must_use]
    pub fn rendezvous_for(&self, region: &str) -> String {
        self.rendezvous.replace("{region}", region)
    }

    /// Returns the deployment state of `region`.
    ///
    /// The network is only probed when the region is scaled up.
    ///
    /// # Errors
    ///
    /// Returns an error if the fleet manager cannot be queried.
    pub async fn status(&self, region: &str) -> Result<RegionDeployment> {
        let Some(info) = self.state.deployment(region).await? else {
            return Ok(RegionDeployment::derive(false, 0, false));
        };
        if info.desired == 0 {
            return Ok(RegionDeployment::derive(true, 0, false));
        }

        let host = self.rendezvous_for(region);
        let reachable = self.probe.probe(&host, self.port).await;
        let state = RegionDeployment::derive(true, info.desired, reachable);
        info!(region, host = %host, port = self.port, desired = info.desired, %state, "region status");
        Ok(state)
    }
}
