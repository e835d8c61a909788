//! Fleet-facing side of a Wayfarer gateway.
//!
//! A gateway runs as a single replaceable instance per region. This crate keeps
//! clients pointed at whichever instance is current and reports whether a
//! region's gateway is up:
//!
//! - [`EndpointReconciler`] reacts to fleet lifecycle events by resolving the
//!   new instance's public addresses and upserting rendezvous records
//! - [`FleetStatusProbe`] combines fleet manager state with a reachability
//!   probe into one [`RegionDeployment`]
//! - [`command`] adapts both to operator-provided hook programs

pub mod command;
pub mod error;
pub mod reconciler;
pub mod rendezvous;
pub mod status;
pub mod types;

pub use command::{
    CommandFleetState, CommandPublisher, CommandResolver, DEFAULT_HOOK_TIMEOUT, HookCommand,
};
pub use error::{FleetError, Result};
pub use reconciler::{
    DEFAULT_TTL_SECS, EndpointReconciler, InstanceResolver, ReconcileOutcome, ReconcilerConfig,
    RetryPolicy,
};
pub use rendezvous::{InMemoryRendezvous, RendezvousPublisher};
pub use status::{
    DEFAULT_PROBE_TIMEOUT, DeploymentInfo, FleetState, FleetStatusProbe, NetworkProbe,
    ProbeTransport, ReachabilityProbe, RegionDeployment,
};
pub use types::{FleetEvent, Instance, LifecycleStatus, RecordType, RendezvousRecord};
