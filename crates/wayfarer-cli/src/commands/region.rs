//! Regional deployment status.

use std::io::Write;

use wayfarer_fleet::{FleetState, FleetStatusProbe, ReachabilityProbe};

use crate::error::CliError;
use crate::output::{OutputFormat, RegionStatus};
use crate::settings::Settings;

/// Handler for `region-status`.
pub struct RegionStatusCommand<'a> {
    settings: &'a Settings,
}

impl<'a> RegionStatusCommand<'a> {
    /// Creates a new region status command handler.
    #[must_use]
    pub const fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Prints one of `UNDEPLOYED`, `STOPPED`, `RUNNING` or `UNHEALTHY`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fleet state hook or rendezvous is not configured,
    /// or the fleet state query fails.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        region: &str,
    ) -> Result<(), CliError> {
        let state = self.settings.fleet_state()?;
        self.execute_with(out, format, region, state, self.settings.network_probe())
            .await
    }

    async fn execute_with<W, S, P>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        region: &str,
        state: S,
        probe: P,
    ) -> Result<(), CliError>
    where
        W: Write,
        S: FleetState,
        P: ReachabilityProbe,
    {
        let status = FleetStatusProbe::new(
            state,
            probe,
            self.settings.rendezvous_pattern()?,
            self.settings.vpn_port,
        );
        let state = status.status(region).await?;
        format.write(
            out,
            &RegionStatus {
                region: region.to_string(),
                state,
            },
        )
    }
}
