//! Fleet lifecycle event handling.

use std::fs;
use std::io::{Read, Write};

use tracing::warn;
use wayfarer_fleet::{
    EndpointReconciler, FleetEvent, InstanceResolver, ReconcileOutcome, RendezvousPublisher,
};

use crate::cli::ReconcileArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, ReconcileReport};
use crate::settings::Settings;

/// Handler for `reconcile`.
pub struct ReconcileCommand<'a> {
    settings: &'a Settings,
}

impl<'a> ReconcileCommand<'a> {
    /// Creates a new reconcile command handler.
    #[must_use]
    pub const fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Reads one event and points the rendezvous name at its instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is malformed, a hook is missing, or the
    /// reconciliation fails.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &ReconcileArgs,
    ) -> Result<(), CliError> {
        let event = read_event(&args.event)?;
        let reconciler = EndpointReconciler::new(
            self.settings.resolver()?,
            self.settings.publisher()?,
            self.settings.reconciler_config()?,
        );
        run(out, format, &reconciler, &event).await
    }
}

fn read_event(source: &str) -> Result<FleetEvent, CliError> {
    let text = if source == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        fs::read_to_string(source)?
    };
    Ok(FleetEvent::from_json(&text)?)
}

async fn run<W, R, P>(
    out: &mut W,
    format: &OutputFormat,
    reconciler: &EndpointReconciler<R, P>,
    event: &FleetEvent,
) -> Result<(), CliError>
where
    W: Write,
    R: InstanceResolver,
    P: RendezvousPublisher,
{
    let outcome = reconciler.reconcile(event).await.map_err(|e| {
        warn!(instance_id = %event.instance_id, error = %e, "reconciliation failed");
        e
    })?;
    let report = match outcome {
        ReconcileOutcome::Skipped => ReconcileReport {
            instance_id: event.instance_id.clone(),
            skipped: true,
            records: Vec::new(),
        },
        ReconcileOutcome::Published(records) => ReconcileReport {
            instance_id: event.instance_id.clone(),
            skipped: false,
            records,
        },
    };
    format.write(out, &report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;
    use wayfarer_fleet::{
        InMemoryRendezvous, Instance, LifecycleStatus, RecordType, ReconcilerConfig,
    };

    struct FixedResolver(Option<Instance>);

    impl InstanceResolver for FixedResolver {
        async fn describe(&self, _instance_id: &str) -> wayfarer_fleet::Result<Option<Instance>> {
            Ok(self.0.clone())
        }
    }

    fn reconciler(instance: Option<Instance>) -> EndpointReconciler<FixedResolver, InMemoryRendezvous> {
        EndpointReconciler::new(
            FixedResolver(instance),
            InMemoryRendezvous::new(),
            ReconcilerConfig::new("vpn.example.com"),
        )
    }

    #[tokio::test]
    async fn successful_event_publishes_record() {
        let ip = Ipv4Addr::new(203, 0, 113, 7);
        let instance = Instance::new("i-0abc").with_ipv4(ip);
        let reconciler = reconciler(Some(instance));
        let event = FleetEvent::new("i-0abc", LifecycleStatus::Successful);

        let mut out = Vec::new();
        run(&mut out, &OutputFormat::default(), &reconciler, &event)
            .await
            .expect("reconcile");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "vpn.example.com A 203.0.113.7 ttl=60\n"
        );
        let record = reconciler
            .publisher()
            .get("vpn.example.com", RecordType::A)
            .expect("record");
        assert_eq!(record.value, std::net::IpAddr::V4(ip));
    }

    #[tokio::test]
    async fn failed_event_is_skipped() {
        let reconciler = reconciler(None);
        let event = FleetEvent::new("i-0abc", LifecycleStatus::Failed);
        let mut out = Vec::new();
        run(&mut out, &OutputFormat::new(Format::Json), &reconciler, &event)
            .await
            .expect("reconcile");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["skipped"], true);
        assert!(reconciler.publisher().records().is_empty());
    }

    #[test]
    fn event_is_read_from_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("event.json");
        fs::write(&path, r#"{"instance_id":"i-0abc","status":"in-progress"}"#).expect("write");
        let event = read_event(path.to_str().expect("utf8 path")).expect("event");
        assert_eq!(event.instance_id, "i-0abc");
        assert_eq!(event.status, LifecycleStatus::InProgress);
    }

    #[test]
    fn malformed_event_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("event.json");
        fs::write(&path, "{not json").expect("write");
        let err = read_event(path.to_str().expect("utf8 path")).expect_err("malformed");
        assert!(err.to_string().starts_with("invalid fleet event"));
    }
}
