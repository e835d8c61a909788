//! Fleet seams backed by operator-configured programs.
//!
//! Cloud APIs stay outside this crate. Each hook is an executable that receives
//! its inputs as trailing arguments and, where it returns data, prints JSON on
//! stdout.
//!
//! | Hook             | Arguments                      | Stdout                                     |
//! |------------------|--------------------------------|--------------------------------------------|
//! | `resolve_instance` | `<instance-id>`              | `{"public_ipv4": .., "public_ipv6": ..}` or `null` |
//! | `publish_record` | `<name> <A\|AAAA> <value> <ttl>` | ignored                                    |
//! | `fleet_state`    | `<region>`                     | `{"exists": bool, "desired": n}` or `null` |
//!
//! # Example
//!
//! ```rust,no_run
//! use wayfarer_fleet::{CommandResolver, HookCommand, InstanceResolver};
//!
//! # async fn example() -> wayfarer_fleet::Result<()> {
//! let resolver = CommandResolver::new(HookCommand::parse("/usr/local/bin/describe-instance")?);
//! let _instance = resolver.describe("i-0abc").await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{FleetError, Result};
use crate::reconciler::InstanceResolver;
use crate::rendezvous::RendezvousPublisher;
use crate::status::{DeploymentInfo, FleetState};
use crate::types::{Instance, LifecycleStatus, RendezvousRecord};

/// Default bound on a single hook run.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// A program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl HookCommand {
    /// Creates a hook running `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    /// Sets how long a run may take before the program is killed.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Appends leading arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Parses a whitespace-separated command line.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::NotConfigured`] if the line is empty.
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let program = words.next().ok_or(FleetError::NotConfigured("hook"))?;
        Ok(Self::new(program).with_args(words))
    }

    /// Runs the hook with `extra` arguments and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Io`] if the program cannot be started,
    /// [`FleetError::CommandTimedOut`] if it outlives the timeout, or
    /// [`FleetError::CommandFailed`] if it exits unsuccessfully.
    pub async fn run(&self, extra: &[&str]) -> Result<String> {
        debug!(command = %self, ?extra, timeout = ?self.timeout, "running hook");
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| FleetError::CommandTimedOut {
                command: self.to_string(),
                timeout: self.timeout,
            })??;

        if !output.status.success() {
            return Err(FleetError::CommandFailed {
                command: self.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_json<T: for<'de> Deserialize<'de>>(&self, extra: &[&str]) -> Result<Option<T>> {
        let stdout = self.run(extra).await?;
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<Option<T>>(trimmed).map_err(|e| FleetError::InvalidOutput {
            command: self.to_string(),
            message: e.to_string(),
        })
    }
}

impl fmt::Display for HookCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DescribeOutput {
    #[serde(default)]
    public_ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    public_ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    status: Option<LifecycleStatus>,
}

/// Resolves instances through the `resolve_instance` hook.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    hook: HookCommand,
}

impl CommandResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(hook: HookCommand) -> Self {
        Self { hook }
    }
}

impl InstanceResolver for CommandResolver {
    async fn describe(&self, instance_id: &str) -> Result<Option<Instance>> {
        let output: Option<DescribeOutput> = self.hook.run_json(&[instance_id]).await?;
        Ok(output.map(|o| Instance {
            id: instance_id.to_string(),
            public_ipv4: o.public_ipv4,
            public_ipv6: o.public_ipv6,
            status: o.status,
        }))
    }
}

/// Publishes records through the `publish_record` hook.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    hook: HookCommand,
}

impl CommandPublisher {
    /// Creates a publisher.
    #[must_use]
    pub fn new(hook: HookCommand) -> Self {
        Self { hook }
    }
}

impl RendezvousPublisher for CommandPublisher {
    async fn upsert(&self, record: &RendezvousRecord) -> Result<()> {
        let record_type = record.record_type.to_string();
        let value = record.value.to_string();
        let ttl = record.ttl.to_string();
        self.hook
            .run(&[record.name.as_str(), &record_type, &value, &ttl])
            .await
            .map(|_| ())
            .map_err(|e| FleetError::RendezvousUpdateFailed {
                name: record.name.clone(),
                record_type: record.record_type,
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct StateOutput {
    #[serde(default = "default_exists")]
    exists: bool,
    #[serde(default)]
    desired: u32,
}

fn default_exists() -> bool {
    true
}

/// Reads deployment state through the `fleet_state` hook.
#[derive(Debug, Clone)]
pub struct CommandFleetState {
    hook: HookCommand,
}

impl CommandFleetState {
    /// Creates a fleet state reader.
    #[must_use]
    pub fn new(hook: HookCommand) -> Self {
        Self { hook }
    }
}

impl FleetState for CommandFleetState {
    async fn deployment(&self, region: &str) -> Result<Option<DeploymentInfo>> {
        let output: Option<StateOutput> = self.hook.run_json(&[region]).await?;
        Ok(output
            .filter(|o| o.exists)
            .map(|o| DeploymentInfo { desired: o.desired }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::RecordType;

    /// Runs `body` under `sh`; appended arguments become `$1`, `$2`, ...
    fn script(body: &str) -> HookCommand {
        HookCommand::new("sh").with_args(["-c", body, "hook"])
    }

    #[test]
    fn parse_splits_program_and_args() {
        let hook = HookCommand::parse("aws-hook --region eu-west-1").expect("parse");
        assert_eq!(
            hook,
            HookCommand::new("aws-hook").with_args(["--region", "eu-west-1"])
        );
        assert_eq!(hook.to_string(), "aws-hook --region eu-west-1");
        assert!(HookCommand::parse("   ").is_err());
    }

    #[tokio::test]
    async fn hung_hook_is_killed_at_timeout() {
        let hook = script("sleep 30").with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = hook.run(&[]).await.expect_err("times out");
        assert!(matches!(err, FleetError::CommandTimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn resolver_reads_addresses() {
        let resolver = CommandResolver::new(script(
            r#"echo '{"public_ipv4":"203.0.113.7","status":"successful"}'"#,
        ));
        let instance = resolver.describe("i-1").await.expect("describe").expect("known");
        assert_eq!(instance.id, "i-1");
        assert_eq!(instance.public_ipv4, Some(Ipv4Addr::new(203, 0, 113, 7)));
        assert_eq!(instance.public_ipv6, None);
        assert_eq!(instance.status, Some(LifecycleStatus::Successful));
    }

    #[tokio::test]
    async fn resolver_treats_null_as_unknown() {
        let resolver = CommandResolver::new(script("echo null"));
        assert_eq!(resolver.describe("i-1").await.expect("describe"), None);
        let resolver = CommandResolver::new(script("true"));
        assert_eq!(resolver.describe("i-1").await.expect("describe"), None);
    }

    #[tokio::test]
    async fn resolver_rejects_garbage() {
        let resolver = CommandResolver::new(script("echo not-json"));
        assert!(matches!(
            resolver.describe("i-1").await,
            Err(FleetError::InvalidOutput { .. })
        ));
    }

    #[tokio::test]
    async fn publisher_passes_record_as_arguments() {
        let publisher = CommandPublisher::new(script(
            r#"[ "$1 $2 $3 $4" = "vpn.example.com A 203.0.113.7 60" ] || { echo "got: $*" >&2; exit 3; }"#,
        ));
        let record = RendezvousRecord::new("vpn.example.com", "203.0.113.7".parse().expect("ip"), 60);
        publisher.upsert(&record).await.expect("upsert");
    }

    #[tokio::test]
    async fn publisher_failure_is_rendezvous_error() {
        let publisher = CommandPublisher::new(script("echo throttled >&2; exit 1"));
        let record = RendezvousRecord::new("vpn.example.com", "2001:db8::7".parse().expect("ip"), 60);
        let err = publisher.upsert(&record).await.expect_err("fails");
        match err {
            FleetError::RendezvousUpdateFailed { record_type, reason, .. } => {
                assert_eq!(record_type, RecordType::Aaaa);
                assert!(reason.contains("throttled"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fleet_state_maps_exists_and_desired() {
        let state = CommandFleetState::new(script(r#"echo '{"exists":true,"desired":2}'"#));
        assert_eq!(
            state.deployment("eu-west-1").await.expect("state"),
            Some(DeploymentInfo { desired: 2 })
        );

        let state = CommandFleetState::new(script(r#"echo '{"exists":false}'"#));
        assert_eq!(state.deployment("eu-west-1").await.expect("state"), None);

        let state = CommandFleetState::new(script("echo null"));
        assert_eq!(state.deployment("eu-west-1").await.expect("state"), None);
    }
}
