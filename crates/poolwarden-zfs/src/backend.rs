//! Introspection strategies. The manager picks one at construction: the
//! native strategy when a binding connects, the CLI strategy otherwise. The
//! native strategy degrades to the CLI per call whenever the binding fails.

use crate::command::{classify_cli_error, Access, CommandExecutor, Invocation};
use crate::parse::{parse_columns, parse_property_map};
use log::debug;
use poolwarden_core::binding::NativeBinding;
use poolwarden_core::error::{WardenError, WardenResult};
use poolwarden_core::property::normalize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identity and health of one imported pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub name: String,
    pub guid: String,
    pub state: String,
    pub health: String,
}

/// Which path served a property update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetMethod {
    Native,
    Cli,
}

#[derive(Debug, Clone)]
pub(crate) struct SetOutcome {
    pub method: SetMethod,
    pub stdout: String,
}

pub(crate) trait Backend: Send + Sync {
    fn label(&self) -> &'static str;

    fn pools(&self, exec: &CommandExecutor) -> WardenResult<Vec<PoolSummary>>;

    /// Selected properties of `pool`; keys the pool does not report are omitted.
    fn pool_properties(
        &self,
        exec: &CommandExecutor,
        pool: &str,
        keys: &[String],
    ) -> WardenResult<BTreeMap<String, String>>;

    fn dataset_properties(
        &self,
        exec: &CommandExecutor,
        target: &str,
    ) -> WardenResult<BTreeMap<String, String>>;

    fn set_property(
        &self,
        exec: &CommandExecutor,
        target: &str,
        key: &str,
        value: &str,
    ) -> WardenResult<SetOutcome>;
}

/// Pure `zfs`/`zpool` strategy.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliBackend;

impl CliBackend {
    fn run(exec: &CommandExecutor, invocation: &Invocation) -> WardenResult<String> {
        exec.run(invocation)
            .map(|out| out.stdout)
            .map_err(classify_cli_error)
    }
}

impl Backend for CliBackend {
    fn label(&self) -> &'static str {
        "cli"
    }

    fn pools(&self, exec: &CommandExecutor) -> WardenResult<Vec<PoolSummary>> {
        let inv = Invocation::zpool(Access::Inspect, "list").args(["-H", "-o", "name,guid,health"]);
        let stdout = Self::run(exec, &inv)?;
        let rows = parse_columns(&exec.command_line(&inv), &stdout, 3)?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                let health = row.pop().unwrap_or_default();
                let guid = row.pop().unwrap_or_default();
                let name = row.pop().unwrap_or_default();
                PoolSummary {
                    name,
                    guid,
                    // `zpool list` only reports imported pools.
                    state: "ACTIVE".to_string(),
                    health,
                }
            })
            .collect())
    }

    fn pool_properties(
        &self,
        exec: &CommandExecutor,
        pool: &str,
        keys: &[String],
    ) -> WardenResult<BTreeMap<String, String>> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let inv = Invocation::zpool(Access::Inspect, "get")
            .args(["-H", "-o", "property,value"])
            .arg(keys.join(","))
            .arg(pool);
        let stdout = Self::run(exec, &inv)?;
        Ok(parse_property_map(&stdout))
    }

    fn dataset_properties(
        &self,
        exec: &CommandExecutor,
        target: &str,
    ) -> WardenResult<BTreeMap<String, String>> {
        let inv = Invocation::zfs(Access::Inspect, "get")
            .args(["-H", "-o", "property,value", "all"])
            .arg(target);
        let stdout = Self::run(exec, &inv)?;
        Ok(parse_property_map(&stdout))
    }

    fn set_property(
        &self,
        exec: &CommandExecutor,
        target: &str,
        key: &str,
        value: &str,
    ) -> WardenResult<SetOutcome> {
        let inv = Invocation::zfs(Access::Mutating, "set")
            .arg(format!("{key}={value}"))
            .arg(target);
        let stdout = Self::run(exec, &inv)?;
        Ok(SetOutcome {
            method: SetMethod::Cli,
            stdout,
        })
    }
}

/// Binding-first strategy with per-call CLI fallback.
pub(crate) struct NativeBackend {
    binding: Arc<dyn NativeBinding>,
    cli: CliBackend,
}

impl NativeBackend {
    pub(crate) fn new(binding: Arc<dyn NativeBinding>) -> Self {
        Self {
            binding,
            cli: CliBackend,
        }
    }
}

impl Backend for NativeBackend {
    fn label(&self) -> &'static str {
        "native+cli"
    }

    fn pools(&self, exec: &CommandExecutor) -> WardenResult<Vec<PoolSummary>> {
        match self.binding.pools() {
            Ok(pools) => Ok(pools
                .into_iter()
                .map(|p| PoolSummary {
                    name: p.name,
                    guid: p.guid.to_string(),
                    state: p.state,
                    health: p.health,
                })
                .collect()),
            Err(err) => {
                debug!("native pool enumeration failed ({err}); using zpool list");
                self.cli.pools(exec)
            }
        }
    }

    fn pool_properties(
        &self,
        exec: &CommandExecutor,
        pool: &str,
        keys: &[String],
    ) -> WardenResult<BTreeMap<String, String>> {
        let pools = match self.binding.pools() {
            Ok(pools) => pools,
            Err(err) => {
                debug!("native pool properties failed for {pool} ({err}); using zpool get");
                return self.cli.pool_properties(exec, pool, keys);
            }
        };
        let native = pools
            .into_iter()
            .find(|p| p.name == pool)
            .ok_or_else(|| WardenError::not_found(format!("pool `{pool}`")))?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                native
                    .properties
                    .get(key)
                    .map(|raw| (key.clone(), normalize(raw)))
            })
            .collect())
    }

    fn dataset_properties(
        &self,
        exec: &CommandExecutor,
        target: &str,
    ) -> WardenResult<BTreeMap<String, String>> {
        match self.binding.dataset_properties(target) {
            Ok(props) => Ok(props
                .iter()
                .map(|(key, raw)| (key.clone(), normalize(raw)))
                .collect()),
            Err(err) => {
                debug!("native property read failed for {target} ({err}); using zfs get");
                self.cli.dataset_properties(exec, target)
            }
        }
    }

    fn set_property(
        &self,
        exec: &CommandExecutor,
        target: &str,
        key: &str,
        value: &str,
    ) -> WardenResult<SetOutcome> {
        // The binding has no dry-run notion; keep simulated runs on the CLI path.
        if exec.is_dry_run() {
            return self.cli.set_property(exec, target, key, value);
        }
        match self.binding.set_dataset_property(target, key, value) {
            Ok(()) => Ok(SetOutcome {
                method: SetMethod::Native,
                stdout: String::new(),
            }),
            Err(WardenError::BindingUnavailable(reason)) => {
                debug!("native set unavailable for {target} ({reason}); using zfs set");
                self.cli.set_property(exec, target, key, value)
            }
            Err(err) => Err(err),
        }
    }
}
