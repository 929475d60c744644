//! Pool lifecycle and inspection.

use crate::command::{Access, Invocation};
use crate::manager::{respond, respond_partial, PartialSet, ZfsManager};
use crate::parse::parse_columns;
use crate::validate;
use log::{info, warn};
use poolwarden_core::envelope::Envelope;
use poolwarden_core::error::{WardenError, WardenResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Properties reported alongside `pool_status`.
pub const STATUS_PROPERTIES: &[&str] = &[
    "ashift",
    "autoexpand",
    "autoreplace",
    "autotrim",
    "listsnapshots",
];

const FEATURE_PREFIX: &str = "feature@";

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub state: String,
    pub health: String,
    pub guid: String,
    pub props: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureFlag {
    pub property: String,
    pub value: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawText {
    pub raw_text: String,
}

/// Knobs for `create_pool` beyond the name and vdev layout.
#[derive(Debug, Clone, Default)]
pub struct CreatePoolOptions {
    pub properties: Vec<(String, String)>,
    pub force: bool,
    pub altroot: Option<String>,
    pub ashift: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
struct PoolChange {
    pool: Option<String>,
    stdout: String,
    #[serde(flatten)]
    outcome: BTreeMap<&'static str, serde_json::Value>,
}

impl PoolChange {
    fn new(pool: Option<&str>, stdout: String) -> Self {
        Self {
            pool: pool.map(str::to_string),
            stdout,
            outcome: BTreeMap::new(),
        }
    }

    fn with(mut self, key: &'static str, value: impl Into<serde_json::Value>) -> Self {
        self.outcome.insert(key, value.into());
        self
    }
}

pub struct PoolManager<'a> {
    mgr: &'a ZfsManager,
}

impl<'a> PoolManager<'a> {
    pub(crate) fn new(mgr: &'a ZfsManager) -> Self {
        Self { mgr }
    }

    pub fn list_pools(&self) -> Envelope {
        respond(
            "list_pools",
            self.try_list_pools()
                .map(|pools| pools.into_iter().map(|p| p.name).collect::<Vec<_>>()),
        )
    }

    pub(crate) fn try_list_pools(&self) -> WardenResult<Vec<crate::backend::PoolSummary>> {
        let pools = self.mgr.backend().pools(self.mgr.executor())?;
        Ok(pools
            .into_iter()
            .filter(|p| self.mgr.policy_admits(&p.name))
            .collect())
    }

    pub fn pool_status(&self, name: &str) -> Envelope {
        respond("pool_status", self.try_pool_status(name))
    }

    fn try_pool_status(&self, name: &str) -> WardenResult<PoolStatus> {
        self.mgr.admit("pool", name)?;
        let summary = self
            .try_list_pools()?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| WardenError::not_found(format!("pool `{name}`")))?;

        let keys: Vec<String> = STATUS_PROPERTIES.iter().map(|k| k.to_string()).collect();
        let props = match self
            .mgr
            .backend()
            .pool_properties(self.mgr.executor(), name, &keys)
        {
            Ok(props) => props,
            Err(err) => {
                warn!("pool {name}: property lookup failed: {err}");
                BTreeMap::new()
            }
        };

        Ok(PoolStatus {
            name: summary.name,
            state: summary.state,
            health: summary.health,
            guid: summary.guid,
            props,
        })
    }

    pub fn pool_status_verbose(&self, name: &str) -> Envelope {
        respond("pool_status_verbose", self.try_status_verbose(name))
    }

    pub(crate) fn try_status_verbose(&self, name: &str) -> WardenResult<RawText> {
        self.mgr.admit("pool", name)?;
        let inv = Invocation::zpool(Access::Inspect, "status").arg("-v").arg(name);
        let out = self.mgr.run(&inv)?;
        Ok(RawText {
            raw_text: out.stdout,
        })
    }

    /// `samples` reports spaced `interval` seconds apart; must fit within the command timeout.
    pub fn pool_iostat(&self, name: Option<&str>, samples: u32, interval: u32) -> Envelope {
        respond("pool_iostat", self.try_iostat(name, samples, interval))
    }

    pub(crate) fn try_iostat(
        &self,
        name: Option<&str>,
        samples: u32,
        interval: u32,
    ) -> WardenResult<RawText> {
        if let Some(name) = name {
            self.mgr.admit("pool", name)?;
        }
        if samples == 0 || interval == 0 {
            return Err(WardenError::InvalidRequest(
                "iostat samples and interval must be at least 1".to_string(),
            ));
        }
        let span = u64::from(samples.saturating_sub(1)) * u64::from(interval);
        if span >= self.mgr.executor().timeout().as_secs() {
            return Err(WardenError::InvalidRequest(format!(
                "{samples} samples at {interval}s would exceed the {:?} command timeout",
                self.mgr.executor().timeout()
            )));
        }
        let inv = Invocation::zpool(Access::Inspect, "iostat")
            .arg("-v")
            .args(name)
            .arg(interval.to_string())
            .arg(samples.to_string());
        let out = self.mgr.run(&inv)?;
        Ok(RawText {
            raw_text: out.stdout,
        })
    }

    /// Create `name` from `vdev_groups`, passed through in exactly the order given.
    pub fn create_pool(
        &self,
        name: &str,
        vdev_groups: &[Vec<String>],
        options: &CreatePoolOptions,
    ) -> Envelope {
        respond("create_pool", self.try_create_pool(name, vdev_groups, options))
    }

    fn try_create_pool(
        &self,
        name: &str,
        vdev_groups: &[Vec<String>],
        options: &CreatePoolOptions,
    ) -> WardenResult<PoolChange> {
        self.mgr.admit("pool", name)?;
        if vdev_groups.is_empty() || vdev_groups.iter().any(|g| g.is_empty()) {
            return Err(WardenError::InvalidRequest(
                "create_pool needs at least one non-empty vdev group".to_string(),
            ));
        }
        for device in vdev_groups.iter().flatten() {
            validate::name("vdev", device)?;
        }
        if let Some(altroot) = options.altroot.as_deref() {
            validate::name("altroot", altroot)?;
        }
        if let Some(ashift) = options.ashift {
            if !(9..=16).contains(&ashift) {
                return Err(WardenError::InvalidRequest(format!(
                    "ashift {ashift} out of range 9..=16"
                )));
            }
        }
        validate::properties(&options.properties)?;

        let mut inv = Invocation::zpool(Access::Mutating, "create")
            .flag(options.force, "-f")
            .option("-R", options.altroot.as_deref());
        if let Some(ashift) = options.ashift {
            inv = inv.arg("-o").arg(format!("ashift={ashift}"));
        }
        let inv = inv
            .properties(&options.properties)
            .arg(name)
            .args(vdev_groups.iter().flatten().cloned());

        info!("creating pool {name}");
        let out = self.mgr.run(&inv)?;
        Ok(PoolChange::new(Some(name), out.stdout).with("created", true))
    }

    /// Irreversible. Confirmation belongs to the caller.
    pub fn destroy_pool(&self, name: &str, force: bool) -> Envelope {
        respond(
            "destroy_pool",
            self.simple(name, "destroy", force, "destroyed"),
        )
    }

    pub fn export_pool(&self, name: &str, force: bool) -> Envelope {
        respond("export_pool", self.simple(name, "export", force, "exported"))
    }

    fn simple(
        &self,
        name: &str,
        subcommand: &str,
        force: bool,
        outcome: &'static str,
    ) -> WardenResult<PoolChange> {
        self.mgr.admit("pool", name)?;
        let inv = Invocation::zpool(Access::Mutating, subcommand)
            .flag(force, "-f")
            .arg(name);
        info!("zpool {subcommand} {name}");
        let out = self.mgr.run(&inv)?;
        Ok(PoolChange::new(Some(name), out.stdout).with(outcome, true))
    }

    /// Without a name this only lists importable pools.
    pub fn import_pool(&self, name: Option<&str>, dir_hint: Option<&str>, readonly: bool) -> Envelope {
        respond("import_pool", self.try_import(name, dir_hint, readonly))
    }

    fn try_import(
        &self,
        name: Option<&str>,
        dir_hint: Option<&str>,
        readonly: bool,
    ) -> WardenResult<PoolChange> {
        if let Some(name) = name {
            self.mgr.admit("pool", name)?;
        }
        if let Some(dir) = dir_hint {
            validate::name("directory", dir)?;
        }
        let mut inv = Invocation::zpool(Access::Mutating, "import").option("-d", dir_hint);
        if readonly {
            inv = inv.args(["-o", "readonly=on"]);
        }
        let inv = inv.args(name);
        let out = self.mgr.run(&inv)?;
        Ok(PoolChange::new(name, out.stdout).with("imported", name.is_some()))
    }

    /// Start an integrity scan, or stop the running one.
    pub fn scrub_pool(&self, name: &str, stop: bool) -> Envelope {
        respond("scrub_pool", self.try_scrub(name, stop))
    }

    fn try_scrub(&self, name: &str, stop: bool) -> WardenResult<PoolChange> {
        self.mgr.admit("pool", name)?;
        let inv = Invocation::zpool(Access::Mutating, "scrub")
            .flag(stop, "-s")
            .arg(name);
        let out = self.mgr.run(&inv)?;
        let state = if stop { "stopped" } else { "started" };
        Ok(PoolChange::new(Some(name), out.stdout).with("scrub", state))
    }

    /// Reset error counters for the pool or a single device in it.
    pub fn clear_pool(&self, name: &str, device: Option<&str>) -> Envelope {
        respond("clear_pool", self.try_clear(name, device))
    }

    fn try_clear(&self, name: &str, device: Option<&str>) -> WardenResult<PoolChange> {
        self.mgr.admit("pool", name)?;
        if let Some(device) = device {
            validate::name("device", device)?;
        }
        let inv = Invocation::zpool(Access::Mutating, "clear")
            .arg(name)
            .args(device);
        let out = self.mgr.run(&inv)?;
        Ok(PoolChange::new(Some(name), out.stdout)
            .with("cleared", true)
            .with("device", device))
    }

    /// Swap `old_device` for `new_device`, or resilver it in place when `None`.
    pub fn replace_device(
        &self,
        name: &str,
        old_device: &str,
        new_device: Option<&str>,
        force: bool,
    ) -> Envelope {
        respond(
            "replace_device",
            self.try_replace(name, old_device, new_device, force),
        )
    }

    fn try_replace(
        &self,
        name: &str,
        old_device: &str,
        new_device: Option<&str>,
        force: bool,
    ) -> WardenResult<PoolChange> {
        self.mgr.admit("pool", name)?;
        validate::name("device", old_device)?;
        if let Some(device) = new_device {
            validate::name("device", device)?;
        }
        let inv = Invocation::zpool(Access::Mutating, "replace")
            .flag(force, "-f")
            .arg(name)
            .arg(old_device)
            .args(new_device);
        info!("replacing {old_device} in {name}");
        let out = self.mgr.run(&inv)?;
        Ok(PoolChange::new(Some(name), out.stdout)
            .with("replaced", old_device)
            .with("new_device", new_device))
    }

    /// Grow the pool by `vdev_groups`, e.g. `[["mirror", "sdc", "sdd"], ["spare", "sde"]]`.
    pub fn add_vdev(&self, name: &str, vdev_groups: &[Vec<String>], force: bool) -> Envelope {
        respond("add_vdev", self.try_add_vdev(name, vdev_groups, force))
    }

    fn try_add_vdev(
        &self,
        name: &str,
        vdev_groups: &[Vec<String>],
        force: bool,
    ) -> WardenResult<PoolChange> {
        self.mgr.admit("pool", name)?;
        if vdev_groups.is_empty() || vdev_groups.iter().any(|g| g.is_empty()) {
            return Err(WardenError::InvalidRequest(
                "add_vdev needs at least one non-empty vdev group".to_string(),
            ));
        }
        for device in vdev_groups.iter().flatten() {
            validate::name("vdev", device)?;
        }
        let inv = Invocation::zpool(Access::Mutating, "add")
            .flag(force, "-f")
            .arg(name)
            .args(vdev_groups.iter().flatten().cloned());
        info!("adding {} vdev group(s) to {name}", vdev_groups.len());
        let out = self.mgr.run(&inv)?;
        Ok(PoolChange::new(Some(name), out.stdout).with("added", vdev_groups.len()))
    }

    /// Apply pool properties one `zpool set` at a time, stopping at the first failure.
    pub fn set_pool_props(&self, name: &str, properties: &[(String, String)]) -> Envelope {
        respond_partial("set_pool_props", name, self.try_set_pool_props(name, properties))
    }

    fn try_set_pool_props(
        &self,
        name: &str,
        properties: &[(String, String)],
    ) -> Result<PoolChange, PartialSet> {
        self.mgr.admit("pool", name)?;
        if properties.is_empty() {
            return Err(WardenError::InvalidRequest("no properties to set".to_string()).into());
        }
        validate::properties(properties)?;

        let mut applied = Vec::new();
        let mut changed = serde_json::Map::new();
        let mut stdout = Vec::new();
        for (key, value) in properties {
            let inv = Invocation::zpool(Access::Mutating, "set")
                .arg(format!("{key}={value}"))
                .arg(name);
            info!("setting {key}={value} on pool {name}");
            match self.mgr.run(&inv) {
                Ok(out) => {
                    if !out.stdout.trim().is_empty() {
                        stdout.push(out.stdout.trim_end().to_string());
                    }
                    changed.insert(key.clone(), value.clone().into());
                    applied.push(key.clone());
                }
                Err(error) => {
                    return Err(PartialSet {
                        error,
                        failed_key: Some(key.clone()),
                        applied,
                    })
                }
            }
        }
        Ok(PoolChange::new(Some(name), stdout.join("\n")).with("changed", changed))
    }

    pub fn features(&self, name: &str) -> Envelope {
        respond("features", self.try_features(name))
    }

    pub(crate) fn try_features(&self, name: &str) -> WardenResult<Vec<FeatureFlag>> {
        self.mgr.admit("pool", name)?;
        let inv = Invocation::zpool(Access::Inspect, "get")
            .args(["-H", "-o", "name,property,value,source", "all"])
            .arg(name);
        let out = self.mgr.run(&inv)?;
        let rows = parse_columns(&self.mgr.executor().command_line(&inv), &out.stdout, 4)?;
        Ok(rows
            .into_iter()
            .filter(|row| row[1].starts_with(FEATURE_PREFIX))
            .map(|row| {
                let mut row = row.into_iter().skip(1);
                FeatureFlag {
                    property: row.next().unwrap_or_default(),
                    value: row.next().unwrap_or_default(),
                    source: row.next().unwrap_or_default(),
                }
            })
            .collect())
    }
}
