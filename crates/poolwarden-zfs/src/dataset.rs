//! Dataset, snapshot, and bookmark operations.
//!
//! `set_props` applies keys one at a time and stops at the first failure.
//! Keys applied before that point stay applied; the failure envelope lists
//! them under `extra.applied` next to `extra.failed_key`.

use crate::backend::SetMethod;
use crate::command::{Access, Invocation};
use crate::manager::{respond, respond_partial, PartialSet, ZfsManager};
use crate::parse::{
    belongs_to_pool, dataset_of, parse_columns, parse_lines, pool_from_dataset, qualify_snapshot,
};
use crate::validate;
use log::info;
use poolwarden_core::envelope::Envelope;
use poolwarden_core::error::{WardenError, WardenResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kinds understood by `zfs list -t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Filesystem,
    Volume,
    Snapshot,
    Bookmark,
}

impl DatasetKind {
    pub const DEFAULT_LISTING: &'static [DatasetKind] = &[
        DatasetKind::Filesystem,
        DatasetKind::Volume,
        DatasetKind::Snapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Filesystem => "filesystem",
            DatasetKind::Volume => "volume",
            DatasetKind::Snapshot => "snapshot",
            DatasetKind::Bookmark => "bookmark",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "fs" => Ok(DatasetKind::Filesystem),
            "volume" | "vol" => Ok(DatasetKind::Volume),
            "snapshot" | "snap" => Ok(DatasetKind::Snapshot),
            "bookmark" => Ok(DatasetKind::Bookmark),
            other => Err(WardenError::InvalidRequest(format!(
                "unknown dataset type `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    pub name: String,
    pub creation: String,
    pub used: String,
    pub refer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkEntry {
    pub name: String,
    pub creation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceEntry {
    pub name: String,
    pub used: String,
    pub quota: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserQuotas {
    pub users: Vec<SpaceEntry>,
    pub groups: Vec<SpaceEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyChange {
    pub target: String,
    pub changed: BTreeMap<String, String>,
    pub method: SetMethod,
    pub stdout: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    pub raw: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryScope {
    Pool,
    Dataset,
    Global,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryReport {
    pub scope: HistoryScope,
    pub name: Option<String>,
    pub raw: String,
}

/// Outcome of a single mutating call, flattened into `{<outcome>: true, stdout, ...}`.
#[derive(Debug, Clone, Serialize)]
struct Change {
    stdout: String,
    #[serde(flatten)]
    fields: BTreeMap<&'static str, Value>,
}

impl Change {
    fn new(stdout: String) -> Self {
        Self {
            stdout,
            fields: BTreeMap::new(),
        }
    }

    fn with(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.fields.insert(key, value.into());
        self
    }
}

pub struct DatasetManager<'a> {
    mgr: &'a ZfsManager,
}

impl<'a> DatasetManager<'a> {
    pub(crate) fn new(mgr: &'a ZfsManager) -> Self {
        Self { mgr }
    }

    /// List datasets, optionally scoped to `pool`. An empty `kinds` means
    /// filesystems, volumes and snapshots.
    pub fn list_datasets(&self, pool: Option<&str>, kinds: &[DatasetKind]) -> Envelope {
        respond("list_datasets", self.try_list_datasets(pool, kinds))
    }

    pub(crate) fn try_list_datasets(
        &self,
        pool: Option<&str>,
        kinds: &[DatasetKind],
    ) -> WardenResult<Vec<DatasetEntry>> {
        if let Some(pool) = pool {
            self.mgr.admit("pool", pool)?;
        }
        let kinds = if kinds.is_empty() {
            DatasetKind::DEFAULT_LISTING
        } else {
            kinds
        };
        let type_list = kinds
            .iter()
            .map(DatasetKind::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let mut inv = Invocation::zfs(Access::Inspect, "list")
            .args(["-H", "-o", "name,type", "-t"])
            .arg(type_list);
        if let Some(pool) = pool {
            inv = inv.arg("-r").arg(pool);
        }
        let out = self.mgr.run(&inv)?;
        let rows = parse_columns(&self.mgr.executor().command_line(&inv), &out.stdout, 2)?;

        // The CLI does not always honor the scope; filter again here.
        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                let kind = row.pop()?;
                let name = row.pop()?;
                Some(DatasetEntry { name, kind })
            })
            .filter(|entry| pool.map_or(true, |pool| belongs_to_pool(&entry.name, pool)))
            .filter(|entry| self.admitted(&entry.name))
            .collect())
    }

    fn admitted(&self, name: &str) -> bool {
        pool_from_dataset(name).is_some_and(|pool| self.mgr.policy_admits(pool))
    }

    /// Every property of `target`, normalized to strings.
    pub fn get_props(&self, target: &str) -> Envelope {
        respond("get_props", self.try_get_props(target))
    }

    pub(crate) fn try_get_props(&self, target: &str) -> WardenResult<BTreeMap<String, String>> {
        self.mgr.admit("dataset", target)?;
        self.mgr
            .backend()
            .dataset_properties(self.mgr.executor(), target)
    }

    /// Create a filesystem or volume. Volumes must carry `volsize`.
    pub fn create_dataset(
        &self,
        name: &str,
        properties: &[(String, String)],
        kind: DatasetKind,
    ) -> Envelope {
        respond("create_dataset", self.try_create(name, properties, kind))
    }

    fn try_create(
        &self,
        name: &str,
        properties: &[(String, String)],
        kind: DatasetKind,
    ) -> WardenResult<Change> {
        self.mgr.admit("dataset", name)?;
        validate::properties(properties)?;

        let inv = Invocation::zfs(Access::Mutating, "create").arg("-p");
        let inv = match kind {
            DatasetKind::Filesystem => inv.properties(properties),
            DatasetKind::Volume => {
                let volsize = properties
                    .iter()
                    .find(|(key, _)| key == "volsize")
                    .map(|(_, value)| value.as_str())
                    .filter(|value| !value.trim().is_empty())
                    .ok_or_else(|| {
                        WardenError::InvalidRequest(format!(
                            "volume `{name}` requires a volsize property"
                        ))
                    })?;
                validate::size(volsize)?;
                let rest: Vec<(String, String)> = properties
                    .iter()
                    .filter(|(key, _)| key != "volsize")
                    .cloned()
                    .collect();
                inv.arg("-V").arg(volsize).properties(&rest)
            }
            other => {
                return Err(WardenError::InvalidRequest(format!(
                    "cannot create a {other} with create_dataset"
                )))
            }
        };

        info!("creating {kind} {name}");
        let out = self.mgr.run(&inv.arg(name))?;
        Ok(Change::new(out.stdout)
            .with("created", true)
            .with("name", name)
            .with("type", kind.as_str()))
    }

    pub fn destroy_dataset(&self, name: &str, recursive: bool, force: bool) -> Envelope {
        respond("destroy_dataset", self.try_destroy(name, recursive, force))
    }

    fn try_destroy(&self, name: &str, recursive: bool, force: bool) -> WardenResult<Change> {
        self.mgr.admit("dataset", name)?;
        let inv = Invocation::zfs(Access::Mutating, "destroy")
            .flag(recursive, "-r")
            .flag(force, "-f")
            .arg(name);
        info!("destroying {name}");
        let out = self.mgr.run(&inv)?;
        Ok(Change::new(out.stdout)
            .with("destroyed", true)
            .with("name", name))
    }

    /// Apply `properties` in order. Not atomic: see the module docs.
    pub fn set_props(&self, target: &str, properties: &[(String, String)]) -> Envelope {
        respond_partial("set_props", target, self.try_set_props(target, properties))
    }

    fn try_set_props(
        &self,
        target: &str,
        properties: &[(String, String)],
    ) -> Result<PropertyChange, PartialSet> {
        self.mgr.admit("dataset", target)?;
        if properties.is_empty() {
            return Err(WardenError::InvalidRequest("no properties to set".to_string()).into());
        }
        validate::properties(properties)?;

        let mut changed = BTreeMap::new();
        let mut applied = Vec::new();
        let mut method = SetMethod::Native;
        let mut stdout = Vec::new();
        for (key, value) in properties {
            info!("setting {key}={value} on {target}");
            match self
                .mgr
                .backend()
                .set_property(self.mgr.executor(), target, key, value)
            {
                Ok(outcome) => {
                    if outcome.method == SetMethod::Cli {
                        method = SetMethod::Cli;
                    }
                    if !outcome.stdout.trim().is_empty() {
                        stdout.push(outcome.stdout.trim_end().to_string());
                    }
                    changed.insert(key.clone(), value.clone());
                    applied.push(key.clone());
                }
                Err(error) => {
                    return Err(PartialSet {
                        error: crate::command::classify_cli_error(error),
                        failed_key: Some(key.clone()),
                        applied,
                    })
                }
            }
        }

        Ok(PropertyChange {
            target: target.to_string(),
            changed,
            method,
            stdout: stdout.join("\n"),
        })
    }

    /// Snapshot `name` (`dataset@snap`).
    pub fn snapshot(&self, name: &str, recursive: bool, properties: &[(String, String)]) -> Envelope {
        respond("snapshot", self.try_snapshot(name, recursive, properties))
    }

    fn try_snapshot(
        &self,
        name: &str,
        recursive: bool,
        properties: &[(String, String)],
    ) -> WardenResult<Change> {
        self.mgr.admit("snapshot", name)?;
        validate::snapshot_name(name)?;
        validate::properties(properties)?;
        let inv = Invocation::zfs(Access::Mutating, "snapshot")
            .flag(recursive, "-r")
            .properties(properties)
            .arg(name);
        info!("snapshotting {name}");
        let out = self.mgr.run(&inv)?;
        Ok(Change::new(out.stdout)
            .with("created", true)
            .with("snapshot", name))
    }

    /// Direct snapshots of `dataset`, or every snapshot when `None`.
    pub fn list_snapshots(&self, dataset: Option<&str>) -> Envelope {
        respond("list_snapshots", self.try_list_snapshots(dataset))
    }

    pub(crate) fn try_list_snapshots(&self, dataset: Option<&str>) -> WardenResult<Vec<SnapshotEntry>> {
        if let Some(dataset) = dataset {
            self.mgr.admit("dataset", dataset)?;
        }
        let mut inv = Invocation::zfs(Access::Inspect, "list")
            .args(["-H", "-o", "name,creation,used,refer", "-t", "snapshot"]);
        if let Some(dataset) = dataset {
            inv = inv.args(["-d", "1"]).arg(dataset);
        }
        let out = self.mgr.run(&inv)?;
        let rows = parse_columns(&self.mgr.executor().command_line(&inv), &out.stdout, 4)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut row = row.into_iter();
                SnapshotEntry {
                    name: row.next().unwrap_or_default(),
                    creation: row.next().unwrap_or_default(),
                    used: row.next().unwrap_or_default(),
                    refer: row.next().unwrap_or_default(),
                }
            })
            .filter(|snap| dataset.map_or(true, |ds| dataset_of(&snap.name) == ds))
            .filter(|snap| self.admitted(&snap.name))
            .collect())
    }

    /// Bookmark `snapshot`. A bare `bookmark` is qualified against the snapshot's dataset.
    pub fn bookmark(&self, snapshot: &str, bookmark: &str) -> Envelope {
        respond("bookmark", self.try_bookmark(snapshot, bookmark))
    }

    fn try_bookmark(&self, snapshot: &str, bookmark: &str) -> WardenResult<Change> {
        self.mgr.admit("snapshot", snapshot)?;
        validate::snapshot_name(snapshot)?;
        let bookmark = if bookmark.contains('#') {
            bookmark.to_string()
        } else {
            format!("{}#{}", dataset_of(snapshot), bookmark)
        };
        self.mgr.admit("bookmark", &bookmark)?;
        validate::bookmark_name(&bookmark)?;

        let inv = Invocation::zfs(Access::Mutating, "bookmark")
            .arg(snapshot)
            .arg(bookmark.as_str());
        let out = self.mgr.run(&inv)?;
        Ok(Change::new(out.stdout)
            .with("created", true)
            .with("bookmark", bookmark))
    }

    pub fn list_bookmarks(&self, dataset: Option<&str>) -> Envelope {
        respond("list_bookmarks", self.try_list_bookmarks(dataset))
    }

    pub(crate) fn try_list_bookmarks(&self, dataset: Option<&str>) -> WardenResult<Vec<BookmarkEntry>> {
        if let Some(dataset) = dataset {
            self.mgr.admit("dataset", dataset)?;
        }
        let mut inv = Invocation::zfs(Access::Inspect, "list")
            .args(["-H", "-o", "name,creation", "-t", "bookmark"]);
        if let Some(dataset) = dataset {
            inv = inv.args(["-d", "1"]).arg(dataset);
        }
        let out = self.mgr.run(&inv)?;
        let rows = parse_columns(&self.mgr.executor().command_line(&inv), &out.stdout, 2)?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                let creation = row.pop()?;
                let name = row.pop()?;
                Some(BookmarkEntry { name, creation })
            })
            .filter(|mark| dataset.map_or(true, |ds| dataset_of(&mark.name) == ds))
            .filter(|mark| self.admitted(&mark.name))
            .collect())
    }

    pub fn clone(&self, snapshot: &str, target: &str, properties: &[(String, String)]) -> Envelope {
        respond("clone", self.try_clone(snapshot, target, properties))
    }

    fn try_clone(
        &self,
        snapshot: &str,
        target: &str,
        properties: &[(String, String)],
    ) -> WardenResult<Change> {
        self.mgr.admit("snapshot", snapshot)?;
        validate::snapshot_name(snapshot)?;
        self.mgr.admit("dataset", target)?;
        validate::properties(properties)?;
        let inv = Invocation::zfs(Access::Mutating, "clone")
            .properties(properties)
            .arg(snapshot)
            .arg(target);
        info!("cloning {snapshot} to {target}");
        let out = self.mgr.run(&inv)?;
        Ok(Change::new(out.stdout)
            .with("cloned", true)
            .with("origin", snapshot)
            .with("target", target))
    }

    /// Make a clone independent of its origin snapshot.
    pub fn promote(&self, dataset: &str) -> Envelope {
        respond("promote", self.single(dataset, "promote", "promoted"))
    }

    pub fn mount(&self, dataset: &str) -> Envelope {
        respond("mount", self.single(dataset, "mount", "mounted"))
    }

    pub fn unmount(&self, dataset: &str, force: bool) -> Envelope {
        respond("unmount", self.try_unmount(dataset, force))
    }

    fn try_unmount(&self, dataset: &str, force: bool) -> WardenResult<Change> {
        self.mgr.admit("dataset", dataset)?;
        let inv = Invocation::zfs(Access::Mutating, "unmount")
            .flag(force, "-f")
            .arg(dataset);
        let out = self.mgr.run(&inv)?;
        Ok(Change::new(out.stdout)
            .with("unmounted", true)
            .with("dataset", dataset))
    }

    fn single(&self, dataset: &str, subcommand: &str, outcome: &'static str) -> WardenResult<Change> {
        self.mgr.admit("dataset", dataset)?;
        let inv = Invocation::zfs(Access::Mutating, subcommand).arg(dataset);
        info!("zfs {subcommand} {dataset}");
        let out = self.mgr.run(&inv)?;
        Ok(Change::new(out.stdout)
            .with(outcome, true)
            .with("dataset", dataset))
    }

    pub fn rename(&self, source: &str, destination: &str, recursive: bool) -> Envelope {
        respond("rename", self.try_rename(source, destination, recursive))
    }

    fn try_rename(&self, source: &str, destination: &str, recursive: bool) -> WardenResult<Change> {
        self.mgr.admit("dataset", source)?;
        self.mgr.admit("dataset", destination)?;
        let inv = Invocation::zfs(Access::Mutating, "rename")
            .flag(recursive, "-r")
            .arg(source)
            .arg(destination);
        info!("renaming {source} to {destination}");
        let out = self.mgr.run(&inv)?;
        Ok(Change::new(out.stdout)
            .with("renamed", true)
            .with("from", source)
            .with("to", destination))
    }

    /// Roll `dataset` back to `to_snapshot` (bare or `dataset@snap`), or to
    /// its newest snapshot when `None`.
    pub fn rollback(
        &self,
        dataset: &str,
        to_snapshot: Option<&str>,
        destroy_more_recent: bool,
    ) -> Envelope {
        respond(
            "rollback",
            self.try_rollback(dataset, to_snapshot, destroy_more_recent),
        )
    }

    fn try_rollback(
        &self,
        dataset: &str,
        to_snapshot: Option<&str>,
        destroy_more_recent: bool,
    ) -> WardenResult<Change> {
        self.mgr.admit("dataset", dataset)?;
        let snapshot = match to_snapshot {
            Some(snap) => qualify_snapshot(dataset, snap),
            None => self.latest_snapshot(dataset)?,
        };
        validate::snapshot_name(&snapshot)?;
        if dataset_of(&snapshot) != dataset {
            return Err(WardenError::InvalidRequest(format!(
                "snapshot `{snapshot}` does not belong to `{dataset}`"
            )));
        }

        let inv = Invocation::zfs(Access::Mutating, "rollback")
            .flag(destroy_more_recent, "-r")
            .arg(snapshot.as_str());
        info!("rolling {dataset} back to {snapshot}");
        let out = self.mgr.run(&inv)?;
        Ok(Change::new(out.stdout)
            .with("rolled_back", true)
            .with("snapshot", snapshot))
    }

    fn latest_snapshot(&self, dataset: &str) -> WardenResult<String> {
        let inv = Invocation::zfs(Access::Inspect, "list")
            .args(["-H", "-p", "-o", "name", "-t", "snapshot", "-s", "creation", "-d", "1"])
            .arg(dataset);
        let out = self.mgr.run(&inv)?;
        parse_lines(&out.stdout)
            .into_iter()
            .filter(|name| dataset_of(name) == dataset)
            .last()
            .ok_or_else(|| WardenError::not_found(format!("snapshots of `{dataset}`")))
    }

    pub fn set_quota(&self, dataset: &str, size: &str) -> Envelope {
        self.set_sized(dataset, "quota", size)
    }

    pub fn set_refquota(&self, dataset: &str, size: &str) -> Envelope {
        self.set_sized(dataset, "refquota", size)
    }

    pub fn set_reservation(&self, dataset: &str, size: &str) -> Envelope {
        self.set_sized(dataset, "reservation", size)
    }

    pub fn set_refreservation(&self, dataset: &str, size: &str) -> Envelope {
        self.set_sized(dataset, "refreservation", size)
    }

    fn set_sized(&self, dataset: &str, key: &str, size: &str) -> Envelope {
        if let Err(err) = validate::size(size) {
            return respond::<()>(key, Err(err));
        }
        self.set_props(dataset, &[(key.to_string(), size.to_string())])
    }

    /// Per-user and per-group space accounting for `dataset`.
    pub fn list_user_quotas(&self, dataset: &str) -> Envelope {
        respond("list_user_quotas", self.try_user_quotas(dataset))
    }

    fn try_user_quotas(&self, dataset: &str) -> WardenResult<UserQuotas> {
        self.mgr.admit("dataset", dataset)?;
        Ok(UserQuotas {
            users: self.space("userspace", dataset)?,
            groups: self.space("groupspace", dataset)?,
        })
    }

    fn space(&self, subcommand: &str, dataset: &str) -> WardenResult<Vec<SpaceEntry>> {
        let inv = Invocation::zfs(Access::Inspect, subcommand)
            .args(["-H", "-o", "name,used,quota"])
            .arg(dataset);
        let out = self.mgr.run(&inv)?;
        let rows = parse_columns(&self.mgr.executor().command_line(&inv), &out.stdout, 3)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut row = row.into_iter();
                SpaceEntry {
                    name: row.next().unwrap_or_default(),
                    used: row.next().unwrap_or_default(),
                    quota: row.next().unwrap_or_default(),
                }
            })
            .collect())
    }

    /// Defaults to `lz4`.
    pub fn enable_compression(&self, dataset: &str, algorithm: Option<&str>) -> Envelope {
        self.set_one(dataset, "compression", algorithm.unwrap_or("lz4"))
    }

    /// Defaults to `on`.
    pub fn enable_dedup(&self, dataset: &str, mode: Option<&str>) -> Envelope {
        self.set_one(dataset, "dedup", mode.unwrap_or("on"))
    }

    pub fn set_mountpoint(&self, dataset: &str, mountpoint: &str) -> Envelope {
        self.set_one(dataset, "mountpoint", mountpoint)
    }

    pub fn set_atime(&self, dataset: &str, mode: &str) -> Envelope {
        self.set_one(dataset, "atime", mode)
    }

    /// Sets `volblocksize` on volumes and `recordsize` on everything else.
    pub fn set_record_or_volblock(&self, dataset: &str, size: &str) -> Envelope {
        if let Err(err) = validate::size(size) {
            return respond::<()>("set_record_or_volblock", Err(err));
        }
        let props = match self.try_get_props(dataset) {
            Ok(props) => props,
            Err(err) => return respond::<()>("set_record_or_volblock", Err(err)),
        };
        let key = match props.get("type").map(String::as_str) {
            Some("volume") => "volblocksize",
            _ => "recordsize",
        };
        self.set_one(dataset, key, size)
    }

    fn set_one(&self, dataset: &str, key: &str, value: &str) -> Envelope {
        self.set_props(dataset, &[(key.to_string(), value.to_string())])
    }

    /// Changes between snapshot `older` and `newer` (a later snapshot or the live dataset).
    pub fn diff(&self, older: &str, newer: Option<&str>) -> Envelope {
        respond("diff", self.try_diff(older, newer))
    }

    fn try_diff(&self, older: &str, newer: Option<&str>) -> WardenResult<DiffReport> {
        self.mgr.admit("snapshot", older)?;
        validate::snapshot_name(older)?;
        if let Some(newer) = newer {
            self.mgr.admit("dataset", newer)?;
        }
        let inv = Invocation::zfs(Access::Elevated, "diff")
            .arg(older)
            .args(newer);
        let out = self.mgr.run(&inv)?;
        Ok(DiffReport {
            lines: parse_lines(&out.stdout),
            raw: out.stdout,
        })
    }

    /// Command history for a pool, a dataset (lines naming it), or every pool.
    pub fn history(&self, name: Option<&str>) -> Envelope {
        respond("history", self.try_history(name))
    }

    fn try_history(&self, name: Option<&str>) -> WardenResult<HistoryReport> {
        let Some(name) = name else {
            let inv = Invocation::zpool(Access::Elevated, "history");
            let out = self.mgr.run(&inv)?;
            return Ok(HistoryReport {
                scope: HistoryScope::Global,
                name: None,
                raw: out.stdout,
            });
        };

        self.mgr.admit("dataset", name)?;
        let pool = pool_from_dataset(name).unwrap_or(name);
        let inv = Invocation::zpool(Access::Elevated, "history").arg(pool);
        let out = self.mgr.run(&inv)?;
        if pool == name {
            return Ok(HistoryReport {
                scope: HistoryScope::Pool,
                name: Some(name.to_string()),
                raw: out.stdout,
            });
        }

        let raw = out
            .stdout
            .lines()
            .filter(|line| mentions(line, name))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(HistoryReport {
            scope: HistoryScope::Dataset,
            name: Some(name.to_string()),
            raw,
        })
    }
}

/// True when `line` names `dataset` itself, or one of its snapshots or bookmarks.
fn mentions(line: &str, dataset: &str) -> bool {
    line.split_whitespace().any(|word| {
        word == dataset
            || word
                .strip_prefix(dataset)
                .is_some_and(|rest| rest.starts_with('@') || rest.starts_with('#'))
    })
}
