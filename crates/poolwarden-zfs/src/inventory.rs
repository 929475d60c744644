//! Deep inventory of every admitted pool for dashboards.
//!
//! Only pool enumeration can fail the export. Every nested lookup that fails
//! is logged and leaves its field empty.

use crate::backend::PoolSummary;
use crate::dataset::{BookmarkEntry, DatasetKind, SnapshotEntry};
use crate::manager::ZfsManager;
use crate::pool::FeatureFlag;
use log::{debug, warn};
use poolwarden_core::envelope::Envelope;
use poolwarden_core::error::{WardenError, WardenResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::thread;

#[derive(Debug, Clone, Serialize)]
pub struct DatasetInventory {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub props: BTreeMap<String, String>,
    pub snapshots: Vec<SnapshotEntry>,
    pub bookmarks: Vec<BookmarkEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolInventory {
    pub name: String,
    pub guid: String,
    pub state: String,
    pub health: String,
    pub props: BTreeMap<String, String>,
    pub features: Vec<FeatureFlag>,
    pub status_verbose: Option<String>,
    pub iostat: Option<String>,
    pub datasets: Vec<DatasetInventory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullState {
    pub pools: Vec<PoolInventory>,
    pub all_snapshots: Vec<SnapshotEntry>,
}

pub struct StateExporter<'a> {
    mgr: &'a ZfsManager,
}

impl<'a> StateExporter<'a> {
    pub(crate) fn new(mgr: &'a ZfsManager) -> Self {
        Self { mgr }
    }

    /// Walk pools, then datasets, then snapshots and bookmarks, in listing order.
    pub fn export_full_state(&self) -> Envelope {
        match self.try_export() {
            Ok(state) => {
                let mut meta = Map::new();
                meta.insert("source".to_string(), Value::from(self.mgr.source()));
                meta.insert("dry_run".to_string(), Value::from(self.mgr.is_dry_run()));
                Envelope::ok_with_meta(state, meta)
            }
            Err(err) => {
                warn!("export_full_state failed: {err}");
                Envelope::from_error(&err)
            }
        }
    }

    fn try_export(&self) -> WardenResult<FullState> {
        let pools = self.mgr.pools().try_list_pools()?;
        let pools = if self.mgr.inventory_cfg().parallel_pools && pools.len() > 1 {
            self.walk_parallel(pools)
        } else {
            pools.into_iter().map(|p| self.walk_pool(p)).collect()
        };

        let all_snapshots = self
            .mgr
            .datasets()
            .try_list_snapshots(None)
            .unwrap_or_else(|err| swallow("all snapshots", err));

        Ok(FullState {
            pools,
            all_snapshots,
        })
    }

    /// One scoped thread per pool; each branch builds its own entry.
    fn walk_parallel(&self, pools: Vec<PoolSummary>) -> Vec<PoolInventory> {
        thread::scope(|scope| {
            let handles: Vec<_> = pools
                .iter()
                .cloned()
                .map(|pool| scope.spawn(move || self.walk_pool(pool)))
                .collect();
            handles
                .into_iter()
                .zip(pools)
                .map(|(handle, pool)| {
                    handle.join().unwrap_or_else(|_| {
                        warn!("inventory worker for pool {} panicked", pool.name);
                        PoolInventory::bare(pool)
                    })
                })
                .collect()
        })
    }

    fn walk_pool(&self, pool: PoolSummary) -> PoolInventory {
        debug!("inventory: pool {}", pool.name);
        let name = pool.name.clone();
        let mut entry = PoolInventory::bare(pool);
        let pools = self.mgr.pools();

        entry.props = self
            .mgr
            .backend()
            .pool_properties(
                self.mgr.executor(),
                &name,
                &self.mgr.inventory_cfg().pool_properties,
            )
            .unwrap_or_else(|err| swallow(&format!("{name} properties"), err));
        entry.features = pools
            .try_features(&name)
            .unwrap_or_else(|err| swallow(&format!("{name} features"), err));
        entry.status_verbose = pools
            .try_status_verbose(&name)
            .map(|s| Some(s.raw_text))
            .unwrap_or_else(|err| swallow(&format!("{name} status"), err));
        entry.iostat = pools
            .try_iostat(Some(&name), 1, 1)
            .map(|s| Some(s.raw_text))
            .unwrap_or_else(|err| swallow(&format!("{name} iostat"), err));

        let datasets = self
            .mgr
            .datasets()
            .try_list_datasets(Some(&name), &[DatasetKind::Filesystem, DatasetKind::Volume])
            .unwrap_or_else(|err| swallow(&format!("{name} datasets"), err));
        entry.datasets = datasets
            .into_iter()
            .map(|ds| self.walk_dataset(ds.name, ds.kind))
            .collect();
        entry
    }

    fn walk_dataset(&self, name: String, kind: String) -> DatasetInventory {
        let datasets = self.mgr.datasets();
        DatasetInventory {
            props: datasets
                .try_get_props(&name)
                .unwrap_or_else(|err| swallow(&format!("{name} properties"), err)),
            snapshots: datasets
                .try_list_snapshots(Some(&name))
                .unwrap_or_else(|err| swallow(&format!("{name} snapshots"), err)),
            bookmarks: datasets
                .try_list_bookmarks(Some(&name))
                .unwrap_or_else(|err| swallow(&format!("{name} bookmarks"), err)),
            name,
            kind,
        }
    }
}

impl PoolInventory {
    fn bare(pool: PoolSummary) -> Self {
        Self {
            name: pool.name,
            guid: pool.guid,
            state: pool.state,
            health: pool.health,
            props: BTreeMap::new(),
            features: Vec::new(),
            status_verbose: None,
            iostat: None,
            datasets: Vec::new(),
        }
    }
}

fn swallow<T: Default>(what: &str, err: WardenError) -> T {
    warn!("inventory: {what} unavailable: {err}");
    T::default()
}
