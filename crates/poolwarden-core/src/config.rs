use crate::error::{WardenError, WardenResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ZfsCfg {
    #[serde(default)]
    pub zfs_path: Option<String>,

    #[serde(default)]
    pub zpool_path: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_replication_timeout_secs")]
    pub replication_timeout_secs: u64,

    /// Report privileged commands instead of running them.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_timeout_secs() -> u64 {
    180
}

fn default_replication_timeout_secs() -> u64 {
    3600
}

impl Default for ZfsCfg {
    fn default() -> Self {
        Self {
            zfs_path: None,
            zpool_path: None,
            timeout_secs: default_timeout_secs(),
            replication_timeout_secs: default_replication_timeout_secs(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PrivilegeCfg {
    /// Elevation helper prefixed to every privileged command (e.g. `/usr/bin/sudo`).
    #[serde(default)]
    pub helper: Option<String>,

    #[serde(default = "default_helper_args")]
    pub helper_args: Vec<String>,
}

fn default_helper_args() -> Vec<String> {
    vec!["-n".to_string()]
}

impl Default for PrivilegeCfg {
    fn default() -> Self {
        Self {
            helper: None,
            helper_args: default_helper_args(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PoolPolicy {
    /// Pools the manager may touch; empty means every pool.
    #[serde(default)]
    pub allow_pools: Vec<String>,

    #[serde(default)]
    pub deny_pools: Vec<String>,
}

impl PoolPolicy {
    pub fn admits(&self, pool: &str) -> bool {
        if self.deny_pools.iter().any(|p| p == pool) {
            return false;
        }
        self.allow_pools.is_empty() || self.allow_pools.iter().any(|p| p == pool)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InventoryCfg {
    #[serde(default = "default_pool_properties")]
    pub pool_properties: Vec<String>,

    /// Walk pools on scoped threads during a full export.
    #[serde(default)]
    pub parallel_pools: bool,
}

fn default_pool_properties() -> Vec<String> {
    [
        "ashift",
        "autoexpand",
        "autoreplace",
        "autotrim",
        "comment",
        "cachefile",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for InventoryCfg {
    fn default() -> Self {
        Self {
            pool_properties: default_pool_properties(),
            parallel_pools: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WardenConfig {
    #[serde(default)]
    pub zfs: ZfsCfg,

    #[serde(default)]
    pub privilege: PrivilegeCfg,

    #[serde(default)]
    pub policy: PoolPolicy,

    #[serde(default)]
    pub inventory: InventoryCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl WardenConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> WardenResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> WardenResult<()> {
        if self.zfs.timeout_secs == 0 {
            return Err(WardenError::InvalidConfig(
                "zfs.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.zfs.replication_timeout_secs == 0 {
            return Err(WardenError::InvalidConfig(
                "zfs.replication_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if matches!(self.privilege.helper.as_deref(), Some(h) if h.trim().is_empty()) {
            return Err(WardenError::InvalidConfig(
                "privilege.helper must not be empty when set".to_string(),
            ));
        }
        if let Some(pool) = self
            .policy
            .allow_pools
            .iter()
            .find(|p| self.policy.deny_pools.contains(p))
        {
            return Err(WardenError::InvalidConfig(format!(
                "pool `{pool}` is listed in both policy.allow_pools and policy.deny_pools"
            )));
        }
        Ok(())
    }

    pub fn zfs_timeout(&self) -> Duration {
        Duration::from_secs(self.zfs.timeout_secs)
    }

    pub fn replication_timeout(&self) -> Duration {
        Duration::from_secs(self.zfs.replication_timeout_secs)
    }

    pub fn zfs_binary_path(&self) -> Option<PathBuf> {
        self.zfs.zfs_path.as_ref().map(PathBuf::from)
    }

    pub fn zpool_binary_path(&self) -> Option<PathBuf> {
        self.zfs.zpool_path.as_ref().map(PathBuf::from)
    }

    pub fn elevation_helper(&self) -> Option<PathBuf> {
        self.privilege.helper.as_ref().map(PathBuf::from)
    }
}
