//! Entry point tying configuration, the command executor, and the selected
//! introspection strategy together. Every public operation hangs off one of
//! the borrowed sub-managers returned here and answers with an [`Envelope`].
//!
//! Nothing is cached: each call re-queries the live system. No locks are
//! taken either, so callers that issue destructive operations concurrently
//! against the same pool or dataset must serialize them themselves.

use crate::backend::{Backend, CliBackend, NativeBackend};
use crate::command::{classify_cli_error, CommandExecutor, Invocation, Output};
use crate::dataset::DatasetManager;
use crate::inventory::StateExporter;
use crate::parse::pool_from_dataset;
use crate::pool::PoolManager;
use crate::replication::ReplicationManager;
use crate::validate;
use log::{info, warn};
use poolwarden_core::binding::NativeBinding;
use poolwarden_core::config::{InventoryCfg, PoolPolicy, WardenConfig};
use poolwarden_core::envelope::Envelope;
use poolwarden_core::error::{WardenError, WardenResult};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

pub struct ZfsManager {
    executor: CommandExecutor,
    backend: Box<dyn Backend>,
    policy: PoolPolicy,
    inventory: InventoryCfg,
}

impl ZfsManager {
    /// CLI-only manager built from configuration.
    pub fn from_config(config: &WardenConfig) -> WardenResult<Self> {
        let executor = CommandExecutor::from_config(config)?;
        Ok(Self::new(config, executor, None))
    }

    /// Manager that prefers `binding` when it connects.
    pub fn with_binding(
        config: &WardenConfig,
        binding: Arc<dyn NativeBinding>,
    ) -> WardenResult<Self> {
        let executor = CommandExecutor::from_config(config)?;
        Ok(Self::new(config, executor, Some(binding)))
    }

    /// Assemble a manager from parts; the strategy is chosen here, once.
    pub fn new(
        config: &WardenConfig,
        executor: CommandExecutor,
        binding: Option<Arc<dyn NativeBinding>>,
    ) -> Self {
        let backend: Box<dyn Backend> = match binding {
            Some(binding) => match binding.connect() {
                Ok(()) => Box::new(NativeBackend::new(binding)),
                Err(err) => {
                    info!("native binding unavailable ({err}); using zfs/zpool CLI only");
                    Box::new(CliBackend)
                }
            },
            None => Box::new(CliBackend),
        };
        Self {
            executor,
            backend,
            policy: config.policy.clone(),
            inventory: config.inventory.clone(),
        }
    }

    pub fn pools(&self) -> PoolManager<'_> {
        PoolManager::new(self)
    }

    pub fn datasets(&self) -> DatasetManager<'_> {
        DatasetManager::new(self)
    }

    pub fn replication(&self) -> ReplicationManager<'_> {
        ReplicationManager::new(self)
    }

    pub fn exporter(&self) -> StateExporter<'_> {
        StateExporter::new(self)
    }

    /// `native+cli` or `cli`, depending on the strategy picked at construction.
    pub fn source(&self) -> &'static str {
        self.backend.label()
    }

    pub fn is_dry_run(&self) -> bool {
        self.executor.is_dry_run()
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub(crate) fn inventory_cfg(&self) -> &InventoryCfg {
        &self.inventory
    }

    pub(crate) fn policy_admits(&self, pool: &str) -> bool {
        self.policy.admits(pool)
    }

    /// Validate `name` and make sure policy lets us touch its pool.
    pub(crate) fn admit(&self, kind: &str, name: &str) -> WardenResult<()> {
        validate::name(kind, name)?;
        let pool = pool_from_dataset(name).ok_or_else(|| {
            WardenError::InvalidRequest(format!("{kind} `{name}` does not map to a pool name"))
        })?;
        if !self.policy.admits(pool) {
            return Err(WardenError::InvalidRequest(format!(
                "pool `{pool}` is excluded by policy"
            )));
        }
        Ok(())
    }

    /// Run with the default timeout, refining "does not exist" failures.
    pub(crate) fn run(&self, invocation: &Invocation) -> WardenResult<Output> {
        self.executor.run(invocation).map_err(classify_cli_error)
    }
}

/// Failure of a multi-key update, with whatever was applied before it.
pub(crate) struct PartialSet {
    pub(crate) error: WardenError,
    pub(crate) failed_key: Option<String>,
    pub(crate) applied: Vec<String>,
}

impl From<WardenError> for PartialSet {
    fn from(error: WardenError) -> Self {
        Self {
            error,
            failed_key: None,
            applied: Vec::new(),
        }
    }
}

/// Like [`respond`], but a failure also reports `failed_key` and `applied`.
pub(crate) fn respond_partial<T: Serialize>(
    operation: &str,
    target: &str,
    result: Result<T, PartialSet>,
) -> Envelope {
    let partial = match result {
        Ok(data) => return Envelope::ok(data),
        Err(partial) => partial,
    };
    warn!(
        "{operation} failed on {target} (failed key {:?}, applied {:?}): {}",
        partial.failed_key, partial.applied, partial.error
    );
    let mut envelope = Envelope::from_error(&partial.error);
    if let Envelope::Err(err) = &mut envelope {
        err.extra.insert(
            "failed_key".to_string(),
            partial.failed_key.map_or(Value::Null, Value::String),
        );
        err.extra.insert("applied".to_string(), Value::from(partial.applied));
    }
    envelope
}

/// Convert an internal result into the public envelope, logging failures.
pub(crate) fn respond<T: Serialize>(operation: &str, result: WardenResult<T>) -> Envelope {
    match result {
        Ok(data) => Envelope::ok(data),
        Err(err) => {
            warn!("{operation} failed: {err}");
            Envelope::from_error(&err)
        }
    }
}
