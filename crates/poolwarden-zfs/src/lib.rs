//! ZFS control plane built on the `zfs` and `zpool` CLIs, with an optional
//! native binding consulted first for reads. `manager` is the entry point;
//! `command` and `parse` cover process execution and output parsing.

mod backend;
mod command;
mod dataset;
mod inventory;
mod manager;
mod parse;
mod pool;
mod replication;
mod validate;

pub use backend::{PoolSummary, SetMethod};
pub use command::{
    Access, CommandExecutor, Input, Invocation, Output, Sink, StreamOutput, Tool,
    DEFAULT_ZFS_PATHS, DEFAULT_ZPOOL_PATHS, DRY_RUN_MARKER,
};
pub use dataset::{
    BookmarkEntry, DatasetEntry, DatasetKind, DatasetManager, DiffReport, HistoryReport,
    HistoryScope, PropertyChange, SnapshotEntry, SpaceEntry, UserQuotas,
};
pub use inventory::{DatasetInventory, FullState, PoolInventory, StateExporter};
pub use manager::ZfsManager;
pub use pool::{CreatePoolOptions, FeatureFlag, PoolManager, PoolStatus, RawText, STATUS_PROPERTIES};
pub use replication::{ReceiveOptions, ReplicationManager, SendOptions, SendReport, ReceiveReport};
