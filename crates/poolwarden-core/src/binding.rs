use crate::error::WardenResult;
use crate::property::RawProperty;
use std::collections::BTreeMap;

/// Pool as reported by a native binding.
#[derive(Debug, Clone, PartialEq)]
pub struct NativePool {
    pub name: String,
    pub guid: u64,
    pub state: String,
    pub health: String,
    pub properties: BTreeMap<String, RawProperty>,
}

/// In-process access to the storage system, typically a libzfs wrapper.
///
/// Implementations only need to cover introspection and property updates;
/// everything else goes through the `zfs`/`zpool` command line. A binding
/// that cannot serve a call returns `WardenError::BindingUnavailable`, which
/// sends that call down the CLI path instead.
pub trait NativeBinding: Send + Sync {
    /// Acquire or verify the library handle. Called once at manager construction.
    fn connect(&self) -> WardenResult<()>;

    /// Every imported pool, in the order the library reports them.
    fn pools(&self) -> WardenResult<Vec<NativePool>>;

    /// All visible properties of a dataset, snapshot, or volume.
    fn dataset_properties(&self, name: &str) -> WardenResult<BTreeMap<String, RawProperty>>;

    fn set_dataset_property(&self, name: &str, key: &str, value: &str) -> WardenResult<()>;
}
