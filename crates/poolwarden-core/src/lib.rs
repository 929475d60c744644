pub mod binding;
pub mod config;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod property;

pub use binding::{NativeBinding, NativePool};
pub use config::{InventoryCfg, PoolPolicy, PrivilegeCfg, WardenConfig, ZfsCfg};
pub use envelope::{Envelope, EnvelopeError};
pub use error::{ErrorKind, WardenError, WardenResult};
pub use property::{normalize, RawProperty, Scalar};
