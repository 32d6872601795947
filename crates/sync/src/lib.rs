//! vsync sync: decides, per virtual object, whether its physical counterpart
//! is created, deleted or patched, and in which direction patches flow.

#![forbid(unsafe_code)]

pub mod config;
pub mod names;
pub mod selector;
pub mod syncer;
pub mod translator;

pub use config::{Config, ConfigError, FromVirtualCluster, Mapping, SelectorConfig};
pub use names::{physical_name, safe_concat_name, PhysicalToVirtual, VirtualToPhysical, MAX_NAME_LEN};
pub use selector::LabelSelector;
pub use syncer::{FromVirtualSyncer, PairState, Side, SyncAction, SyncContext, SyncError};
pub use translator::{MetadataTranslator, NamespacedTranslator};
