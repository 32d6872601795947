//! vsync store: in-RAM backing structures owned by the surrounding system.

#![forbid(unsafe_code)]

mod memory;
mod name_cache;

pub use memory::{MemoryStorage, Verb, WriteRecord};
pub use name_cache::{NameCacheHandle, NameCacheStore};
