//! Workspace umbrella crate.
//!
//! Re-exports the async bridge surface so hosts can depend on a single crate:
//! the runtime primitives from `core-async`, configuration and logging from
//! `core-runtime`, the contracts from `bridge-traits` and the façade from
//! `core-service`. The in-memory reference store is behind the default
//! `memory-store` feature.

pub use bridge_traits as traits;
pub use core_async as runtime;
pub use core_runtime::{config, logging};
pub use core_service::{AdapterError, AsyncDataStoreAdapter};

#[cfg(feature = "memory-store")]
pub use bridge_memory::MemoryDataStore;
