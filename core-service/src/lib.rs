//! Async façade over blocking data stores.
//!
//! [`AsyncDataStoreAdapter`] implements
//! [`AsyncDataStore`](bridge_traits::AsyncDataStore) for any blocking
//! [`DataStore`](bridge_traits::DataStore). Plain operations run on worker
//! threads, `acquire_schedules` runs both of its phases there, and subscriber
//! callbacks are relayed onto the loop thread.

pub mod adapter;
pub mod error;

pub use adapter::AsyncDataStoreAdapter;
pub use error::{AdapterError, AdapterState, Result};
