//! # Bridge Configuration
//!
//! Sizing for the pieces that connect a cooperative loop to blocking code.
//!
//! ## Overview
//!
//! [`BridgeConfig`] is constructed through [`BridgeConfigBuilder`] and
//! validated fail-fast on `build()`. Every field has a default, so
//! `BridgeConfig::default()` is always valid.
//!
//! | Setting | Default | Controls |
//! |---|---|---|
//! | `max_blocking_threads` | 64 | Worker threads in the runtime's blocking pool |
//! | `max_concurrent_offloads` | unlimited | Offloads running at once through one façade |
//! | `portal_capacity` | 64 | Queued portal calls before submitters block |
//! | `thread_name` | `bridge-worker` | Name given to runtime threads |
//! | `thread_keep_alive` | 10 s | Idle time before a worker thread exits |
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::BridgeConfig;
//!
//! let config = BridgeConfig::builder()
//!     .max_blocking_threads(8)
//!     .max_concurrent_offloads(4)
//!     .build()
//!     .expect("valid config");
//!
//! let runtime = config.build_runtime().expect("runtime");
//! let answer = runtime.block_on(async { 42 });
//! assert_eq!(answer, 42);
//! ```

use crate::error::{Error, Result};
use core_async::offload::Offloader;
use core_async::portal::{Portal, DEFAULT_PORTAL_CAPACITY};
use core_async::runtime::{Builder, Runtime};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_BLOCKING_THREADS: usize = 64;
pub const DEFAULT_THREAD_NAME: &str = "bridge-worker";
pub const DEFAULT_THREAD_KEEP_ALIVE: Duration = Duration::from_secs(10);

/// Sizing of the worker pool, offload limiter and callback portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Upper bound on threads in the blocking pool
    pub max_blocking_threads: usize,

    /// Offloads allowed to run at once through one façade; `None` leaves the
    /// bound to the pool
    pub max_concurrent_offloads: Option<usize>,

    /// Portal calls that may be queued before submitting threads block
    pub portal_capacity: usize,

    pub thread_name: String,

    pub thread_keep_alive: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
            max_concurrent_offloads: None,
            portal_capacity: DEFAULT_PORTAL_CAPACITY,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            thread_keep_alive: DEFAULT_THREAD_KEEP_ALIVE,
        }
    }
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_blocking_threads == 0 {
            return Err(Error::Config(
                "max_blocking_threads must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_offloads == Some(0) {
            return Err(Error::Config(
                "max_concurrent_offloads must be greater than 0 when set".to_string(),
            ));
        }

        if self.portal_capacity == 0 {
            return Err(Error::Config(
                "portal_capacity must be greater than 0".to_string(),
            ));
        }

        if self.thread_name.trim().is_empty() {
            return Err(Error::Config("thread_name cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Builds the cooperative loop: a current-thread runtime whose blocking
    /// pool follows this configuration.
    pub fn build_runtime(&self) -> Result<Runtime> {
        self.validate()?;
        debug!(
            max_blocking_threads = self.max_blocking_threads,
            thread_name = %self.thread_name,
            "building cooperative loop"
        );

        Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(self.max_blocking_threads)
            .thread_name(self.thread_name.clone())
            .thread_keep_alive(self.thread_keep_alive)
            .build()
            .map_err(|e| Error::Runtime(format!("Failed to build runtime: {}", e)))
    }

    /// Offloader honouring `max_concurrent_offloads`.
    pub fn offloader(&self) -> Offloader {
        Offloader::from_limit(self.max_concurrent_offloads)
    }

    /// Unopened portal with `portal_capacity` queue slots.
    pub fn portal(&self) -> Portal {
        Portal::with_capacity(self.portal_capacity)
    }
}

/// Builder for [`BridgeConfig`]. Unset fields keep their defaults.
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    max_blocking_threads: Option<usize>,
    max_concurrent_offloads: Option<usize>,
    portal_capacity: Option<usize>,
    thread_name: Option<String>,
    thread_keep_alive: Option<Duration>,
}

impl BridgeConfigBuilder {
    pub fn max_blocking_threads(mut self, threads: usize) -> Self {
        self.max_blocking_threads = Some(threads);
        self
    }

    pub fn max_concurrent_offloads(mut self, limit: usize) -> Self {
        self.max_concurrent_offloads = Some(limit);
        self
    }

    pub fn portal_capacity(mut self, capacity: usize) -> Self {
        self.portal_capacity = Some(capacity);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn thread_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.thread_keep_alive = Some(keep_alive);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<BridgeConfig> {
        let defaults = BridgeConfig::default();
        let config = BridgeConfig {
            max_blocking_threads: self
                .max_blocking_threads
                .unwrap_or(defaults.max_blocking_threads),
            max_concurrent_offloads: self.max_concurrent_offloads,
            portal_capacity: self.portal_capacity.unwrap_or(defaults.portal_capacity),
            thread_name: self.thread_name.unwrap_or(defaults.thread_name),
            thread_keep_alive: self
                .thread_keep_alive
                .unwrap_or(defaults.thread_keep_alive),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_blocking_threads, 64);
        assert_eq!(config.max_concurrent_offloads, None);
        assert_eq!(config.portal_capacity, 64);
        assert_eq!(config.thread_name, "bridge-worker");
        assert_eq!(config.thread_keep_alive, Duration::from_secs(10));
    }

    #[test]
    fn test_builder_overrides() {
        let config = BridgeConfig::builder()
            .max_blocking_threads(4)
            .max_concurrent_offloads(2)
            .portal_capacity(8)
            .thread_name("store-io")
            .thread_keep_alive(Duration::from_secs(1))
            .build()
            .unwrap();

        assert_eq!(config.max_blocking_threads, 4);
        assert_eq!(config.max_concurrent_offloads, Some(2));
        assert_eq!(config.portal_capacity, 8);
        assert_eq!(config.thread_name, "store-io");
        assert_eq!(config.thread_keep_alive, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_rejects_zero_sizes() {
        let result = BridgeConfig::builder().max_blocking_threads(0).build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = BridgeConfig::builder().max_concurrent_offloads(0).build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = BridgeConfig::builder().portal_capacity(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_blank_thread_name() {
        let result = BridgeConfig::builder().thread_name("  ").build();
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("thread_name")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_runtime_is_current_thread_with_named_workers() {
        let config = BridgeConfig::builder().thread_name("store-io").build().unwrap();
        let runtime = config.build_runtime().unwrap();
        let loop_thread = thread::current().id();

        let (flavor_is_loop, worker) = runtime.block_on(async move {
            let on_loop = core_async::runtime::is_cooperative_loop()
                && thread::current().id() == loop_thread;
            let worker = worker_thread_name().await;
            (on_loop, worker)
        });

        assert!(flavor_is_loop);
        assert_eq!(worker.as_deref(), Some("store-io"));
    }

    async fn worker_thread_name() -> Option<String> {
        core_async::run_blocking(|| thread::current().name().map(str::to_string))
            .await
            .unwrap()
    }

    #[test]
    fn test_offloader_follows_limit() {
        let unlimited = BridgeConfig::default().offloader();
        assert_eq!(unlimited.available_permits(), None);

        let limited = BridgeConfig::builder()
            .max_concurrent_offloads(3)
            .build()
            .unwrap()
            .offloader();
        assert_eq!(limited.available_permits(), Some(3));
    }
}
