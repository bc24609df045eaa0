//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the data store bridge crates:
//! - Logging and tracing setup
//! - Bridge configuration and construction of the cooperative loop
//!
//! ## Overview
//!
//! Library crates only emit `tracing` events; applications decide where they
//! go by calling [`logging::init_logging`] once at startup. Sizing of the
//! worker pool, the offload limiter and the callback portal is collected in
//! [`config::BridgeConfig`].

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
