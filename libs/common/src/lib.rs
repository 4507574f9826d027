//! Common plumbing for VoltageEMS service binaries
//!
//! - [`logging`]: tracing subscriber bootstrap (console + rolling file)
//! - [`config_loader`]: figment-based configuration loading
//! - [`shutdown`]: graceful shutdown signal handling

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use error::{Error, Result};
