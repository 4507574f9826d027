//! IEC 60870-5-104 server core
//!
//! ```text
//!  transport thread                 executor thread
//!  ───────────────                  ───────────────
//!  on_asdu ──▶ validate ──▶ handler ──defer──▶ selection release
//!                 │            │                auto-return
//!                 ▼            ▼                raw message hooks
//!          negative mirror  SelectionManager    point timers
//!                                               ┌ inventory (periodic)
//!                           Batch ◀─────────────┤
//!                             │                 └ selection sweep (periodic)
//!                             ▼
//!                         Transport
//! ```
//!
//! - [`types`]: type identifications, causes of transmission, qualifiers
//! - [`message`]: outgoing and inbound ASDU models
//! - [`model`]: stations and data points in a generation-checked registry
//! - [`selection`]: select-before-operate arbitration
//! - [`batch`]: grouping of monitoring points into ASDUs
//! - [`server`]: the orchestrator
//! - [`transport`]: boundary to the APDU layer

pub mod batch;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod model;
pub mod selection;
pub mod server;
pub mod transport;
pub mod types;

pub use batch::Batch;
pub use error::{IecSrvError, Result};
pub use message::{Asdu, IncomingMessage, InformationObject, RawAsdu};
pub use model::{DataPoint, PointHandle, PointSpec, Station};
pub use server::{Server, ServerOptions};
pub use transport::{ConnectionEvent, ConnectionId, RecordingTransport, Transport};
pub use types::{CauseOfTransmission, CommandMode, Quality, ResponseState, TypeId};
