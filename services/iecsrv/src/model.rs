//! Station and data point model
//!
//! Every [`DataPoint`] lives in one [`PointRegistry`] and is referenced by a
//! copyable [`PointHandle`]. A handle outlives its point safely: once the point
//! is removed the handle simply stops resolving.

mod point;
mod registry;
mod station;

pub use point::{DataPoint, PointHook, PointSnapshot, PointSpec, ReceiveHook};
pub use registry::{PointHandle, PointRegistry};
pub use station::Station;
