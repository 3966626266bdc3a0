//! Sensor Hub Core
//!
//! Concurrent sampling engine: simulated sensors that generate readings on
//! their own background threads, a hub that runs one observer thread per
//! sensor, and a thread-safe aggregator that orders samples for output.

pub mod aggregator;
pub mod error;
pub mod hub;
pub mod sample;
pub mod sensor;
pub mod sink;

pub use aggregator::{AggregatorStats, Entry, SampleAggregator};
pub use error::{Error, Result};
pub use hub::{SensorHub, SensorId};
pub use sample::Sample;
pub use sensor::{Discipline, Sensor, SensorDescriptor, SensorHandle};
pub use sink::Sink;

/// Decimal places used for elapsed seconds in rendered log lines.
pub const RENDER_PRECISION: usize = 4;
