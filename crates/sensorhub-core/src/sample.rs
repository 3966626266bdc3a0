//! Sensor sample value type.

use std::time::Instant;

/// Value carried by a sample taken before the first generation tick.
pub const SENTINEL_VALUE: i64 = -1;

/// A single sensor reading and the instant it was produced.
///
/// Samples are plain `Copy` values; a sensor replaces its current sample as a
/// whole, so readers never see a value paired with another sample's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    value: i64,
    timestamp: Instant,
}

impl Sample {
    /// Creates a sample with the given value and timestamp.
    pub fn new(value: i64, timestamp: Instant) -> Self {
        Self { value, timestamp }
    }

    /// Creates a sample stamped with the current instant.
    pub fn now(value: i64) -> Self {
        Self::new(value, Instant::now())
    }

    /// Creates the "no reading yet" placeholder.
    pub fn sentinel() -> Self {
        Self::now(SENTINEL_VALUE)
    }

    /// Returns true if this sample is the pre-start placeholder.
    pub fn is_sentinel(&self) -> bool {
        self.value == SENTINEL_VALUE
    }

    /// Returns the reading.
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Returns the instant the reading was produced.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sentinel() {
        let sample = Sample::sentinel();
        assert!(sample.is_sentinel());
        assert_eq!(sample.value(), -1);
        assert!(!Sample::now(0).is_sentinel());
    }

    #[test]
    fn test_equality_uses_timestamp() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(1);
        assert_eq!(Sample::new(3, t0), Sample::new(3, t0));
        assert_ne!(Sample::new(3, t0), Sample::new(3, t1));
    }
}
