//! Sensor hub: owns sensors and their observer threads.
//!
//! For every sensor the hub runs one observer thread that reads the sensor
//! and forwards new samples to the shared [`SampleAggregator`].

use crate::{
    Discipline, Error, Result, Sample, SampleAggregator, Sensor, SensorDescriptor, SensorHandle,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lower bound for the non-blocking poll period.
const MIN_POLL: Duration = Duration::from_micros(100);

/// Stable index of a sensor inside its hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorId(usize);

impl SensorId {
    /// Returns the position of the sensor in creation order.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A sensor and, while the hub runs, its observer thread.
struct Slot {
    sensor: Sensor,
    observer: Option<JoinHandle<()>>,
}

/// Owns a set of sensors and runs one observer thread per sensor.
///
/// Dropping the hub stops every sensor and joins all of its threads.
pub struct SensorHub {
    aggregator: Arc<SampleAggregator>,
    slots: Vec<Slot>,
    running: bool,
}

impl SensorHub {
    /// Creates an empty hub forwarding into `aggregator`.
    pub fn new(aggregator: Arc<SampleAggregator>) -> Self {
        Self {
            aggregator,
            slots: Vec::new(),
            running: false,
        }
    }

    /// Validates `descriptor` and adds the corresponding sensor.
    pub fn create_sensor(&mut self, descriptor: SensorDescriptor) -> Result<SensorId> {
        if self.running {
            return Err(Error::HubRunning);
        }
        if self.find(&descriptor.name).is_some() {
            return Err(Error::DuplicateName(descriptor.name));
        }

        let sensor = Sensor::new(descriptor)?;
        info!(
            "Created {} sensor '{}' ({:?} interval)",
            sensor.discipline(),
            sensor.name(),
            sensor.interval()
        );

        let id = SensorId(self.slots.len());
        self.slots.push(Slot {
            sensor,
            observer: None,
        });
        Ok(id)
    }

    /// Iterates over the sensors in creation order.
    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.slots.iter().map(|slot| &slot.sensor)
    }

    /// Returns the sensor with the given id.
    pub fn sensor(&self, id: SensorId) -> Option<&Sensor> {
        self.slots.get(id.0).map(|slot| &slot.sensor)
    }

    /// Looks up a sensor by name.
    pub fn find(&self, name: &str) -> Option<SensorId> {
        self.slots
            .iter()
            .position(|slot| slot.sensor.name() == name)
            .map(SensorId)
    }

    /// Returns the number of sensors.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the hub owns no sensors.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns true between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Returns the aggregator samples are forwarded to.
    pub fn aggregator(&self) -> &Arc<SampleAggregator> {
        &self.aggregator
    }

    /// Counts generation and observer threads that have not been joined.
    pub fn live_threads(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| {
                usize::from(slot.sensor.has_thread()) + usize::from(slot.observer.is_some())
            })
            .sum()
    }

    /// Starts every sensor and spawns its observer thread.
    ///
    /// If any thread fails to spawn, everything already started is stopped
    /// again and the error is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            warn!("Sensor hub already running");
            return Ok(());
        }
        self.running = true;

        for index in 0..self.slots.len() {
            if let Err(e) = self.start_slot(index) {
                error!("Failed to start sensor hub: {}", e);
                self.stop();
                return Err(e);
            }
        }

        info!("Sensor hub started with {} sensors", self.slots.len());
        Ok(())
    }

    fn start_slot(&mut self, index: usize) -> Result<()> {
        let slot = &mut self.slots[index];
        slot.sensor.start()?;

        let handle = slot.sensor.handle();
        let aggregator = Arc::clone(&self.aggregator);
        let observer = thread::Builder::new()
            .name(format!("obs-{}", handle.name()))
            .spawn(move || observe(handle, aggregator))
            .map_err(|source| Error::Spawn {
                name: slot.sensor.name().to_string(),
                source,
            })?;
        slot.observer = Some(observer);
        Ok(())
    }

    /// Stops every sensor and joins its generation and observer threads.
    ///
    /// Does nothing if the hub is not running.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        let begin = Instant::now();
        for slot in &mut self.slots {
            slot.sensor.stop();
            slot.sensor.join();
            if let Some(observer) = slot.observer.take() {
                if observer.join().is_err() {
                    error!("Observer thread for '{}' panicked", slot.sensor.name());
                }
            }
        }
        self.running = false;

        info!("Sensor hub stopped in {:?}", begin.elapsed());
    }
}

impl Drop for SensorHub {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forwards samples from one sensor, skipping placeholders and repeats.
struct Forwarder {
    name: Arc<str>,
    aggregator: Arc<SampleAggregator>,
    last: Option<Instant>,
}

impl Forwarder {
    fn offer(&mut self, sample: Sample) {
        if sample.is_sentinel() || self.last == Some(sample.timestamp()) {
            return;
        }
        self.last = Some(sample.timestamp());
        self.aggregator.queue(Arc::clone(&self.name), sample);
    }
}

/// Observer thread body.
fn observe(handle: SensorHandle, aggregator: Arc<SampleAggregator>) {
    debug!("Observer for '{}' started", handle.name());
    let mut forwarder = Forwarder {
        name: handle.shared_name(),
        aggregator,
        last: None,
    };

    match handle.discipline() {
        // `sense` paces the loop; it returns early only when the sensor stops.
        Discipline::Blocking => loop {
            forwarder.offer(handle.sense());
            if !handle.is_running() {
                break;
            }
        },
        // Poll at twice the sensor rate so a new value waits at most half
        // an interval before being forwarded.
        Discipline::NonBlocking => {
            let poll = (handle.interval() / 2).max(MIN_POLL);
            loop {
                forwarder.offer(handle.sense());
                if handle.wait_stopped(poll) {
                    break;
                }
            }
        }
    }

    // Pick up a value produced between the last read and the stop.
    forwarder.offer(handle.sense());
    debug!("Observer for '{}' exited", handle.name());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, ms: u64, discipline: Discipline) -> SensorDescriptor {
        SensorDescriptor::new(name, Duration::from_millis(ms), discipline)
    }

    fn hub() -> SensorHub {
        SensorHub::new(Arc::new(SampleAggregator::new(Instant::now())))
    }

    #[test]
    fn test_create_sensor() {
        let mut hub = hub();
        let a = hub
            .create_sensor(
                descriptor("A", 100, Discipline::NonBlocking).with_attribute("room", "lab"),
            )
            .unwrap();
        let b = hub
            .create_sensor(descriptor("B", 250, Discipline::Blocking))
            .unwrap();

        assert_eq!(hub.len(), 2);
        assert_eq!(a.index(), 0);
        assert_eq!(hub.find("B"), Some(b));

        let sensor = hub.sensor(a).unwrap();
        assert_eq!(sensor.name(), "A");
        assert_eq!(sensor.interval(), Duration::from_millis(100));
        assert_eq!(sensor.discipline(), Discipline::NonBlocking);
        assert_eq!(sensor.attributes().get("room").map(String::as_str), Some("lab"));

        let names: Vec<&str> = hub.sensors().map(Sensor::name).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_create_sensor_rejects_invalid() {
        let mut hub = hub();
        assert!(matches!(
            hub.create_sensor(descriptor("", 100, Discipline::Blocking)),
            Err(Error::EmptyName)
        ));
        assert!(matches!(
            hub.create_sensor(descriptor("A", 0, Discipline::Blocking)),
            Err(Error::ZeroInterval(_))
        ));

        hub.create_sensor(descriptor("A", 100, Discipline::Blocking))
            .unwrap();
        assert!(matches!(
            hub.create_sensor(descriptor("A", 50, Discipline::NonBlocking)),
            Err(Error::DuplicateName(_))
        ));
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_create_while_running_rejected() {
        let mut hub = hub();
        hub.create_sensor(descriptor("A", 50, Discipline::NonBlocking))
            .unwrap();
        hub.start().unwrap();
        assert!(matches!(
            hub.create_sensor(descriptor("B", 50, Discipline::NonBlocking)),
            Err(Error::HubRunning)
        ));
        hub.stop();
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let mut hub = hub();
        hub.create_sensor(descriptor("A", 50, Discipline::Blocking))
            .unwrap();
        hub.stop();
        assert!(!hub.is_running());
        assert_eq!(hub.live_threads(), 0);
    }

    #[test]
    fn test_stop_joins_all_threads() {
        let mut hub = hub();
        hub.create_sensor(descriptor("fast", 10, Discipline::NonBlocking))
            .unwrap();
        hub.create_sensor(descriptor("slow", 10_000, Discipline::Blocking))
            .unwrap();
        hub.create_sensor(descriptor("slow-nb", 10_000, Discipline::NonBlocking))
            .unwrap();

        hub.start().unwrap();
        assert!(hub.is_running());
        assert_eq!(hub.live_threads(), 6);
        thread::sleep(Duration::from_millis(50));

        let begin = Instant::now();
        hub.stop();
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert_eq!(hub.live_threads(), 0);
        assert!(hub.sensors().all(|s| !s.is_running()));
    }

    #[test]
    fn test_non_blocking_forwarding_skips_repeats() {
        let mut hub = hub();
        hub.create_sensor(descriptor("A", 20, Discipline::NonBlocking))
            .unwrap();
        hub.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        hub.stop();

        let entries = hub.aggregator().drain();
        assert!(entries.len() >= 5, "only {} entries", entries.len());
        assert!(entries.iter().all(|e| !e.sample.is_sentinel()));
        for pair in entries.windows(2) {
            assert_ne!(pair[0].sample.timestamp(), pair[1].sample.timestamp());
            assert!(pair[1].sample.value() > pair[0].sample.value());
        }
        assert_eq!(entries[0].sample.value(), 0);
    }

    #[test]
    fn test_blocking_forwarding_increases() {
        let mut hub = hub();
        hub.create_sensor(descriptor("B", 30, Discipline::Blocking))
            .unwrap();
        hub.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        hub.stop();

        let values: Vec<i64> = hub
            .aggregator()
            .drain()
            .iter()
            .map(|e| e.sample.value())
            .collect();
        assert!(values.len() >= 5, "{:?}", values);
        assert_eq!(values[0], 0);
        for pair in values.windows(2) {
            assert!(pair[1] > pair[0], "{:?}", values);
        }
    }

    #[test]
    fn test_end_to_end_run() {
        let aggregator = Arc::new(SampleAggregator::new(Instant::now()));
        let mut hub = SensorHub::new(Arc::clone(&aggregator));
        hub.create_sensor(descriptor("A", 100, Discipline::NonBlocking))
            .unwrap();
        hub.create_sensor(descriptor("B", 250, Discipline::Blocking))
            .unwrap();

        hub.start().unwrap();
        thread::sleep(Duration::from_secs(1));
        hub.stop();

        let entries = aggregator.drain();
        let count = |name: &str| entries.iter().filter(|e| &*e.producer == name).count();
        assert!((7..=10).contains(&count("A")), "A: {}", count("A"));
        assert!((2..=4).contains(&count("B")), "B: {}", count("B"));

        for entry in &entries {
            let elapsed = entry
                .sample
                .timestamp()
                .duration_since(aggregator.started_at());
            assert!(elapsed <= Duration::from_millis(1100), "{:?}", elapsed);
        }

        let text = aggregator.render(&entries);
        let first_a = text
            .lines()
            .find(|line| line.contains("'A'"))
            .unwrap();
        assert!(first_a.starts_with("[0.1"), "{}", first_a);
        assert!(first_a.ends_with("s] 'A': 0"), "{}", first_a);
        assert_eq!(text.lines().count(), entries.len());
    }

    #[test]
    fn test_drop_running_hub() {
        let aggregator = Arc::new(SampleAggregator::new(Instant::now()));
        let mut hub = SensorHub::new(Arc::clone(&aggregator));
        hub.create_sensor(descriptor("B", 10_000, Discipline::Blocking))
            .unwrap();
        hub.start().unwrap();

        let begin = Instant::now();
        drop(hub);
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert_eq!(Arc::strong_count(&aggregator), 1);
    }
}
