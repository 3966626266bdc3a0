//! Simulated sensors.
//!
//! Every sensor owns one background generation thread that produces an
//! incrementing reading once per interval. Observers read it through
//! [`SensorHandle::sense`], whose blocking behavior depends on the
//! sensor's [`Discipline`].

use crate::{Error, Result, Sample};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// How `sense` behaves for a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discipline {
    /// `sense` waits until the sensor produces a new reading.
    Blocking,
    /// `sense` returns the latest reading immediately.
    NonBlocking,
}

impl FromStr for Discipline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "blocking" => Ok(Discipline::Blocking),
            "nonblocking" | "non-blocking" | "non_blocking" => Ok(Discipline::NonBlocking),
            _ => Err(Error::UnknownDiscipline(s.to_string())),
        }
    }
}

impl std::fmt::Display for Discipline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Discipline::Blocking => write!(f, "blocking"),
            Discipline::NonBlocking => write!(f, "non-blocking"),
        }
    }
}

/// Description of one sensor, as produced by the configuration loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescriptor {
    /// Sensor name, unique within a hub.
    pub name: String,
    /// Sampling period.
    pub interval: Duration,
    /// Sensing discipline.
    pub discipline: Discipline,
    /// Extra attributes carried along but not interpreted.
    pub attributes: BTreeMap<String, String>,
}

impl SensorDescriptor {
    /// Creates a descriptor without extra attributes.
    pub fn new(name: &str, interval: Duration, discipline: Discipline) -> Self {
        Self {
            name: name.to_string(),
            interval,
            discipline,
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an extra attribute.
    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    /// Checks the name and interval.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::EmptyName);
        }
        if self.interval.is_zero() {
            return Err(Error::ZeroInterval(self.name.clone()));
        }
        Ok(())
    }
}

/// State shared between a sensor, its generation thread and its observers.
#[derive(Debug)]
struct Core {
    name: Arc<str>,
    interval: Duration,
    discipline: Discipline,
    state: Mutex<State>,
    /// Woken when a blocking sensor produces a sample, and on stop.
    fresh: Condvar,
    /// Woken on stop.
    stopped: Condvar,
}

#[derive(Debug)]
struct State {
    running: bool,
    current: Sample,
}

impl Core {
    /// Generation loop body. Runs until `running` is cleared.
    fn generate(&self) {
        let mut state = self.state.lock();
        while state.running {
            let deadline = Instant::now() + self.interval;
            while state.running && Instant::now() < deadline {
                self.stopped.wait_until(&mut state, deadline);
            }
            if !state.running {
                break;
            }

            let next = state.current.value() + 1;
            state.current = Sample::now(next);
            if self.discipline == Discipline::Blocking {
                self.fresh.notify_all();
            }
        }
    }
}

/// A simulated sensor producing an incrementing reading.
///
/// Dropping a sensor stops it and joins its generation thread.
pub struct Sensor {
    core: Arc<Core>,
    attributes: BTreeMap<String, String>,
    generator: Option<JoinHandle<()>>,
}

impl Sensor {
    /// Creates a stopped sensor from a descriptor.
    pub fn new(descriptor: SensorDescriptor) -> Result<Self> {
        descriptor.validate()?;
        Ok(Self {
            core: Arc::new(Core {
                name: Arc::from(descriptor.name),
                interval: descriptor.interval,
                discipline: descriptor.discipline,
                state: Mutex::new(State {
                    running: false,
                    current: Sample::sentinel(),
                }),
                fresh: Condvar::new(),
                stopped: Condvar::new(),
            }),
            attributes: descriptor.attributes,
            generator: None,
        })
    }

    /// Returns the sensor name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Returns the sampling period.
    pub fn interval(&self) -> Duration {
        self.core.interval
    }

    /// Returns the sensing discipline.
    pub fn discipline(&self) -> Discipline {
        self.core.discipline
    }

    /// Returns the extra attributes from the descriptor.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Returns true while the generation loop is active.
    pub fn is_running(&self) -> bool {
        self.core.state.lock().running
    }

    /// Returns a handle observers can use from other threads.
    pub fn handle(&self) -> SensorHandle {
        SensorHandle {
            core: Arc::clone(&self.core),
        }
    }

    /// Reads the sensor according to its discipline.
    pub fn sense(&self) -> Sample {
        self.handle().sense()
    }

    /// Starts the generation loop. Does nothing if already running.
    ///
    /// A restarted sensor continues counting from its last value.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        // Reap a previous loop that was stopped but never joined.
        self.join();

        self.core.state.lock().running = true;
        let core = Arc::clone(&self.core);
        let spawned = thread::Builder::new()
            .name(format!("gen-{}", self.core.name))
            .spawn(move || {
                debug!("Generation loop for '{}' started", core.name);
                core.generate();
                debug!("Generation loop for '{}' exited", core.name);
            });

        match spawned {
            Ok(handle) => {
                self.generator = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.core.state.lock().running = false;
                Err(Error::Spawn {
                    name: self.name().to_string(),
                    source,
                })
            }
        }
    }

    /// Signals the generation loop to exit and wakes any waiting observer.
    ///
    /// Does not wait for the thread; call [`Sensor::join`] afterwards.
    pub fn stop(&self) {
        let mut state = self.core.state.lock();
        state.running = false;
        self.core.fresh.notify_all();
        self.core.stopped.notify_all();
    }

    /// Waits for a stopped generation loop to exit.
    ///
    /// Has no effect while the sensor is still running.
    pub fn join(&mut self) {
        if self.is_running() {
            warn!("Refusing to join running sensor '{}'", self.name());
            return;
        }
        if let Some(handle) = self.generator.take() {
            if handle.join().is_err() {
                error!("Generation thread for '{}' panicked", self.name());
            }
        }
    }

    /// Returns true if a generation thread exists that has not been joined.
    pub fn has_thread(&self) -> bool {
        self.generator.is_some()
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.core.name)
            .field("interval", &self.core.interval)
            .field("discipline", &self.core.discipline)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Cloneable, thread-safe view of a sensor used by observer threads.
#[derive(Debug, Clone)]
pub struct SensorHandle {
    core: Arc<Core>,
}

impl SensorHandle {
    /// Returns the sensor name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Returns the shared sensor name.
    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.core.name)
    }

    /// Returns the sampling period.
    pub fn interval(&self) -> Duration {
        self.core.interval
    }

    /// Returns the sensing discipline.
    pub fn discipline(&self) -> Discipline {
        self.core.discipline
    }

    /// Returns true while the generation loop is active.
    pub fn is_running(&self) -> bool {
        self.core.state.lock().running
    }

    /// Reads the sensor.
    ///
    /// Non-blocking sensors return the current sample, which is the sentinel
    /// before the first tick. Blocking sensors wait for a sample newer than
    /// the one current at call time; if the sensor is stopped (or was never
    /// started) they return the current sample instead of waiting.
    pub fn sense(&self) -> Sample {
        let mut state = self.core.state.lock();
        if self.core.discipline == Discipline::NonBlocking {
            return state.current;
        }

        let seen = state.current;
        while state.running && state.current == seen {
            self.core.fresh.wait(&mut state);
        }
        state.current
    }

    /// Sleeps for up to `timeout`, returning early if the sensor stops.
    ///
    /// Returns true if the sensor is stopped.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.core.state.lock();
        while state.running {
            if self.core.stopped.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        !state.running
    }
}
