//! Thread-safe sample aggregation.
//!
//! Observer threads queue `(producer, sample)` pairs concurrently; a single
//! consumer periodically drains them in timestamp order and renders them as
//! log lines relative to the program start instant.

use crate::{Result, Sample, Sink, RENDER_PRECISION};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A queued sample tagged with the name of the sensor that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub producer: Arc<str>,
    pub sample: Sample,
}

impl Entry {
    fn timeline_cmp(&self, other: &Self) -> CmpOrdering {
        self.sample
            .timestamp()
            .cmp(&other.sample.timestamp())
            .then_with(|| self.producer.cmp(&other.producer))
            .then_with(|| self.sample.value().cmp(&other.sample.value()))
    }
}

/// Lifetime counters of an aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Entries queued since creation.
    pub queued: u64,
    /// Entries handed out by drains since creation.
    pub drained: u64,
}

/// Mailbox collecting samples from many producers for one consumer.
#[derive(Debug)]
pub struct SampleAggregator {
    started_at: Instant,
    entries: Mutex<Vec<Entry>>,
    queued: AtomicU64,
    drained: AtomicU64,
}

impl SampleAggregator {
    /// Creates an aggregator measuring elapsed time from `started_at`.
    pub fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            entries: Mutex::new(Vec::new()),
            queued: AtomicU64::new(0),
            drained: AtomicU64::new(0),
        }
    }

    /// Returns the program start instant.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Appends a sample. Safe to call from any number of threads.
    pub fn queue(&self, producer: impl Into<Arc<str>>, sample: Sample) {
        let entry = Entry {
            producer: producer.into(),
            sample,
        };
        let mut entries = self.entries.lock();
        entries.push(entry);
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes every queued entry, sorted by ascending timestamp.
    ///
    /// Ties are broken by producer name, then value. Entries returned here
    /// are never returned again.
    pub fn drain(&self) -> Vec<Entry> {
        let mut drained = {
            let mut entries = self.entries.lock();
            self.drained
                .fetch_add(entries.len() as u64, Ordering::Relaxed);
            std::mem::take(&mut *entries)
        };
        drained.sort_by(Entry::timeline_cmp);
        drained
    }

    /// Formats one entry as `[elapsed s] 'producer': value`.
    pub fn render_entry(&self, entry: &Entry) -> String {
        let elapsed = entry
            .sample
            .timestamp()
            .saturating_duration_since(self.started_at)
            .as_secs_f64();
        format!(
            "[{:.*}s] '{}': {}",
            RENDER_PRECISION,
            elapsed,
            entry.producer,
            entry.sample.value()
        )
    }

    /// Formats entries one per line.
    pub fn render(&self, entries: &[Entry]) -> String {
        let mut out = String::new();
        for entry in entries {
            out.push_str(&self.render_entry(entry));
            out.push('\n');
        }
        out
    }

    /// Drains and renders in one step.
    pub fn drain_rendered(&self) -> String {
        let entries = self.drain();
        self.render(&entries)
    }

    /// Drains, renders and hands the text to `sink`.
    ///
    /// Returns the number of entries written. Nothing is written when the
    /// aggregator is empty.
    pub fn flush_into(&self, sink: &mut dyn Sink) -> Result<usize> {
        let entries = self.drain();
        if entries.is_empty() {
            return Ok(0);
        }
        let text = self.render(&entries);
        sink.consume(&text)?;
        debug!("Flushed {} entries", entries.len());
        Ok(entries.len())
    }

    /// Returns the number of entries waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns lifetime counters.
    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            queued: self.queued.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
        }
    }
}
