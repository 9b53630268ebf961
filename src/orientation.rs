//! Latest device tilt, written by the orientation sensor and read by the
//! solver once per frame.
//!
//! The cell is a single `AtomicU64` holding the bits of an `f64`, so a read
//! never blocks and never observes a torn value. Staleness relative to the
//! frame being solved is accepted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};
use crossbeam_channel::Receiver;

/// Convert a raw sensor reading (degrees, 90 = level) into a tilt angle in
/// radians where 0 is the level horizon.
pub fn tilt_from_sensor(raw_degrees: f64) -> f64 {
    (90.0 - raw_degrees).to_radians()
}

/// Single-writer, single-reader tilt cell.
#[derive(Debug)]
pub struct OrientationTracker {
    tilt_bits: AtomicU64,
    has_sample: AtomicBool,
    default_tilt: f64,
}

impl OrientationTracker {
    /// `default_tilt` (radians) is reported until the first sample arrives,
    /// and indefinitely when no sensor is present.
    pub fn new(default_tilt: f64) -> Self {
        Self {
            tilt_bits: AtomicU64::new(default_tilt.to_bits()),
            has_sample: AtomicBool::new(false),
            default_tilt,
        }
    }

    /// Record a raw sensor reading.
    pub fn ingest_raw(&self, raw_degrees: f64) {
        self.set_tilt(tilt_from_sensor(raw_degrees));
    }

    /// Record an already-converted tilt in radians. Non-finite values are
    /// ignored.
    pub fn set_tilt(&self, radians: f64) {
        if !radians.is_finite() {
            log::warn!("ignoring non-finite orientation sample");
            return;
        }
        self.tilt_bits.store(radians.to_bits(), Ordering::Release);
        self.has_sample.store(true, Ordering::Release);
    }

    /// Current tilt in radians.
    pub fn tilt(&self) -> f64 {
        f64::from_bits(self.tilt_bits.load(Ordering::Acquire))
    }

    pub fn has_sample(&self) -> bool {
        self.has_sample.load(Ordering::Acquire)
    }

    pub fn default_tilt(&self) -> f64 {
        self.default_tilt
    }
}

/// Handle for a running sensor listener thread.
pub struct SensorListener {
    join: Option<JoinHandle<u64>>,
}

impl SensorListener {
    /// Drain raw readings from `readings` into `tracker` until the sender side
    /// disconnects.
    pub fn spawn(tracker: Arc<OrientationTracker>, readings: Receiver<f64>) -> Result<Self> {
        let join = std::thread::Builder::new()
            .name("orientation".to_string())
            .spawn(move || {
                let mut samples = 0u64;
                for raw in readings.iter() {
                    tracker.ingest_raw(raw);
                    samples += 1;
                }
                log::debug!("orientation listener stopped after {} samples", samples);
                samples
            })?;
        Ok(Self { join: Some(join) })
    }

    /// Wait for the listener to finish. Returns the number of samples ingested.
    pub fn join(mut self) -> Result<u64> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("orientation listener thread panicked")),
            None => Ok(0),
        }
    }
}
