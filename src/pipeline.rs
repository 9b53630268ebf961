//! Worker loop: queue → convert → segment → filter → solve → sinks.
//!
//! The worker thread owns every per-frame buffer. The only state shared with
//! other threads is the frame queue, the orientation cell and the counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;

use crate::broadcast::Publisher;
use crate::convert::PixelConverter;
use crate::error::FrameError;
use crate::filter::{Candidate, CandidateFilter, FilterSettings};
use crate::frame::{CaptureSize, FrameQueue, RawFrame};
use crate::orientation::OrientationTracker;
use crate::payload::TargetPayload;
use crate::segment::{HsvRange, Segmenter};
use crate::solver::{GeometrySolver, TargetEstimate};

/// Load-time constants for one capture session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    pub capture_size: CaptureSize,
    pub threshold: HsvRange,
    pub filter: FilterSettings,
    /// Focal length in pixels at `capture_size.width`.
    pub focal_px: f64,
    pub height_difference: f64,
}

/// Result of processing one frame. `estimate` is `None` when no target was
/// found, which is a normal outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    pub frame_id: u64,
    pub captured_at: Instant,
    pub candidates: Vec<Candidate>,
    pub target: Option<Candidate>,
    pub estimate: Option<TargetEstimate>,
}

/// Consumer of per-frame outcomes.
pub trait TargetSink: Send {
    fn publish(&mut self, outcome: &FrameOutcome) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Sinks
// ----------------------------------------------------------------------------

/// Sends a `TargetPayload` to broadcast subscribers for frames with a target.
pub struct BroadcastSink {
    publisher: Publisher,
}

impl BroadcastSink {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }
}

impl TargetSink for BroadcastSink {
    fn publish(&mut self, outcome: &FrameOutcome) -> Result<()> {
        if let Some(estimate) = &outcome.estimate {
            let payload = TargetPayload::from_estimate(estimate, Instant::now());
            self.publisher.send_to_all(&payload.encode());
        }
        Ok(())
    }
}

/// Logs target acquisition and loss.
#[derive(Default)]
pub struct LogSink {
    tracking: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TargetSink for LogSink {
    fn publish(&mut self, outcome: &FrameOutcome) -> Result<()> {
        match &outcome.estimate {
            Some(estimate) => {
                if !self.tracking {
                    log::info!("target acquired at frame {}", outcome.frame_id);
                }
                log::debug!(
                    "frame {}: bearing {:.4} rad, vertical {:.4} rad, range {}",
                    outcome.frame_id,
                    estimate.bearing,
                    estimate.vertical_angle,
                    estimate
                        .range
                        .map(|r| format!("{:.1}", r))
                        .unwrap_or_else(|| "undefined".to_string())
                );
                self.tracking = true;
            }
            None => {
                if self.tracking {
                    log::info!("target lost at frame {}", outcome.frame_id);
                }
                self.tracking = false;
            }
        }
        Ok(())
    }
}

/// Forwards outcomes over a channel, e.g. to an overlay renderer.
pub struct ChannelSink {
    tx: Sender<FrameOutcome>,
}

impl ChannelSink {
    pub fn new(tx: Sender<FrameOutcome>) -> Self {
        Self { tx }
    }
}

impl TargetSink for ChannelSink {
    fn publish(&mut self, outcome: &FrameOutcome) -> Result<()> {
        self.tx
            .send(outcome.clone())
            .map_err(|_| anyhow!("outcome receiver disconnected"))
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

/// Per-worker processing state. Not shared across threads.
pub struct FrameProcessor {
    converter: PixelConverter,
    segmenter: Segmenter,
    filter: CandidateFilter,
    solver: GeometrySolver,
}

impl FrameProcessor {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            converter: PixelConverter::new(cfg.capture_size),
            segmenter: Segmenter::new(cfg.threshold),
            filter: CandidateFilter::new(cfg.filter),
            solver: GeometrySolver::new(cfg.capture_size, cfg.focal_px, cfg.height_difference),
        }
    }

    /// Run one frame through the chain using `tilt` (radians).
    pub fn process(&mut self, frame: &RawFrame, tilt: f64) -> Result<FrameOutcome, FrameError> {
        let image = self.converter.convert(frame)?;
        let contours = self.segmenter.segment(image);
        let candidates = self.filter.filter(&contours);
        let target = self.filter.select(&candidates);
        let estimate = target
            .as_ref()
            .map(|c| self.solver.solve(c, tilt, frame.captured_at, frame.id));
        Ok(FrameOutcome {
            frame_id: frame.id,
            captured_at: frame.captured_at,
            candidates,
            target,
            estimate,
        })
    }
}

/// Snapshot of pipeline counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_pushed: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub targets_found: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    targets: AtomicU64,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    queue: Arc<FrameQueue>,
    orientation: Arc<OrientationTracker>,
    sinks: Vec<Box<dyn TargetSink>>,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        queue: Arc<FrameQueue>,
        orientation: Arc<OrientationTracker>,
    ) -> Self {
        Self {
            cfg,
            queue,
            orientation,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn TargetSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Start the worker thread. The queue is reopened for the new session.
    pub fn spawn(self) -> Result<PipelineHandle> {
        let Pipeline {
            cfg,
            queue,
            orientation,
            mut sinks,
        } = self;
        queue.reopen();

        let counters = Arc::new(Counters::default());
        let thread_queue = queue.clone();
        let thread_counters = counters.clone();
        let join = std::thread::Builder::new()
            .name("vision-worker".to_string())
            .spawn(move || {
                let mut processor = FrameProcessor::new(&cfg);
                let result = run_worker(
                    &mut processor,
                    &thread_queue,
                    &orientation,
                    &mut sinks,
                    &thread_counters,
                );
                if let Err(err) = &result {
                    log::error!("vision worker stopped: {}", err);
                    thread_queue.close();
                }
                result
            })?;

        log::info!(
            "vision worker started at {} (focal {:.1}px)",
            cfg.capture_size,
            cfg.focal_px
        );
        Ok(PipelineHandle {
            queue,
            counters,
            join: Some(join),
        })
    }
}

fn run_worker(
    processor: &mut FrameProcessor,
    queue: &FrameQueue,
    orientation: &OrientationTracker,
    sinks: &mut [Box<dyn TargetSink>],
    counters: &Counters,
) -> Result<(), FrameError> {
    while let Some(frame) = queue.wait_latest() {
        let outcome = processor.process(&frame, orientation.tilt())?;
        counters.processed.fetch_add(1, Ordering::Relaxed);
        if outcome.estimate.is_some() {
            counters.targets.fetch_add(1, Ordering::Relaxed);
        }
        for sink in sinks.iter_mut() {
            if let Err(err) = sink.publish(&outcome) {
                log::warn!("target sink failed on frame {}: {}", outcome.frame_id, err);
            }
        }
    }
    log::debug!("vision worker exiting");
    Ok(())
}

pub struct PipelineHandle {
    queue: Arc<FrameQueue>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<Result<(), FrameError>>>,
}

impl PipelineHandle {
    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    pub fn stats(&self) -> PipelineStats {
        let queue = self.queue.stats();
        PipelineStats {
            frames_pushed: queue.pushed,
            frames_dropped: queue.dropped,
            frames_processed: self.counters.processed.load(Ordering::Relaxed),
            targets_found: self.counters.targets.load(Ordering::Relaxed),
        }
    }

    /// `false` once the worker has exited, either after `stop` or a fatal
    /// frame error.
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Interrupt the worker and wait for it. A fatal frame error that ended
    /// the worker early is returned here.
    pub fn stop(mut self) -> Result<PipelineStats> {
        self.queue.close();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("vision worker thread panicked"))??;
        }
        Ok(self.stats())
    }
}
