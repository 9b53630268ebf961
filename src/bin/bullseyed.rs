//! bullseyed - vision targeting daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by --config or BULLSEYE_CONFIG, then env)
//! 2. Starts the WebSocket broadcaster for target payloads
//! 3. Drives the camera session through the lifecycle state machine
//! 4. Runs the vision worker on frames from the synthetic capture source
//! 5. Feeds orientation samples into the tilt cell (unless --no-sensor)
//! 6. Logs pipeline health every 5 seconds until Ctrl-C or --seconds elapses

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bullseye::broadcast::{BroadcastHandle, Publisher};
use bullseye::config::BullseyeConfig;
use bullseye::lifecycle::Flow;
use bullseye::{
    negotiate_capture_size, BroadcastSink, CameraHost, CaptureSize, FrameQueue, LifecycleDriver,
    LifecycleEvent, LogSink, OrientationTracker, Pipeline, PipelineHandle, SensorListener,
    SessionAction, SessionInfo, Stage, SyntheticCapture, SyntheticConfig, TargetBroadcaster,
};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const EVENT_POLL: Duration = Duration::from_millis(200);
const SENSOR_PERIOD: Duration = Duration::from_millis(20);
/// Raw sensor reading for a camera pitched 10 degrees up.
const SIMULATED_SENSOR_DEG: f64 = 80.0;
const SWEEP_PX_PER_FRAME: f64 = 4.0;

/// Output sizes the simulated camera offers, largest first.
const OFFERED_SIZES: [CaptureSize; 5] = [
    CaptureSize::new(1920, 1080),
    CaptureSize::new(1280, 960),
    CaptureSize::new(1280, 720),
    CaptureSize::new(640, 480),
    CaptureSize::new(320, 240),
];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "BULLSEYE_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    seconds: Option<u64>,
    /// Synthetic capture rate; defaults to capture.target_fps.
    #[arg(long)]
    fps: Option<u32>,
    /// Run without the orientation sensor (fixed default tilt).
    #[arg(long)]
    no_sensor: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = BullseyeConfig::load_from(args.config.as_deref())?;
    let fps = args.fps.unwrap_or(config.capture.target_fps);
    if fps == 0 {
        bail!("fps must be >= 1");
    }

    let broadcaster = TargetBroadcaster::new(config.broadcast.clone()).spawn()?;

    let orientation = Arc::new(OrientationTracker::new(config.geometry.default_tilt()));
    let sensor = if args.no_sensor {
        log::warn!(
            "orientation sensor disabled; using default tilt {:.1} deg",
            config.geometry.default_tilt_deg
        );
        None
    } else {
        Some(SimulatedSensor::spawn(orientation.clone())?)
    };

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let host = SyntheticHost {
        config: config.clone(),
        fps,
        events: event_tx.clone(),
        queue: Arc::new(FrameQueue::new()),
        orientation: orientation.clone(),
        publisher: broadcaster.publisher(),
        pipeline: None,
        capture: None,
    };
    let mut driver = LifecycleDriver::new(host);

    log::info!(
        "bullseyed running. broadcasting on ws://{} at up to {} fps",
        broadcaster.addr,
        fps
    );
    // Permission and consent flows belong to the platform; the daemon holds them.
    event_tx
        .send(LifecycleEvent::PermissionsGranted)
        .map_err(|_| anyhow!("lifecycle channel closed"))?;

    let result = run(&mut driver, &event_rx, &shutdown, args.seconds, &broadcaster);

    log::info!("shutting down");
    driver.handle(LifecycleEvent::Shutdown);
    if let Some(sensor) = sensor {
        let samples = sensor.stop()?;
        log::info!("orientation samples ingested: {}", samples);
    }
    broadcaster.stop()?;
    result
}

fn run(
    driver: &mut LifecycleDriver<SyntheticHost>,
    events: &Receiver<LifecycleEvent>,
    shutdown: &AtomicBool,
    seconds: Option<u64>,
    broadcaster: &BroadcastHandle,
) -> Result<()> {
    let started = Instant::now();
    let deadline = seconds.map(|s| started + Duration::from_secs(s));
    let mut last_health_log = Instant::now();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown signal received");
            return Ok(());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("run time elapsed");
            return Ok(());
        }

        match events.recv_timeout(EVENT_POLL) {
            Ok(event) => {
                if driver.handle(event) == Flow::Exit {
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }

        if driver.host().worker_failed() {
            driver.handle(LifecycleEvent::SessionFailed(
                "vision worker stopped".to_string(),
            ));
            bail!("vision worker stopped on a fatal frame error");
        }

        if last_health_log.elapsed() >= HEALTH_INTERVAL {
            match driver.host().pipeline.as_ref() {
                Some(pipeline) => {
                    let stats = pipeline.stats();
                    log::info!(
                        "pipeline frames={} dropped={} processed={} targets={} subscribers={}",
                        stats.frames_pushed,
                        stats.frames_dropped,
                        stats.frames_processed,
                        stats.targets_found,
                        broadcaster.subscriber_count()
                    );
                }
                None => log::info!(
                    "pipeline idle, waiting for {:?}",
                    waiting_on(driver)
                ),
            }
            last_health_log = Instant::now();
        }
    }
}

fn waiting_on(driver: &LifecycleDriver<SyntheticHost>) -> Vec<Stage> {
    let reached = driver.sequencer().reached();
    Stage::ALL
        .into_iter()
        .filter(|s| !reached.contains(*s))
        .collect()
}

// ----------------------------------------------------------------------------
// Synthetic camera host
// ----------------------------------------------------------------------------

struct CaptureThread {
    running: Arc<AtomicBool>,
    join: JoinHandle<Result<u64>>,
}

/// Camera collaborator backed by `SyntheticCapture`. Completion of each
/// action is reported back on the lifecycle channel, as hardware callbacks
/// would be.
struct SyntheticHost {
    config: BullseyeConfig,
    fps: u32,
    events: Sender<LifecycleEvent>,
    queue: Arc<FrameQueue>,
    orientation: Arc<OrientationTracker>,
    publisher: Publisher,
    pipeline: Option<PipelineHandle>,
    capture: Option<CaptureThread>,
}

impl SyntheticHost {
    fn notify(&self, event: LifecycleEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| anyhow!("lifecycle channel closed"))
    }

    fn worker_failed(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|p| !p.is_running())
    }

    fn start_capture(&mut self, size: CaptureSize) -> Result<()> {
        let mut synthetic = SyntheticConfig::for_size(size);
        synthetic.layout = self.config.capture.layout;
        synthetic.sweep_px_per_frame = SWEEP_PX_PER_FRAME;
        let mut source = SyntheticCapture::new(synthetic)?;
        source.connect()?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let queue = self.queue.clone();
        let interval = Duration::from_secs_f64(1.0 / self.fps as f64);
        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                while thread_running.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    queue.push(source.next_frame()?);
                    if let Some(rest) = interval.checked_sub(started.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
                Ok(source.stats().frames_captured)
            })?;
        self.capture = Some(CaptureThread { running, join });
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<()> {
        if let Some(capture) = self.capture.take() {
            capture.running.store(false, Ordering::SeqCst);
            let frames = capture
                .join
                .join()
                .map_err(|_| anyhow!("capture thread panicked"))??;
            log::info!("capture stopped after {} frames", frames);
        }
        Ok(())
    }
}

impl CameraHost for SyntheticHost {
    fn perform(&mut self, action: SessionAction, session: &SessionInfo) -> Result<()> {
        match action {
            SessionAction::LoadVisionLibrary => self.notify(LifecycleEvent::VisionLibraryLoaded),
            SessionAction::CalculateCaptureSize => {
                let size = negotiate_capture_size(&OFFERED_SIZES, self.config.capture.max_size)
                    .ok_or_else(|| anyhow!("camera offers no capture sizes"))?;
                self.notify(LifecycleEvent::CaptureSizeCalculated(size))
            }
            SessionAction::OpenCamera => self.notify(LifecycleEvent::CameraOpened),
            SessionAction::InitializeViews => self.notify(LifecycleEvent::SurfaceReady),
            SessionAction::InitializeCapture => {
                let size = session
                    .capture_size
                    .ok_or_else(|| anyhow!("capture initialized before size negotiation"))?;
                let settings = self.config.camera.settings;
                log::info!(
                    "capture session {}: exposure {} ns, iso {}",
                    size,
                    settings.exposure_ns,
                    settings.iso
                );
                let handle = Pipeline::new(
                    self.config.pipeline_config(size),
                    self.queue.clone(),
                    self.orientation.clone(),
                )
                .with_sink(Box::new(BroadcastSink::new(self.publisher.clone())))
                .with_sink(Box::new(LogSink::new()))
                .spawn()?;
                self.pipeline = Some(handle);
                self.notify(LifecycleEvent::CaptureSessionConfigured)
            }
            SessionAction::StartCapture => {
                let size = session
                    .capture_size
                    .ok_or_else(|| anyhow!("capture started before size negotiation"))?;
                self.start_capture(size)?;
                self.notify(LifecycleEvent::CaptureStarted)
            }
            SessionAction::StopCapture => self.stop_capture(),
            SessionAction::CloseCaptureSession => {
                if let Some(pipeline) = self.pipeline.take() {
                    let stats = pipeline.stop()?;
                    log::info!(
                        "capture session closed: processed={} dropped={} targets={}",
                        stats.frames_processed,
                        stats.frames_dropped,
                        stats.targets_found
                    );
                }
                Ok(())
            }
            SessionAction::ReleaseViews => {
                log::debug!("preview surface released");
                Ok(())
            }
            SessionAction::CloseCamera => {
                log::info!("camera closed");
                Ok(())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Simulated orientation sensor
// ----------------------------------------------------------------------------

struct SimulatedSensor {
    running: Arc<AtomicBool>,
    feeder: JoinHandle<()>,
    listener: SensorListener,
}

impl SimulatedSensor {
    fn spawn(tracker: Arc<OrientationTracker>) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let listener = SensorListener::spawn(tracker, rx)?;
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let feeder = std::thread::Builder::new()
            .name("sensor-sim".to_string())
            .spawn(move || {
                let started = Instant::now();
                while thread_running.load(Ordering::SeqCst) {
                    let wobble = 0.5 * started.elapsed().as_secs_f64().sin();
                    if tx.send(SIMULATED_SENSOR_DEG + wobble).is_err() {
                        break;
                    }
                    std::thread::sleep(SENSOR_PERIOD);
                }
            })?;
        Ok(Self {
            running,
            feeder,
            listener,
        })
    }

    fn stop(self) -> Result<u64> {
        self.running.store(false, Ordering::SeqCst);
        self.feeder
            .join()
            .map_err(|_| anyhow!("sensor feeder thread panicked"))?;
        self.listener.join()
    }
}
