//! Bullseye
//!
//! Monocular vision targeting pipeline. Camera frames are thresholded in HSV,
//! connected regions are fitted with rotated rectangles and filtered by area
//! and aspect ratio, and the surviving target is projected through a pinhole
//! model (corrected for device tilt) into a bearing and range.
//!
//! # Architecture
//!
//! ```text
//! capture ─push─▶ FrameQueue ─▶ PixelConverter ─▶ Segmenter ─▶ CandidateFilter
//!                                                                   │
//!                  OrientationTracker ──tilt──▶ GeometrySolver ◀────┘
//!                                                     │
//!                                   TargetSink (broadcast, log, channel)
//! ```
//!
//! The pipeline guarantees:
//!
//! 1. **Latest wins**: the queue holds at most one frame; a newer capture
//!    replaces an unconsumed one and superseded frames are never processed.
//! 2. **Worker-owned buffers**: conversion and segmentation scratch space lives
//!    on the worker thread only.
//! 3. **Non-blocking tilt**: orientation is a single atomic cell; the solver
//!    never waits on the sensor.
//! 4. **Fire-once bring-up**: `InitSequencer` runs each session step exactly
//!    once, when the last of its prerequisites arrives, in any order.
//!
//! # Module Structure
//!
//! - `frame`: capture units and the latest-wins `FrameQueue`
//! - `convert`: 4:2:0 YUV to RGB
//! - `segment`: HSV threshold and external contours
//! - `rect`: convex hull and minimum-area rotated rectangles
//! - `filter`: candidate filtering and selection strategies
//! - `solver`: bearing and range
//! - `orientation`: device tilt cell and sensor listener
//! - `lifecycle`: session state machine and its driver
//! - `camera`: capture-size negotiation and optics
//! - `pipeline`: worker thread and sinks
//! - `payload`, `broadcast`: network record and WebSocket publisher
//! - `ingest`: synthetic frame source
//! - `config`: file and environment configuration

pub mod broadcast;
pub mod camera;
pub mod config;
pub mod convert;
pub mod error;
pub mod filter;
pub mod frame;
pub mod ingest;
pub mod lifecycle;
pub mod orientation;
pub mod payload;
pub mod pipeline;
pub mod rect;
pub mod segment;
pub mod solver;

pub use broadcast::{BroadcastConfig, BroadcastHandle, Publisher, TargetBroadcaster};
pub use camera::{negotiate_capture_size, CameraOptics, CaptureSettings};
pub use config::BullseyeConfig;
pub use convert::{PixelConverter, RgbImage};
pub use error::FrameError;
pub use filter::{Candidate, CandidateFilter, FilterSettings, SelectionStrategy};
pub use frame::{CaptureSize, FrameQueue, PlaneLayout, RawFrame};
pub use ingest::{SyntheticCapture, SyntheticConfig};
pub use lifecycle::{
    CameraHost, InitSequencer, LifecycleDriver, LifecycleEvent, SessionAction, SessionInfo, Stage,
};
pub use orientation::{OrientationTracker, SensorListener};
pub use payload::TargetPayload;
pub use pipeline::{
    BroadcastSink, ChannelSink, FrameOutcome, FrameProcessor, LogSink, Pipeline, PipelineConfig,
    PipelineHandle, PipelineStats, TargetSink,
};
pub use rect::{Point, RotatedRect};
pub use segment::{HsvRange, Segmenter};
pub use solver::{GeometrySolver, TargetEstimate};
