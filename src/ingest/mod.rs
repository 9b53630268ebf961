//! Frame sources.
//!
//! Hardware capture lives with the camera collaborator; it only has to
//! produce `RawFrame`s and push them into the `FrameQueue`. This module holds
//! the synthetic source used by `bullseyed` and the integration tests when no
//! camera is attached.

pub mod synthetic;

pub use synthetic::{SyntheticCapture, SyntheticConfig, SyntheticStats, DEFAULT_TARGET_COLOUR};
