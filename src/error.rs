//! Typed errors for the frame path.
//!
//! Everything else in the crate uses `anyhow`. Frame errors are typed so the
//! worker can tell a session-fatal configuration fault from a normal
//! "no target this frame" outcome.

use thiserror::Error;

use crate::frame::PlaneLayout;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{layout:?} plane count mismatch: expected {expected}, got {got}")]
    PlaneCount {
        layout: PlaneLayout,
        expected: usize,
        got: usize,
    },
    #[error("{layout:?} plane {index} length mismatch: expected {expected}, got {got}")]
    PlaneLength {
        layout: PlaneLayout,
        index: usize,
        expected: usize,
        got: usize,
    },
    #[error("frame dimensions overflow: {width}x{height}")]
    DimensionOverflow { width: u32, height: u32 },
    #[error("frame size {got_width}x{got_height} does not match session size {width}x{height}")]
    SessionSize {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
}
