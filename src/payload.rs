//! Wire record for one target estimate.
//!
//! Fixed 28 bytes, big-endian:
//!
//! | offset | type | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | i64  | latency: capture to send, milliseconds  |
//! | 8      | i32  | range, rounded; `-1` when undefined     |
//! | 12     | f64  | vertical angle, radians                 |
//! | 20     | f64  | bearing, radians                        |

use std::time::Instant;

use anyhow::{anyhow, Result};

use crate::solver::TargetEstimate;

pub const PAYLOAD_LEN: usize = 28;

/// Sentinel range sent when the target is on the camera's horizon.
pub const UNDEFINED_RANGE: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetPayload {
    pub latency_ms: i64,
    pub range: i32,
    pub vertical_angle: f64,
    pub bearing: f64,
}

impl TargetPayload {
    /// Build the record for `estimate`, measuring latency up to `now`.
    pub fn from_estimate(estimate: &TargetEstimate, now: Instant) -> Self {
        let latency = now.saturating_duration_since(estimate.captured_at);
        let range = match estimate.range {
            Some(r) if r.is_finite() && r >= 0.0 && r <= i32::MAX as f64 => r.round() as i32,
            Some(r) => {
                log::debug!("range {:.1} not representable; sending as undefined", r);
                UNDEFINED_RANGE
            }
            None => UNDEFINED_RANGE,
        };
        Self {
            latency_ms: i64::try_from(latency.as_millis()).unwrap_or(i64::MAX),
            range,
            vertical_angle: estimate.vertical_angle,
            bearing: estimate.bearing,
        }
    }

    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out[0..8].copy_from_slice(&self.latency_ms.to_be_bytes());
        out[8..12].copy_from_slice(&self.range.to_be_bytes());
        out[12..20].copy_from_slice(&self.vertical_angle.to_be_bytes());
        out[20..28].copy_from_slice(&self.bearing.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; PAYLOAD_LEN] = bytes.try_into().map_err(|_| {
            anyhow!(
                "target payload must be {} bytes, got {}",
                PAYLOAD_LEN,
                bytes.len()
            )
        })?;
        let mut i64_buf = [0u8; 8];
        let mut i32_buf = [0u8; 4];
        let mut f64_buf = [0u8; 8];

        i64_buf.copy_from_slice(&bytes[0..8]);
        let latency_ms = i64::from_be_bytes(i64_buf);
        i32_buf.copy_from_slice(&bytes[8..12]);
        let range = i32::from_be_bytes(i32_buf);
        f64_buf.copy_from_slice(&bytes[12..20]);
        let vertical_angle = f64::from_be_bytes(f64_buf);
        f64_buf.copy_from_slice(&bytes[20..28]);
        let bearing = f64::from_be_bytes(f64_buf);

        Ok(Self {
            latency_ms,
            range,
            vertical_angle,
            bearing,
        })
    }

    /// Range in the configured unit, if defined.
    pub fn range(&self) -> Option<i32> {
        (self.range >= 0).then_some(self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn estimate(range: Option<f64>, captured_at: Instant) -> TargetEstimate {
        TargetEstimate {
            bearing: -0.125,
            vertical_angle: 0.5,
            range,
            captured_at,
            frame_id: 9,
        }
    }

    #[test]
    fn layout_is_big_endian_and_fixed() {
        let payload = TargetPayload {
            latency_ms: 42,
            range: 118,
            vertical_angle: 0.5,
            bearing: -0.125,
        };
        let bytes = payload.encode();
        assert_eq!(&bytes[0..8], &[0, 0, 0, 0, 0, 0, 0, 42]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 118]);
        assert_eq!(&bytes[12..20], &0.5f64.to_be_bytes());
        assert_eq!(TargetPayload::decode(&bytes).expect("decode"), payload);
    }

    #[test]
    fn undefined_range_uses_sentinel() {
        let now = Instant::now();
        let payload = TargetPayload::from_estimate(&estimate(None, now), now);
        assert_eq!(payload.range, UNDEFINED_RANGE);
        assert_eq!(payload.range(), None);
        let bytes = payload.encode();
        assert_eq!(&bytes[8..12], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn latency_and_rounding_from_estimate() {
        let captured = Instant::now();
        let now = captured + Duration::from_millis(37);
        let payload = TargetPayload::from_estimate(&estimate(Some(112.6), captured), now);
        assert_eq!(payload.latency_ms, 37);
        assert_eq!(payload.range(), Some(113));
    }

    #[test]
    fn negative_range_is_undefined() {
        let now = Instant::now();
        let payload = TargetPayload::from_estimate(&estimate(Some(-40.0), now), now);
        assert_eq!(payload.range, UNDEFINED_RANGE);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(TargetPayload::decode(&[0u8; 27]).is_err());
    }
}
