use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::path::Path;

use crate::broadcast::{BroadcastConfig, DEFAULT_BROADCAST_ADDR};
use crate::camera::{CameraOptics, CaptureSettings, DEFAULT_MAX_CAPTURE};
use crate::filter::{
    FilterSettings, SelectionStrategy, DEFAULT_EXPECTED_RATIO, DEFAULT_MIN_AREA,
    DEFAULT_RATIO_TOLERANCE,
};
use crate::frame::{CaptureSize, PlaneLayout};
use crate::pipeline::PipelineConfig;
use crate::segment::HsvRange;
use crate::solver::DEFAULT_HEIGHT_DIFFERENCE;

const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_HSV_LOW: [u8; 3] = [60, 90, 150];
const DEFAULT_HSV_HIGH: [u8; 3] = [85, 255, 255];
const DEFAULT_SENSOR_WIDTH_MM: f64 = 4.8;
const DEFAULT_SENSOR_HEIGHT_MM: f64 = 3.6;
const DEFAULT_FOCAL_LENGTH_MM: f64 = 4.0;
const DEFAULT_TILT_DEG: f64 = 0.0;
const MAX_HUE: u8 = 180;

#[derive(Debug, Deserialize, Default)]
struct BullseyeConfigFile {
    capture: Option<CaptureConfigFile>,
    camera: Option<CameraConfigFile>,
    threshold: Option<ThresholdConfigFile>,
    filter: Option<FilterConfigFile>,
    geometry: Option<GeometryConfigFile>,
    broadcast: Option<BroadcastConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    max_width: Option<u32>,
    max_height: Option<u32>,
    target_fps: Option<u32>,
    layout: Option<PlaneLayout>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    sensor_width_mm: Option<f64>,
    sensor_height_mm: Option<f64>,
    focal_length_mm: Option<f64>,
    exposure_ns: Option<u64>,
    iso: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdConfigFile {
    low: Option<[u8; 3]>,
    high: Option<[u8; 3]>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    min_area: Option<f64>,
    expected_ratio: Option<f64>,
    ratio_tolerance: Option<f64>,
    selection: Option<SelectionStrategy>,
}

#[derive(Debug, Deserialize, Default)]
struct GeometryConfigFile {
    height_difference: Option<f64>,
    default_tilt_deg: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct BroadcastConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BullseyeConfig {
    pub capture: CaptureConfig,
    pub camera: CameraConfig,
    pub threshold: HsvRange,
    pub filter: FilterSettings,
    pub geometry: GeometryConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Upper bound for capture-size negotiation.
    pub max_size: CaptureSize,
    pub target_fps: u32,
    pub layout: PlaneLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct CameraConfig {
    pub optics: CameraOptics,
    pub settings: CaptureSettings,
}

#[derive(Debug, Clone, Copy)]
pub struct GeometryConfig {
    pub height_difference: f64,
    /// Tilt used while no orientation sample is available.
    pub default_tilt_deg: f64,
}

impl GeometryConfig {
    pub fn default_tilt(&self) -> f64 {
        self.default_tilt_deg.to_radians()
    }
}

impl Default for BullseyeConfig {
    fn default() -> Self {
        // Defaults are valid by construction.
        Self::from_file(BullseyeConfigFile::default())
    }
}

impl BullseyeConfig {
    /// Load from the file named by `BULLSEYE_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BULLSEYE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as `load` with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BullseyeConfigFile) -> Self {
        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureConfig {
            max_size: CaptureSize::new(
                capture_file.max_width.unwrap_or(DEFAULT_MAX_CAPTURE.width),
                capture_file.max_height.unwrap_or(DEFAULT_MAX_CAPTURE.height),
            ),
            target_fps: capture_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            layout: capture_file.layout.unwrap_or_default(),
        };

        let camera_file = file.camera.unwrap_or_default();
        let default_settings = CaptureSettings::default();
        let camera = CameraConfig {
            optics: CameraOptics {
                sensor_width_mm: camera_file
                    .sensor_width_mm
                    .unwrap_or(DEFAULT_SENSOR_WIDTH_MM),
                sensor_height_mm: camera_file
                    .sensor_height_mm
                    .unwrap_or(DEFAULT_SENSOR_HEIGHT_MM),
                focal_length_mm: camera_file
                    .focal_length_mm
                    .unwrap_or(DEFAULT_FOCAL_LENGTH_MM),
            },
            settings: CaptureSettings {
                exposure_ns: camera_file
                    .exposure_ns
                    .unwrap_or(default_settings.exposure_ns),
                iso: camera_file.iso.unwrap_or(default_settings.iso),
            },
        };

        let threshold_file = file.threshold.unwrap_or_default();
        let threshold = HsvRange::new(
            threshold_file.low.unwrap_or(DEFAULT_HSV_LOW),
            threshold_file.high.unwrap_or(DEFAULT_HSV_HIGH),
        );

        let filter_file = file.filter.unwrap_or_default();
        let filter = FilterSettings {
            min_area: filter_file.min_area.unwrap_or(DEFAULT_MIN_AREA),
            expected_ratio: filter_file.expected_ratio.unwrap_or(DEFAULT_EXPECTED_RATIO),
            ratio_tolerance: filter_file
                .ratio_tolerance
                .unwrap_or(DEFAULT_RATIO_TOLERANCE),
            strategy: filter_file.selection.unwrap_or_default(),
        };

        let geometry_file = file.geometry.unwrap_or_default();
        let geometry = GeometryConfig {
            height_difference: geometry_file
                .height_difference
                .unwrap_or(DEFAULT_HEIGHT_DIFFERENCE),
            default_tilt_deg: geometry_file.default_tilt_deg.unwrap_or(DEFAULT_TILT_DEG),
        };

        let broadcast = BroadcastConfig {
            addr: file
                .broadcast
                .and_then(|b| b.addr)
                .unwrap_or_else(|| DEFAULT_BROADCAST_ADDR.to_string()),
        };

        Self {
            capture,
            camera,
            threshold,
            filter,
            geometry,
            broadcast,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("BULLSEYE_BROADCAST_ADDR") {
            if !addr.trim().is_empty() {
                self.broadcast.addr = addr.trim().to_string();
            }
        }
        if let Some(min_area) = env_f64("BULLSEYE_MIN_AREA")? {
            self.filter.min_area = min_area;
        }
        if let Ok(selection) = std::env::var("BULLSEYE_SELECTION") {
            if !selection.trim().is_empty() {
                self.filter.strategy = selection.parse()?;
            }
        }
        if let Some(height) = env_f64("BULLSEYE_HEIGHT_DIFFERENCE")? {
            self.geometry.height_difference = height;
        }
        if let Some(tilt) = env_f64("BULLSEYE_DEFAULT_TILT_DEG")? {
            self.geometry.default_tilt_deg = tilt;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let HsvRange { low, high } = self.threshold;
        for channel in 0..3 {
            if low[channel] > high[channel] {
                bail!(
                    "threshold low {:?} exceeds high {:?} in channel {}",
                    low,
                    high,
                    channel
                );
            }
        }
        if high[0] > MAX_HUE {
            bail!("threshold hue must be at most {}, got {}", MAX_HUE, high[0]);
        }

        let filter = &self.filter;
        if filter.min_area.is_nan() || filter.min_area < 0.0 {
            bail!("filter min_area must be non-negative, got {}", filter.min_area);
        }
        if !(filter.ratio_tolerance > 0.0 && filter.ratio_tolerance < filter.expected_ratio) {
            bail!(
                "filter ratio_tolerance must be in (0, {}), got {}",
                filter.expected_ratio,
                filter.ratio_tolerance
            );
        }

        let optics = &self.camera.optics;
        for (name, value) in [
            ("sensor_width_mm", optics.sensor_width_mm),
            ("sensor_height_mm", optics.sensor_height_mm),
            ("focal_length_mm", optics.focal_length_mm),
        ] {
            if !value.is_finite() || value <= 0.0 {
                bail!("camera {} must be positive, got {}", name, value);
            }
        }

        if self.capture.max_size.width == 0 || self.capture.max_size.height == 0 {
            bail!("capture size must be nonzero, got {}", self.capture.max_size);
        }
        if self.capture.target_fps == 0 {
            bail!("capture target_fps must be greater than zero");
        }
        if !self.geometry.height_difference.is_finite() {
            bail!("geometry height_difference must be finite");
        }
        if !self.geometry.default_tilt_deg.is_finite() {
            bail!("geometry default_tilt_deg must be finite");
        }
        Ok(())
    }

    /// Pipeline constants for a session at the negotiated `size`.
    pub fn pipeline_config(&self, size: CaptureSize) -> PipelineConfig {
        PipelineConfig {
            capture_size: size,
            threshold: self.threshold,
            filter: self.filter,
            focal_px: self.camera.optics.focal_length_px(size.width),
            height_difference: self.geometry.height_difference,
        }
    }
}

fn env_f64(key: &str) -> Result<Option<f64>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value: f64 = raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be a number, got '{}'", key, raw))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<BullseyeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
