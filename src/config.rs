use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::gesture::GestureClass;
use crate::ingest::{CameraControls, CaptureSettings};
use crate::landmarks::HandTrackingSettings;
use crate::mapping::GestureMapping;
use crate::session::SessionSettings;
use crate::trigger::{TriggerTiming, ARM_CONFIDENCE};

const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.7;
const DEFAULT_MIN_TRACKING_CONFIDENCE: f32 = 0.5;
const DEFAULT_MAX_HANDS: usize = 2;
const DEFAULT_LOG_LEVEL: &str = "info";
const LOG_LEVELS: [&str; 6] = ["error", "warn", "info", "debug", "trace", "off"];

#[derive(Debug, Deserialize, Default)]
struct LauncherConfigFile {
    camera: Option<CameraConfigFile>,
    gesture_detection: Option<DetectionConfigFile>,
    gesture_mappings: Option<BTreeMap<String, String>>,
    landmarker: Option<LandmarkerConfigFile>,
    logging: Option<LoggingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    index: Option<u32>,
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    brightness: Option<f32>,
    contrast: Option<f32>,
    saturation: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    min_confidence: Option<f32>,
    min_tracking_confidence: Option<f32>,
    max_hands: Option<usize>,
    gesture_threshold: Option<f32>,
    detection_enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct LandmarkerConfigFile {
    command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingConfigFile {
    level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    /// Gesture name to action, for every gesture (`""` when unmapped).
    pub gesture_mappings: BTreeMap<String, String>,
    /// Program and arguments of an external landmark estimator.
    pub landmarker_command: Option<Vec<String>>,
    /// Default `env_logger` filter; `RUST_LOG` still takes precedence.
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub index: u32,
    /// Explicit device, overriding `index` (e.g. "/dev/video2", "stub://demo").
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Image controls in 0.0..=1.0; `None` keeps the device's value.
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub min_confidence: f32,
    pub min_tracking_confidence: f32,
    pub max_hands: usize,
    /// Arming threshold for the trigger machine.
    pub gesture_threshold: f32,
    pub detection_enabled: bool,
}

impl LauncherConfig {
    /// Defaults, then the file named by `GESTURE_LAUNCHER_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GESTURE_LAUNCHER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        Self::build(file_cfg.unwrap_or_default())
    }

    /// Like `load`, but from an explicit file.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::build(read_config_file(path)?)
    }

    fn build(file: LauncherConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LauncherConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let detection = file.gesture_detection.unwrap_or_default();

        let mut gesture_mappings: BTreeMap<String, String> = GestureClass::ALL
            .into_iter()
            .map(|gesture| (gesture.as_str().to_string(), String::new()))
            .collect();
        gesture_mappings.extend(file.gesture_mappings.unwrap_or_default());

        Self {
            camera: CameraSettings {
                index: camera.index.unwrap_or(DEFAULT_CAMERA_INDEX),
                device: camera.device.filter(|device| !device.trim().is_empty()),
                width: camera.width.unwrap_or(DEFAULT_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_HEIGHT),
                fps: camera.fps.unwrap_or(DEFAULT_FPS),
                brightness: camera.brightness,
                contrast: camera.contrast,
                saturation: camera.saturation,
            },
            detection: DetectionSettings {
                min_confidence: detection.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                min_tracking_confidence: detection
                    .min_tracking_confidence
                    .unwrap_or(DEFAULT_MIN_TRACKING_CONFIDENCE),
                max_hands: detection.max_hands.unwrap_or(DEFAULT_MAX_HANDS),
                gesture_threshold: detection.gesture_threshold.unwrap_or(ARM_CONFIDENCE),
                detection_enabled: detection.detection_enabled.unwrap_or(true),
            },
            gesture_mappings,
            landmarker_command: file
                .landmarker
                .and_then(|landmarker| landmarker.command)
                .filter(|command| !command.is_empty()),
            log_level: file
                .logging
                .and_then(|logging| logging.level)
                .map(|level| level.trim().to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(index) = std::env::var("GESTURE_LAUNCHER_CAMERA_INDEX") {
            self.camera.index = index.trim().parse().map_err(|_| {
                anyhow!("GESTURE_LAUNCHER_CAMERA_INDEX must be a non-negative integer")
            })?;
        }
        if let Ok(device) = std::env::var("GESTURE_LAUNCHER_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = Some(device);
            }
        }
        if let Ok(fps) = std::env::var("GESTURE_LAUNCHER_FPS") {
            self.camera.fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("GESTURE_LAUNCHER_FPS must be an integer frame rate"))?;
        }
        if let Ok(command) = std::env::var("GESTURE_LAUNCHER_LANDMARKER") {
            let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            if !argv.is_empty() {
                self.landmarker_command = Some(argv);
            }
        }
        if let Ok(mappings) = std::env::var("GESTURE_LAUNCHER_MAPPINGS") {
            for entry in split_csv(&mappings) {
                let (gesture, action) = entry.split_once('=').ok_or_else(|| {
                    anyhow!(
                        "GESTURE_LAUNCHER_MAPPINGS entry '{}' must look like gesture=action",
                        entry
                    )
                })?;
                self.gesture_mappings
                    .insert(gesture.trim().to_string(), action.trim().to_string());
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        for (name, value) in [
            ("min_confidence", self.detection.min_confidence),
            (
                "min_tracking_confidence",
                self.detection.min_tracking_confidence,
            ),
            ("gesture_threshold", self.detection.gesture_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        for (name, value) in [
            ("brightness", self.camera.brightness),
            ("contrast", self.camera.contrast),
            ("saturation", self.camera.saturation),
        ] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(anyhow!("camera {} must be within [0, 1], got {}", name, value));
                }
            }
        }
        if self.detection.max_hands == 0 {
            return Err(anyhow!("max_hands must be at least 1"));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(anyhow!(
                "logging level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level
            ));
        }
        for name in self.gesture_mappings.keys() {
            if GestureClass::from_name(name).is_none() {
                return Err(anyhow!("unknown gesture '{}' in gesture_mappings", name));
            }
        }
        Ok(())
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        let mut settings = CaptureSettings::for_index(
            self.camera.index,
            self.camera.width,
            self.camera.height,
            self.camera.fps,
        );
        if let Some(device) = &self.camera.device {
            settings.device = device.clone();
        }
        settings.controls = CameraControls {
            brightness: self.camera.brightness,
            contrast: self.camera.contrast,
            saturation: self.camera.saturation,
        };
        settings
    }

    pub fn tracking_settings(&self) -> HandTrackingSettings {
        HandTrackingSettings {
            min_detection_confidence: self.detection.min_confidence,
            min_tracking_confidence: self.detection.min_tracking_confidence,
            max_hands: self.detection.max_hands,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            capture: self.capture_settings(),
            tracking: self.tracking_settings(),
            timing: TriggerTiming {
                arm_confidence: self.detection.gesture_threshold,
                ..TriggerTiming::default()
            },
        }
    }

    pub fn mapping(&self) -> Result<GestureMapping> {
        GestureMapping::from_names(
            self.gesture_mappings
                .iter()
                .map(|(name, action)| (name.as_str(), action.as_str())),
        )
    }
}

fn read_config_file(path: &Path) -> Result<LauncherConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
