//! Hand landmark input contract.
//!
//! Landmark estimation (image to 21 keypoints) happens outside this crate. The
//! pipeline only consumes `LandmarkSet`s through the `HandLandmarker` trait:
//! - `ProcessLandmarker`: external estimator process over stdin/stdout
//! - `ScriptedLandmarker`: replays scripted poses (tests, demos)
//!
//! A frame with no visible hand yields an empty `Vec`, never an empty set.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub mod poses;
pub mod process;
pub mod scripted;

pub use process::ProcessLandmarker;
pub use scripted::{ScriptStep, ScriptedLandmarker};

/// Number of keypoints in one hand.
pub const LANDMARK_COUNT: usize = 21;

// Anatomical layout of the 21 keypoints.
pub const WRIST: usize = 0;
pub const THUMB_CMC: usize = 1;
pub const THUMB_MCP: usize = 2;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_PIP: usize = 6;
pub const INDEX_DIP: usize = 7;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_DIP: usize = 11;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_PIP: usize = 14;
pub const RING_DIP: usize = 15;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_PIP: usize = 18;
pub const PINKY_DIP: usize = 19;
pub const PINKY_TIP: usize = 20;

/// One keypoint. `x`/`y` are normalized to frame width/height, `z` is relative depth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in normalized 3-D space.
    pub fn distance(&self, other: &Landmark) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Exactly 21 keypoints for one hand, indexed by the constants above.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    points: [Landmark; LANDMARK_COUNT],
}

impl LandmarkSet {
    pub fn new(points: [Landmark; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    /// Build from a slice; fails unless it holds exactly 21 points.
    pub fn from_slice(points: &[Landmark]) -> Result<Self> {
        let points: [Landmark; LANDMARK_COUNT] = points.try_into().map_err(|_| {
            anyhow!(
                "landmark set needs {} points, got {}",
                LANDMARK_COUNT,
                points.len()
            )
        })?;
        Ok(Self { points })
    }

    pub fn point(&self, index: usize) -> Landmark {
        self.points[index]
    }

    pub fn points(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.points
    }

    pub fn is_finite(&self) -> bool {
        self.points.iter().all(Landmark::is_finite)
    }
}

/// One hand reported by the estimator.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedHand {
    pub landmarks: LandmarkSet,
    /// Estimator detection score (0..=1).
    pub score: f32,
}

/// Settings forwarded to the landmark estimator.
#[derive(Clone, Debug, PartialEq)]
pub struct HandTrackingSettings {
    /// Hands scoring below this are dropped.
    pub min_detection_confidence: f32,
    /// Tracking confidence hint for estimators that track across frames.
    pub min_tracking_confidence: f32,
    /// At most this many hands are considered per frame.
    pub max_hands: usize,
}

impl Default for HandTrackingSettings {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.7,
            min_tracking_confidence: 0.5,
            max_hands: 2,
        }
    }
}

impl HandTrackingSettings {
    /// Drop hands below the detection floor and keep the best `max_hands`.
    pub fn filter(&self, mut hands: Vec<DetectedHand>) -> Vec<DetectedHand> {
        hands.retain(|hand| hand.score >= self.min_detection_confidence);
        hands.sort_by(|a, b| b.score.total_cmp(&a.score));
        hands.truncate(self.max_hands);
        hands
    }
}

/// Landmark estimator.
///
/// Implementations receive the frame read-only and must not retain it.
pub trait HandLandmarker: Send {
    /// Estimator identifier.
    fn name(&self) -> &'static str;

    /// Estimate landmarks for every hand visible in `frame`.
    fn estimate(&mut self, frame: &Frame) -> Result<Vec<DetectedHand>>;

    /// Optional hook to receive tracking settings before the first frame.
    fn configure(&mut self, _settings: &HandTrackingSettings) -> Result<()> {
        Ok(())
    }
}
