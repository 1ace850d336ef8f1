//! Landmark-to-gesture classification.
//!
//! The classifier is a pure function of one `LandmarkSet`. All thresholds are
//! relative to palm size (wrist to middle-finger MCP), so results do not depend
//! on hand size or distance from the camera.
//!
//! Rules are evaluated in a fixed priority order, specific gestures first and
//! the open hand last:
//!
//! | rule | gesture | confidence |
//! |------|---------|------------|
//! | nothing extended | `Fist` | 0.9 |
//! | thumb only | `ThumbsUp` | share of {thumb} met |
//! | index, not middle/ring/pinky | `Pointing` | share of {index, ¬middle, ¬ring, ¬pinky} met |
//! | index + middle, not ring/pinky | `PeaceSign` | share of {index, middle, ¬ring, ¬pinky} met |
//! | all five | `OpenPalm` | 0.9 |
//! | anything else | none | 0.0 |

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::landmarks::{
    DetectedHand, LandmarkSet, INDEX_PIP, INDEX_TIP, MIDDLE_MCP, MIDDLE_PIP, MIDDLE_TIP,
    PINKY_PIP, PINKY_TIP, RING_PIP, RING_TIP, THUMB_TIP, WRIST,
};

/// Finger extension margin, as a fraction of palm size.
pub const FINGER_MARGIN: f32 = 0.35;
/// Thumb extension margin, as a fraction of palm size.
pub const THUMB_MARGIN: f32 = 0.15;
/// Confidence assigned to the fixed-confidence rules (fist, open palm).
pub const FIXED_RULE_CONFIDENCE: f32 = 0.9;
/// Results at or below this confidence never reach the trigger pipeline.
pub const ACCEPT_CONFIDENCE: f32 = 0.5;

const DEGENERATE_SCALE: f32 = 1e-6;

/// Recognized hand poses. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureClass {
    OpenPalm,
    Fist,
    PeaceSign,
    ThumbsUp,
    Pointing,
}

impl GestureClass {
    pub const COUNT: usize = 5;

    pub const ALL: [GestureClass; Self::COUNT] = [
        GestureClass::OpenPalm,
        GestureClass::Fist,
        GestureClass::PeaceSign,
        GestureClass::ThumbsUp,
        GestureClass::Pointing,
    ];

    /// Stable name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenPalm => "open_palm",
            Self::Fist => "fist",
            Self::PeaceSign => "peace_sign",
            Self::ThumbsUp => "thumbs_up",
            Self::Pointing => "pointing",
        }
    }

    /// Human-readable label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenPalm => "Open Palm",
            Self::Fist => "Fist",
            Self::PeaceSign => "Peace Sign",
            Self::ThumbsUp => "Thumbs Up",
            Self::Pointing => "Pointing",
        }
    }

    /// Position in `ALL`; used to index fixed-size tables.
    pub fn index(self) -> usize {
        match self {
            Self::OpenPalm => 0,
            Self::Fist => 1,
            Self::PeaceSign => 2,
            Self::ThumbsUp => 3,
            Self::Pointing => 4,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|gesture| gesture.as_str() == name.trim())
    }
}

impl fmt::Display for GestureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GestureClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| {
            anyhow!(
                "unknown gesture '{}' (expected one of open_palm, fist, peace_sign, thumbs_up, pointing)",
                s
            )
        })
    }
}

/// Which digits are extended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FingerExtension {
    pub thumb: bool,
    pub index: bool,
    pub middle: bool,
    pub ring: bool,
    pub pinky: bool,
}

impl FingerExtension {
    /// Measure extension from landmarks. Returns `None` for non-finite input.
    pub fn measure(landmarks: &LandmarkSet) -> Option<Self> {
        if !landmarks.is_finite() {
            return None;
        }
        let wrist = landmarks.point(WRIST);
        let to_wrist = |index: usize| landmarks.point(index).distance(&wrist);

        let palm = to_wrist(MIDDLE_MCP);
        let scale = if palm < DEGENERATE_SCALE { 1.0 } else { palm };

        let finger = |tip: usize, pip: usize| to_wrist(tip) - to_wrist(pip) > FINGER_MARGIN * scale;
        Some(Self {
            thumb: to_wrist(THUMB_TIP) - palm > THUMB_MARGIN * scale,
            index: finger(INDEX_TIP, INDEX_PIP),
            middle: finger(MIDDLE_TIP, MIDDLE_PIP),
            ring: finger(RING_TIP, RING_PIP),
            pinky: finger(PINKY_TIP, PINKY_PIP),
        })
    }

    fn any_finger(&self) -> bool {
        self.index || self.middle || self.ring || self.pinky
    }

    fn all(&self) -> bool {
        self.thumb && self.index && self.middle && self.ring && self.pinky
    }
}

/// Output of classifying one hand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
    /// `None` when no rule matched.
    pub gesture: Option<GestureClass>,
    pub confidence: f32,
}

impl Classification {
    pub const NONE: Classification = Classification {
        gesture: None,
        confidence: 0.0,
    };

    fn matched(gesture: GestureClass, confidence: f32) -> Self {
        Self {
            gesture: Some(gesture),
            confidence,
        }
    }
}

/// An accepted classification for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassificationResult {
    pub gesture: GestureClass,
    pub confidence: f32,
    /// Capture instant of the source frame.
    pub timestamp: Instant,
}

/// Classify one hand.
pub fn classify(landmarks: &LandmarkSet) -> Classification {
    let Some(ext) = FingerExtension::measure(landmarks) else {
        log::debug!("classifier: non-finite landmarks treated as no gesture");
        return Classification::NONE;
    };

    if !ext.thumb && !ext.any_finger() {
        return Classification::matched(GestureClass::Fist, FIXED_RULE_CONFIDENCE);
    }
    if ext.thumb && !ext.any_finger() {
        return Classification::matched(GestureClass::ThumbsUp, share_met(&[ext.thumb]));
    }
    if ext.index && !(ext.middle || ext.ring || ext.pinky) {
        return Classification::matched(
            GestureClass::Pointing,
            share_met(&[ext.index, !ext.middle, !ext.ring, !ext.pinky]),
        );
    }
    if ext.index && ext.middle && !ext.ring && !ext.pinky {
        return Classification::matched(
            GestureClass::PeaceSign,
            share_met(&[ext.index, ext.middle, !ext.ring, !ext.pinky]),
        );
    }
    if ext.all() {
        return Classification::matched(GestureClass::OpenPalm, FIXED_RULE_CONFIDENCE);
    }
    Classification::NONE
}

fn share_met(criteria: &[bool]) -> f32 {
    let met = criteria.iter().filter(|&&c| c).count();
    met as f32 / criteria.len().max(1) as f32
}

/// Classify every hand and keep the most confident accepted one.
///
/// Hands matching no rule, or at or below `ACCEPT_CONFIDENCE`, are discarded.
pub fn select_best_hand(hands: &[DetectedHand], timestamp: Instant) -> Option<ClassificationResult> {
    hands
        .iter()
        .filter_map(|hand| {
            let classification = classify(&hand.landmarks);
            let gesture = classification.gesture?;
            (classification.confidence > ACCEPT_CONFIDENCE).then_some(ClassificationResult {
                gesture,
                confidence: classification.confidence,
                timestamp,
            })
        })
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}
