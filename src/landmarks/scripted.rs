//! Scripted landmark estimator.
//!
//! Replays a fixed sequence of per-frame outcomes regardless of frame content.
//! Scripts parse from `name:frames` lists such as `thumbs_up:60,none:30,error:1`,
//! where `name` is a gesture name, `none` (no hand), `unmatched` (a hand that
//! matches no gesture), or `error` (estimator failure).

use anyhow::{anyhow, Context, Result};

use super::poses::{pose_for, unmatched_pose};
use super::{DetectedHand, HandLandmarker};
use crate::frame::Frame;
use crate::gesture::GestureClass;

const SCRIPTED_SCORE: f32 = 0.95;

/// One scripted stretch of frames.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptStep {
    /// Report `hands` for the next `frames` frames.
    Hands {
        frames: u32,
        hands: Vec<DetectedHand>,
    },
    /// Fail estimation for the next `frames` frames.
    Error { frames: u32 },
}

impl ScriptStep {
    /// A single hand in the canonical pose for `gesture`, or no hand for `None`.
    pub fn gesture(gesture: Option<GestureClass>, frames: u32) -> Self {
        let hands = gesture
            .map(|gesture| {
                vec![DetectedHand {
                    landmarks: pose_for(gesture),
                    score: SCRIPTED_SCORE,
                }]
            })
            .unwrap_or_default();
        Self::Hands { frames, hands }
    }

    /// A hand that matches no gesture rule.
    pub fn unmatched(frames: u32) -> Self {
        Self::Hands {
            frames,
            hands: vec![DetectedHand {
                landmarks: unmatched_pose(),
                score: SCRIPTED_SCORE,
            }],
        }
    }

    pub fn frames(&self) -> u32 {
        match self {
            Self::Hands { frames, .. } | Self::Error { frames } => *frames,
        }
    }

    /// Parse a comma-separated `name:frames` list.
    pub fn parse_list(list: &str) -> Result<Vec<ScriptStep>> {
        let steps = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::parse_one)
            .collect::<Result<Vec<_>>>()?;
        if steps.is_empty() {
            return Err(anyhow!("landmark script is empty"));
        }
        Ok(steps)
    }

    fn parse_one(entry: &str) -> Result<ScriptStep> {
        let (name, frames) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("script step '{}' must look like name:frames", entry))?;
        let frames: u32 = frames
            .trim()
            .parse()
            .with_context(|| format!("script step '{}' has an invalid frame count", entry))?;
        match name.trim() {
            "none" => Ok(Self::gesture(None, frames)),
            "unmatched" => Ok(Self::unmatched(frames)),
            "error" => Ok(Self::Error { frames }),
            other => Ok(Self::gesture(Some(other.parse()?), frames)),
        }
    }
}

/// Estimator that replays a script, one step entry per frame.
pub struct ScriptedLandmarker {
    steps: Vec<ScriptStep>,
    step: usize,
    frame_in_step: u32,
    repeat: bool,
}

impl ScriptedLandmarker {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            step: 0,
            frame_in_step: 0,
            repeat: false,
        }
    }

    /// Loop back to the first step when the script runs out.
    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn is_finished(&self) -> bool {
        !self.repeat && self.step >= self.steps.len()
    }

    fn next_step(&mut self) -> Option<&ScriptStep> {
        loop {
            if self.step >= self.steps.len() {
                if !self.repeat || self.steps.iter().all(|s| s.frames() == 0) {
                    return None;
                }
                self.step = 0;
            }
            if self.frame_in_step < self.steps[self.step].frames() {
                self.frame_in_step += 1;
                return Some(&self.steps[self.step]);
            }
            self.step += 1;
            self.frame_in_step = 0;
        }
    }
}

impl HandLandmarker for ScriptedLandmarker {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn estimate(&mut self, frame: &Frame) -> Result<Vec<DetectedHand>> {
        match self.next_step() {
            Some(ScriptStep::Hands { hands, .. }) => Ok(hands.clone()),
            Some(ScriptStep::Error { .. }) => Err(anyhow!(
                "scripted estimator failure on frame {}",
                frame.sequence
            )),
            None => Ok(Vec::new()),
        }
    }
}
