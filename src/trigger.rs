//! Debounced trigger state machine.
//!
//! `Idle -> Armed -> Cooldown -> Idle`. A confident result arms an episode;
//! once the confirmation window has elapsed the episode fires exactly one
//! trigger and the machine sits out the cooldown. Incoming results while Armed
//! or in Cooldown only refresh the display hint.
//!
//! All timing is driven by the caller-supplied `now`, so the machine itself
//! never reads a clock and never spawns timers. Expiry is evaluated when a
//! step arrives.

use std::time::{Duration, Instant};

use crate::gesture::{ClassificationResult, GestureClass};

/// Default arming threshold.
pub const ARM_CONFIDENCE: f32 = 0.8;
/// How long an armed episode waits before firing.
pub const CONFIRMATION_WINDOW: Duration = Duration::from_millis(2000);
/// Quiescent period after a trigger.
pub const COOLDOWN: Duration = Duration::from_millis(4000);

#[derive(Clone, Debug, PartialEq)]
pub struct TriggerTiming {
    /// Results must exceed this confidence to arm.
    pub arm_confidence: f32,
    pub confirmation_window: Duration,
    pub cooldown: Duration,
}

impl Default for TriggerTiming {
    fn default() -> Self {
        Self {
            arm_confidence: ARM_CONFIDENCE,
            confirmation_window: CONFIRMATION_WINDOW,
            cooldown: COOLDOWN,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerPhase {
    Idle,
    Armed,
    Cooldown,
}

impl TriggerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Cooldown => "cooldown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    Idle,
    Armed {
        gesture: GestureClass,
        confidence: f32,
        since: Instant,
    },
    Cooldown {
        since: Instant,
    },
}

/// A committed gesture episode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerEvent {
    pub gesture: GestureClass,
    pub confidence: f32,
    pub timestamp: Instant,
}

/// Copy of the machine's observable state for status displays.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerSnapshot {
    pub phase: TriggerPhase,
    /// Most recent accepted result (display hint only).
    pub hint: Option<GestureClass>,
    pub hint_confidence: f32,
    /// The gesture an armed episode will fire with if no hand is seen at expiry.
    pub armed_gesture: Option<GestureClass>,
    /// Time left in the confirmation window or cooldown.
    pub remaining: Option<Duration>,
}

pub struct TriggerStateMachine {
    timing: TriggerTiming,
    state: State,
    hint: Option<(GestureClass, f32)>,
}

impl Default for TriggerStateMachine {
    fn default() -> Self {
        Self::new(TriggerTiming::default())
    }
}

impl TriggerStateMachine {
    pub fn new(timing: TriggerTiming) -> Self {
        Self {
            timing,
            state: State::Idle,
            hint: None,
        }
    }

    pub fn timing(&self) -> &TriggerTiming {
        &self.timing
    }

    pub fn phase(&self) -> TriggerPhase {
        match self.state {
            State::Idle => TriggerPhase::Idle,
            State::Armed { .. } => TriggerPhase::Armed,
            State::Cooldown { .. } => TriggerPhase::Cooldown,
        }
    }

    /// Feed one frame's result (or `None` when no hand was accepted).
    ///
    /// Returns the trigger event if this step completed an armed episode.
    pub fn step(
        &mut self,
        now: Instant,
        result: Option<ClassificationResult>,
    ) -> Option<TriggerEvent> {
        self.hint = result.map(|r| (r.gesture, r.confidence));

        match self.state {
            State::Armed {
                gesture,
                confidence,
                since,
            } => {
                if now.saturating_duration_since(since) < self.timing.confirmation_window {
                    return None;
                }
                // The frame at expiry decides; without a hand the armed gesture stands.
                let event = match result {
                    Some(current) => TriggerEvent {
                        gesture: current.gesture,
                        confidence: current.confidence,
                        timestamp: now,
                    },
                    None => TriggerEvent {
                        gesture,
                        confidence,
                        timestamp: now,
                    },
                };
                log::info!(
                    "trigger: {} fired (confidence {:.2})",
                    event.gesture,
                    event.confidence
                );
                self.state = State::Cooldown { since: now };
                Some(event)
            }
            State::Cooldown { since } => {
                if now.saturating_duration_since(since) >= self.timing.cooldown {
                    log::debug!("trigger: cooldown over");
                    self.state = State::Idle;
                    self.try_arm(now, result);
                }
                None
            }
            State::Idle => {
                self.try_arm(now, result);
                None
            }
        }
    }

    fn try_arm(&mut self, now: Instant, result: Option<ClassificationResult>) {
        if let Some(result) = result {
            if result.confidence > self.timing.arm_confidence {
                log::info!(
                    "trigger: armed with {} (confidence {:.2})",
                    result.gesture,
                    result.confidence
                );
                self.state = State::Armed {
                    gesture: result.gesture,
                    confidence: result.confidence,
                    since: now,
                };
            }
        }
    }

    /// Abandon any episode or cooldown without firing.
    pub fn cancel(&mut self) {
        if let State::Armed { gesture, .. } = self.state {
            log::info!("trigger: armed {} cancelled", gesture);
        }
        self.state = State::Idle;
        self.hint = None;
    }

    pub fn snapshot(&self, now: Instant) -> TriggerSnapshot {
        let remaining = |since: Instant, span: Duration| {
            Some(span.saturating_sub(now.saturating_duration_since(since)))
        };
        let (armed_gesture, remaining) = match self.state {
            State::Idle => (None, None),
            State::Armed { gesture, since, .. } => (
                Some(gesture),
                remaining(since, self.timing.confirmation_window),
            ),
            State::Cooldown { since } => (None, remaining(since, self.timing.cooldown)),
        };
        TriggerSnapshot {
            phase: self.phase(),
            hint: self.hint.map(|(gesture, _)| gesture),
            hint_confidence: self.hint.map_or(0.0, |(_, confidence)| confidence),
            armed_gesture,
            remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn result(gesture: GestureClass, confidence: f32, at: Instant) -> Option<ClassificationResult> {
        Some(ClassificationResult {
            gesture,
            confidence,
            timestamp: at,
        })
    }

    #[test]
    fn confident_result_arms() {
        let t0 = Instant::now();
        let mut machine = TriggerStateMachine::default();

        assert!(machine.step(t0, result(GestureClass::Fist, 0.8, t0)).is_none());
        assert_eq!(machine.phase(), TriggerPhase::Idle);

        assert!(machine.step(t0, result(GestureClass::Fist, 0.85, t0)).is_none());
        assert_eq!(machine.phase(), TriggerPhase::Armed);
        let snapshot = machine.snapshot(t0 + ms(500));
        assert_eq!(snapshot.armed_gesture, Some(GestureClass::Fist));
        assert_eq!(snapshot.remaining, Some(ms(1500)));
    }

    #[test]
    fn armed_window_fires_once_whatever_arrives() {
        let t0 = Instant::now();
        let mut machine = TriggerStateMachine::default();
        machine.step(t0, result(GestureClass::ThumbsUp, 0.85, t0));

        let inputs = [
            None,
            result(GestureClass::Fist, 0.99, t0),
            result(GestureClass::OpenPalm, 0.6, t0),
            None,
        ];
        let mut fired = 0;
        for step in 1..=150u64 {
            let now = t0 + ms(step * 33);
            if machine
                .step(now, inputs[step as usize % inputs.len()])
                .is_some()
            {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(machine.phase(), TriggerPhase::Cooldown);
    }

    #[test]
    fn expiry_uses_current_result_or_falls_back_to_armed() {
        let t0 = Instant::now();

        let mut machine = TriggerStateMachine::default();
        machine.step(t0, result(GestureClass::ThumbsUp, 0.85, t0));
        assert!(machine.step(t0 + ms(1999), None).is_none());
        let event = machine.step(t0 + ms(2000), None).unwrap();
        assert_eq!(event.gesture, GestureClass::ThumbsUp);
        assert_eq!(event.confidence, 0.85);
        assert_eq!(event.timestamp, t0 + ms(2000));

        let mut machine = TriggerStateMachine::default();
        machine.step(t0, result(GestureClass::ThumbsUp, 0.85, t0));
        let at = t0 + ms(2100);
        let event = machine
            .step(at, result(GestureClass::PeaceSign, 0.6, at))
            .unwrap();
        assert_eq!(event.gesture, GestureClass::PeaceSign);
        assert_eq!(event.confidence, 0.6);
    }

    #[test]
    fn cooldown_blocks_arming_until_it_ends() {
        let t0 = Instant::now();
        let mut machine = TriggerStateMachine::default();
        machine.step(t0, result(GestureClass::Pointing, 0.9, t0));
        let fired_at = t0 + ms(2000);
        assert!(machine.step(fired_at, None).is_some());

        for offset in (33..4000).step_by(33) {
            let now = fired_at + ms(offset);
            assert!(machine
                .step(now, result(GestureClass::OpenPalm, 0.95, now))
                .is_none());
            assert_eq!(machine.phase(), TriggerPhase::Cooldown, "at +{}ms", offset);
        }

        let now = fired_at + ms(4001);
        assert!(machine
            .step(now, result(GestureClass::OpenPalm, 0.85, now))
            .is_none());
        assert_eq!(machine.phase(), TriggerPhase::Armed);
    }

    #[test]
    fn cooldown_expiry_without_hand_returns_to_idle() {
        let t0 = Instant::now();
        let mut machine = TriggerStateMachine::default();
        machine.step(t0, result(GestureClass::Fist, 0.9, t0));
        machine.step(t0 + ms(2000), None);
        machine.step(t0 + ms(6000), None);
        assert_eq!(machine.phase(), TriggerPhase::Idle);
        assert_eq!(machine.snapshot(t0 + ms(6000)).remaining, None);
    }

    #[test]
    fn cancel_discards_armed_episode() {
        let t0 = Instant::now();
        let mut machine = TriggerStateMachine::default();
        machine.step(t0, result(GestureClass::Fist, 0.9, t0));
        machine.cancel();
        assert_eq!(machine.phase(), TriggerPhase::Idle);
        assert!(machine.step(t0 + ms(2500), None).is_none());
        assert_eq!(machine.snapshot(t0).hint, None);
    }

    #[test]
    fn hint_tracks_latest_result_in_every_phase() {
        let t0 = Instant::now();
        let mut machine = TriggerStateMachine::default();
        machine.step(t0, result(GestureClass::Fist, 0.6, t0));
        let snapshot = machine.snapshot(t0);
        assert_eq!(snapshot.phase, TriggerPhase::Idle);
        assert_eq!(snapshot.hint, Some(GestureClass::Fist));
        assert_eq!(snapshot.hint_confidence, 0.6);

        machine.step(t0, result(GestureClass::Fist, 0.9, t0));
        machine.step(t0 + ms(100), result(GestureClass::PeaceSign, 0.7, t0));
        let snapshot = machine.snapshot(t0 + ms(100));
        assert_eq!(snapshot.phase, TriggerPhase::Armed);
        assert_eq!(snapshot.hint, Some(GestureClass::PeaceSign));
        assert_eq!(snapshot.armed_gesture, Some(GestureClass::Fist));
    }

    #[test]
    fn custom_threshold_gates_arming() {
        let t0 = Instant::now();
        let mut machine = TriggerStateMachine::new(TriggerTiming {
            arm_confidence: 0.95,
            ..TriggerTiming::default()
        });
        machine.step(t0, result(GestureClass::OpenPalm, 0.9, t0));
        assert_eq!(machine.phase(), TriggerPhase::Idle);
        machine.step(t0, result(GestureClass::Pointing, 1.0, t0));
        assert_eq!(machine.phase(), TriggerPhase::Armed);
    }
}
