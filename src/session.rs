//! Detection session: frame source, estimator, classifier, trigger machine and
//! action sink wired together.
//!
//! Frames are processed synchronously on the acquisition thread:
//! estimate landmarks, classify the best hand, step the trigger machine and,
//! when an episode fires, dispatch the mapped action. Status readers only take
//! short locks and copy what they need.
//!
//! Once `stop()` returns no trigger can fire for the stopped session: the
//! machine is cancelled and marked inactive under the same lock that frame
//! processing holds while stepping and dispatching. The display frame is
//! published under that lock too, so a stopped session shows no frame.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::time::{Duration, Instant};

use crate::action::{dispatch, ActionSink, TriggerReport};
use crate::clock::Clock;
use crate::frame::{Frame, LatestFrame};
use crate::gesture::select_best_hand;
use crate::ingest::{CaptureSettings, FrameSource};
use crate::landmarks::{HandLandmarker, HandTrackingSettings};
use crate::mapping::GestureMapping;
use crate::trigger::{TriggerSnapshot, TriggerStateMachine, TriggerTiming};

const ESTIMATOR_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Everything needed to start a session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSettings {
    pub capture: CaptureSettings,
    pub tracking: HandTrackingSettings,
    pub timing: TriggerTiming,
}

/// Point-in-time view of a session for status displays.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub running: bool,
    pub fps: u32,
    /// Active camera with its negotiated resolution.
    pub camera: Option<CaptureSettings>,
    pub trigger: TriggerSnapshot,
    pub last_report: Option<TriggerReport>,
    pub frames_processed: u64,
    pub estimator_errors: u64,
}

struct Detection {
    active: bool,
    machine: TriggerStateMachine,
}

struct EstimatorWarnings {
    last: Option<Instant>,
    suppressed: u64,
}

struct SessionShared {
    clock: Arc<dyn Clock>,
    landmarker: Mutex<Box<dyn HandLandmarker>>,
    sink: Mutex<Box<dyn ActionSink>>,
    mapping: RwLock<GestureMapping>,
    tracking: RwLock<HandTrackingSettings>,
    detection: Mutex<Detection>,
    latest: LatestFrame,
    last_report: Mutex<Option<TriggerReport>>,
    frames_processed: AtomicU64,
    estimator_errors: AtomicU64,
    warnings: Mutex<EstimatorWarnings>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionShared {
    fn process_frame(&self, frame: Frame) -> Option<TriggerReport> {
        if !relock(&self.detection).active {
            return None;
        }
        self.frames_processed.fetch_add(1, Ordering::Relaxed);

        let hands = {
            let mut landmarker = relock(&self.landmarker);
            match landmarker.estimate(&frame) {
                Ok(hands) => hands,
                Err(err) => {
                    self.note_estimator_error(landmarker.name(), &err);
                    Vec::new()
                }
            }
        };
        let hands = self
            .tracking
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .filter(hands);
        let result = select_best_hand(&hands, frame.captured_at);

        let mut detection = relock(&self.detection);
        if !detection.active {
            return None;
        }
        self.latest.store(frame);
        let event = detection.machine.step(self.clock.now(), result)?;

        let outcome = {
            let mapping = self.mapping.read().unwrap_or_else(PoisonError::into_inner);
            let mut sink = relock(&self.sink);
            dispatch(&event, &mapping, sink.as_mut())
        };
        drop(detection);

        let report = TriggerReport { event, outcome };
        *relock(&self.last_report) = Some(report.clone());
        Some(report)
    }

    fn note_estimator_error(&self, estimator: &str, err: &anyhow::Error) {
        self.estimator_errors.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let mut warnings = relock(&self.warnings);
        let due = warnings
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= ESTIMATOR_WARN_INTERVAL);
        if due {
            if warnings.suppressed > 0 {
                log::warn!(
                    "DetectionSession: {} estimator failed: {:#} ({} similar errors suppressed)",
                    estimator,
                    err,
                    warnings.suppressed
                );
            } else {
                log::warn!("DetectionSession: {} estimator failed: {:#}", estimator, err);
            }
            warnings.last = Some(now);
            warnings.suppressed = 0;
        } else {
            warnings.suppressed += 1;
        }
    }
}

/// A running (or startable) gesture detection pipeline.
pub struct DetectionSession {
    source: FrameSource,
    shared: Arc<SessionShared>,
}

impl DetectionSession {
    /// Session capturing through `open_device`.
    pub fn new(
        clock: Arc<dyn Clock>,
        landmarker: Box<dyn HandLandmarker>,
        sink: Box<dyn ActionSink>,
        mapping: GestureMapping,
    ) -> Self {
        let source = FrameSource::new(clock.clone());
        Self::with_source(source, clock, landmarker, sink, mapping)
    }

    /// Session over a caller-built frame source.
    pub fn with_source(
        source: FrameSource,
        clock: Arc<dyn Clock>,
        landmarker: Box<dyn HandLandmarker>,
        sink: Box<dyn ActionSink>,
        mapping: GestureMapping,
    ) -> Self {
        let shared = Arc::new(SessionShared {
            clock,
            landmarker: Mutex::new(landmarker),
            sink: Mutex::new(sink),
            mapping: RwLock::new(mapping),
            tracking: RwLock::new(HandTrackingSettings::default()),
            detection: Mutex::new(Detection {
                active: false,
                machine: TriggerStateMachine::default(),
            }),
            latest: LatestFrame::new(),
            last_report: Mutex::new(None),
            frames_processed: AtomicU64::new(0),
            estimator_errors: AtomicU64::new(0),
            warnings: Mutex::new(EstimatorWarnings {
                last: None,
                suppressed: 0,
            }),
        });
        Self { source, shared }
    }

    /// Configure the estimator, reset the trigger machine and start capture.
    ///
    /// A no-op returning `Ok` while capture is already running.
    pub fn start(&self, settings: &SessionSettings) -> Result<()> {
        if self.source.is_running() {
            log::warn!("DetectionSession: already running; start ignored");
            return Ok(());
        }
        self.activate(settings)?;

        let shared = self.shared.clone();
        self.source.set_frame_callback(move |frame| {
            shared.process_frame(frame);
        });
        if let Err(err) = self.source.start(&settings.capture) {
            self.deactivate();
            self.source.clear_frame_callback();
            return Err(err);
        }
        log::info!("DetectionSession: detection started");
        Ok(())
    }

    /// Enable the detection pipeline without starting capture.
    ///
    /// Frames are then supplied through `process_frame`. `start` calls this
    /// before opening the device.
    ///
    /// Fails without waiting if the estimator is still working on a frame
    /// from a previous run.
    pub fn activate(&self, settings: &SessionSettings) -> Result<()> {
        {
            let mut landmarker = match self.shared.landmarker.try_lock() {
                Ok(landmarker) => landmarker,
                Err(TryLockError::WouldBlock) => {
                    return Err(anyhow!(
                        "landmark estimator is still busy with a frame from a previous run"
                    ))
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(anyhow!("landmark estimator lock poisoned"))
                }
            };
            landmarker
                .configure(&settings.tracking)
                .with_context(|| format!("configure {} estimator", landmarker.name()))?;
        }
        *self
            .shared
            .tracking
            .write()
            .map_err(|_| anyhow!("tracking settings lock poisoned"))? = settings.tracking.clone();

        let mut detection = relock(&self.shared.detection);
        detection.machine = TriggerStateMachine::new(settings.timing.clone());
        detection.active = true;
        Ok(())
    }

    fn deactivate(&self) {
        let mut detection = relock(&self.shared.detection);
        detection.machine.cancel();
        detection.active = false;
    }

    /// Stop detection. Any armed episode is discarded without firing.
    ///
    /// Safe to call when not running.
    pub fn stop(&self) {
        let was_active = relock(&self.shared.detection).active;
        self.deactivate();
        self.source.stop();
        self.source.clear_frame_callback();
        self.shared.latest.clear();
        if was_active {
            log::info!("DetectionSession: detection stopped");
        }
    }

    /// Run one frame through the pipeline on the calling thread.
    ///
    /// Returns the trigger report if this frame completed an episode. Frames
    /// arriving while the session is inactive are ignored.
    pub fn process_frame(&self, frame: Frame) -> Option<TriggerReport> {
        self.shared.process_frame(frame)
    }

    pub fn is_running(&self) -> bool {
        self.source.is_running()
    }

    /// Replace the gesture mapping. Applies to the next trigger.
    pub fn set_mapping(&self, mapping: GestureMapping) {
        *self
            .shared
            .mapping
            .write()
            .unwrap_or_else(PoisonError::into_inner) = mapping;
    }

    pub fn mapping(&self) -> GestureMapping {
        self.shared
            .mapping
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent processed frame, for display.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.shared.latest.latest()
    }

    pub fn status(&self) -> SessionStatus {
        let now = self.shared.clock.now();
        let trigger = relock(&self.shared.detection).machine.snapshot(now);
        SessionStatus {
            running: self.source.is_running(),
            fps: self.source.fps(),
            camera: self.source.active_settings(),
            trigger,
            last_report: relock(&self.shared.last_report).clone(),
            frames_processed: self.shared.frames_processed.load(Ordering::Relaxed),
            estimator_errors: self.shared.estimator_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        self.stop();
    }
}
