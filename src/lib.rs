//! Gesture Launcher
//!
//! Watches a camera for static hand gestures and launches the program mapped
//! to each gesture.
//!
//! # Pipeline
//!
//! 1. **Capture**: a `FrameSource` owns the camera on one acquisition thread
//!    and hands each frame to a single callback. No queue, one frame in flight.
//! 2. **Landmarks**: a `HandLandmarker` turns the frame into 21-point hand
//!    skeletons (external process or scripted poses).
//! 3. **Classification**: `gesture::classify` maps one skeleton to a
//!    `GestureClass` with a confidence, using palm-relative finger extension.
//! 4. **Trigger**: `TriggerStateMachine` debounces results. A confident gesture
//!    arms a 2 s confirmation window, fires once, then sits out a 4 s cooldown.
//! 5. **Action**: the fired gesture is resolved through the `GestureMapping`
//!    and handed to an `ActionSink`.
//!
//! `DetectionSession` wires the stages together; status readers get copies
//! through `DetectionSession::status` and `DetectionSession::latest_frame`.
//!
//! # Module Structure
//!
//! - `clock`: time source (system or manual)
//! - `frame`: owned frames and the display slot
//! - `ingest`: capture devices and the acquisition loop
//! - `landmarks`: landmark types and estimators
//! - `gesture`: the classifier
//! - `trigger`: the debounce state machine
//! - `mapping`, `action`: gesture to program resolution and launching
//! - `session`: the wired pipeline
//! - `config`: JSON file and environment configuration

pub mod action;
pub mod clock;
pub mod config;
pub mod frame;
pub mod gesture;
pub mod ingest;
pub mod landmarks;
pub mod mapping;
pub mod session;
pub mod trigger;

pub use action::{
    dispatch, ActionSink, DryRunSink, ProcessLauncher, TriggerOutcome, TriggerReport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LauncherConfig;
pub use frame::{Frame, LatestFrame, RGB_CHANNELS};
pub use gesture::{classify, select_best_hand, Classification, ClassificationResult, GestureClass};
pub use ingest::{
    list_devices, CameraControls, CaptureDevice, CaptureSettings, FrameSource, SourceStats,
    SyntheticDevice,
};
pub use landmarks::{
    DetectedHand, HandLandmarker, HandTrackingSettings, Landmark, LandmarkSet, ProcessLandmarker,
    ScriptStep, ScriptedLandmarker,
};
pub use mapping::GestureMapping;
pub use session::{DetectionSession, SessionSettings, SessionStatus};
pub use trigger::{TriggerEvent, TriggerPhase, TriggerSnapshot, TriggerStateMachine, TriggerTiming};
