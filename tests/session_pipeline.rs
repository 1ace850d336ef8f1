use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use gesture_launcher::{
    ActionSink, CaptureDevice, CaptureSettings, Clock, DetectedHand, DetectionSession, Frame,
    FrameSource, GestureClass, GestureMapping, HandLandmarker, ManualClock, ScriptStep,
    ScriptedLandmarker, SessionSettings,
    SyntheticDevice, SystemClock, TriggerOutcome, TriggerPhase, TriggerTiming, RGB_CHANNELS,
};

#[derive(Clone, Default)]
struct RecordingSink {
    launched: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }
}

impl ActionSink for RecordingSink {
    fn launch(&mut self, action: &str) -> Result<()> {
        self.launched.lock().unwrap().push(action.to_string());
        if self.fail {
            return Err(anyhow!("{}: no such program", action));
        }
        Ok(())
    }
}

/// Blocks inside `estimate` until released (or 20 s pass).
struct StuckLandmarker {
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

impl HandLandmarker for StuckLandmarker {
    fn name(&self) -> &'static str {
        "stuck"
    }

    fn estimate(&mut self, _frame: &Frame) -> Result<Vec<DetectedHand>> {
        let _ = self.entered.send(());
        let _ = self.release.recv_timeout(Duration::from_secs(20));
        Ok(Vec::new())
    }
}

/// Scripted estimator that takes `delay` per frame.
struct SlowLandmarker {
    inner: ScriptedLandmarker,
    delay: Duration,
}

impl HandLandmarker for SlowLandmarker {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn estimate(&mut self, frame: &Frame) -> Result<Vec<DetectedHand>> {
        std::thread::sleep(self.delay);
        self.inner.estimate(frame)
    }
}

fn scripted(script: &str) -> Box<ScriptedLandmarker> {
    Box::new(ScriptedLandmarker::new(
        ScriptStep::parse_list(script).expect("valid script"),
    ))
}

fn media_player_mapping() -> GestureMapping {
    let mut mapping = GestureMapping::new();
    mapping.set(GestureClass::ThumbsUp, "media_player");
    mapping
}

fn frame_at(clock: &ManualClock, sequence: u64) -> Frame {
    Frame::new(vec![0u8; 48], 4, 4, RGB_CHANNELS, sequence, clock.now()).expect("frame")
}

#[test]
fn thumbs_up_launches_once_then_cools_down() {
    let clock = Arc::new(ManualClock::new());
    let sink = RecordingSink::default();
    let session = DetectionSession::new(
        clock.clone(),
        scripted("thumbs_up:1,none:20,open_palm:100"),
        Box::new(sink.clone()),
        media_player_mapping(),
    );
    session
        .activate(&SessionSettings::default())
        .expect("activate");

    let mut sequence = 0;
    let mut next = |advance_ms: u64| {
        clock.advance(Duration::from_millis(advance_ms));
        sequence += 1;
        session.process_frame(frame_at(&clock, sequence))
    };

    assert!(next(0).is_none());
    assert_eq!(session.status().trigger.phase, TriggerPhase::Armed);

    for _ in 0..19 {
        assert!(next(100).is_none());
    }
    let report = next(100).expect("trigger at the end of the window");
    assert_eq!(report.event.gesture, GestureClass::ThumbsUp);
    assert_eq!(
        report.outcome,
        TriggerOutcome::Launched {
            action: "media_player".to_string()
        }
    );
    assert_eq!(sink.launched(), vec!["media_player".to_string()]);

    // Open palm is held throughout the cooldown without arming.
    for _ in 0..39 {
        assert!(next(100).is_none());
        assert_eq!(session.status().trigger.phase, TriggerPhase::Cooldown);
    }
    assert!(next(101).is_none());
    let status = session.status();
    assert_eq!(status.trigger.phase, TriggerPhase::Armed);
    assert_eq!(status.trigger.armed_gesture, Some(GestureClass::OpenPalm));
    assert_eq!(sink.launched().len(), 1);
}

#[test]
fn stopping_while_armed_never_fires() {
    let clock = Arc::new(ManualClock::new());
    let sink = RecordingSink::default();
    let session = DetectionSession::new(
        clock.clone(),
        scripted("thumbs_up:100"),
        Box::new(sink.clone()),
        media_player_mapping(),
    );
    session
        .activate(&SessionSettings::default())
        .expect("activate");

    assert!(session.process_frame(frame_at(&clock, 1)).is_none());
    clock.advance(Duration::from_millis(1000));
    session.stop();

    clock.advance(Duration::from_millis(2000));
    assert!(session.process_frame(frame_at(&clock, 2)).is_none());
    clock.advance(Duration::from_millis(5000));
    assert!(session.process_frame(frame_at(&clock, 3)).is_none());

    let status = session.status();
    assert_eq!(status.trigger.phase, TriggerPhase::Idle);
    assert!(status.last_report.is_none());
    assert!(sink.launched().is_empty());
}

#[test]
fn launch_failure_still_consumes_the_episode() {
    let clock = Arc::new(ManualClock::new());
    let sink = RecordingSink::failing();
    let session = DetectionSession::new(
        clock.clone(),
        scripted("thumbs_up:100"),
        Box::new(sink.clone()),
        media_player_mapping(),
    );
    session
        .activate(&SessionSettings::default())
        .expect("activate");

    session.process_frame(frame_at(&clock, 1));
    clock.advance(Duration::from_millis(2000));
    let report = session
        .process_frame(frame_at(&clock, 2))
        .expect("trigger");
    match report.outcome {
        TriggerOutcome::LaunchFailed { action, error } => {
            assert_eq!(action, "media_player");
            assert!(error.contains("no such program"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(session.status().trigger.phase, TriggerPhase::Cooldown);
}

#[test]
fn mapping_can_be_replaced_between_triggers() {
    let clock = Arc::new(ManualClock::new());
    let sink = RecordingSink::default();
    let session = DetectionSession::new(
        clock.clone(),
        scripted("fist:100"),
        Box::new(sink.clone()),
        GestureMapping::new(),
    );
    session
        .activate(&SessionSettings::default())
        .expect("activate");

    session.process_frame(frame_at(&clock, 1));
    let mut mapping = GestureMapping::new();
    mapping.set(GestureClass::Fist, "terminal");
    session.set_mapping(mapping.clone());
    assert_eq!(session.mapping(), mapping);

    clock.advance(Duration::from_millis(2000));
    let report = session.process_frame(frame_at(&clock, 2)).expect("trigger");
    assert_eq!(
        report.outcome,
        TriggerOutcome::Launched {
            action: "terminal".to_string()
        }
    );
}

#[test]
fn starting_twice_opens_one_device() {
    let opened = Arc::new(AtomicUsize::new(0));
    let counter = opened.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = FrameSource::with_opener(clock.clone(), move |settings, clock| {
        counter.fetch_add(1, Ordering::SeqCst);
        let device: Box<dyn CaptureDevice> =
            Box::new(SyntheticDevice::open(settings.clone(), clock)?);
        Ok(device)
    });
    let session = DetectionSession::with_source(
        source,
        clock,
        scripted("none:1"),
        Box::new(RecordingSink::default()),
        GestureMapping::new(),
    );
    let settings = SessionSettings {
        capture: CaptureSettings {
            device: "stub://idempotent".to_string(),
            width: 16,
            height: 12,
            target_fps: 30,
            ..CaptureSettings::default()
        },
        ..SessionSettings::default()
    };

    session.start(&settings).expect("first start");
    session.start(&settings).expect("second start is a no-op");
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert!(session.is_running());
    assert_eq!(
        session.status().camera.map(|camera| (camera.width, camera.height)),
        Some((16, 12))
    );

    session.stop();
    assert!(!session.is_running());
    session.stop();
}

#[test]
fn start_reports_unavailable_device() {
    let session = DetectionSession::new(
        Arc::new(SystemClock),
        scripted("none:1"),
        Box::new(RecordingSink::default()),
        GestureMapping::new(),
    );
    let settings = SessionSettings {
        capture: CaptureSettings {
            device: "stub://unavailable".to_string(),
            ..CaptureSettings::default()
        },
        ..SessionSettings::default()
    };
    assert!(session.start(&settings).is_err());
    assert!(!session.is_running());
    assert_eq!(session.status().trigger.phase, TriggerPhase::Idle);
}

#[test]
fn synthetic_camera_drives_a_live_trigger() {
    let sink = RecordingSink::default();
    let session = DetectionSession::new(
        Arc::new(SystemClock),
        Box::new(
            ScriptedLandmarker::new(vec![ScriptStep::gesture(Some(GestureClass::ThumbsUp), 1)])
                .repeating(true),
        ),
        Box::new(sink.clone()),
        media_player_mapping(),
    );
    let settings = SessionSettings {
        capture: CaptureSettings {
            device: "stub://live".to_string(),
            width: 32,
            height: 24,
            target_fps: 100,
            ..CaptureSettings::default()
        },
        timing: TriggerTiming {
            confirmation_window: Duration::from_millis(100),
            cooldown: Duration::from_secs(30),
            ..TriggerTiming::default()
        },
        ..SessionSettings::default()
    };
    session.start(&settings).expect("start");

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.status().last_report.is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    let status = session.status();
    session.stop();

    let report = status.last_report.expect("a trigger within 5s");
    assert_eq!(report.event.gesture, GestureClass::ThumbsUp);
    assert_eq!(sink.launched(), vec!["media_player".to_string()]);
    assert!(status.frames_processed > 0);
    assert!(session.latest_frame().is_none());
    assert!(!session.is_running());
}

#[test]
fn frame_source_skips_failed_reads() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = FrameSource::with_opener(clock, |settings, clock| {
        let device: Box<dyn CaptureDevice> =
            Box::new(SyntheticDevice::open(settings.clone(), clock)?.with_failure_every(3));
        Ok(device)
    });
    let delivered = Arc::new(AtomicUsize::new(0));
    let seen = delivered.clone();
    source.set_frame_callback(move |frame| {
        assert_eq!(frame.byte_len(), 8 * 6 * 3);
        seen.fetch_add(1, Ordering::SeqCst);
    });
    source
        .start(&CaptureSettings {
            device: "stub://flaky".to_string(),
            width: 8,
            height: 6,
            target_fps: 0,
            ..CaptureSettings::default()
        })
        .expect("start");

    let deadline = Instant::now() + Duration::from_secs(5);
    while delivered.load(Ordering::SeqCst) < 10 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    source.stop();

    let stats = source.stats();
    assert!(delivered.load(Ordering::SeqCst) >= 10);
    assert!(stats.read_failures >= 1);
    assert_eq!(stats.frames_captured, delivered.load(Ordering::SeqCst) as u64);
    assert!(!source.is_running());
}

#[test]
fn stop_returns_while_estimator_is_stuck() {
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel::<()>();
    let session = Arc::new(DetectionSession::new(
        Arc::new(SystemClock),
        Box::new(StuckLandmarker {
            entered: entered_tx,
            release: release_rx,
        }),
        Box::new(RecordingSink::default()),
        media_player_mapping(),
    ));
    let settings = SessionSettings {
        capture: CaptureSettings {
            device: "stub://hung".to_string(),
            width: 16,
            height: 12,
            target_fps: 30,
            ..CaptureSettings::default()
        },
        ..SessionSettings::default()
    };
    session.start(&settings).expect("start");
    entered
        .recv_timeout(Duration::from_secs(5))
        .expect("estimator receives a frame");

    let (done_tx, done) = mpsc::channel();
    let stopper = session.clone();
    let started = Instant::now();
    std::thread::spawn(move || {
        stopper.stop();
        let _ = done_tx.send(());
    });
    done.recv_timeout(Duration::from_secs(10))
        .expect("stop returns while the estimator is blocked");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!session.is_running());
    assert!(session.latest_frame().is_none());

    // The estimator still belongs to the detached frame.
    assert!(session.start(&settings).is_err());
    drop(release);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match session.start(&settings) {
            Ok(()) => break,
            Err(err) if Instant::now() < deadline => {
                assert!(format!("{:#}", err).contains("still busy"));
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => panic!("restart failed: {:#}", err),
        }
    }
    assert!(session.is_running());
    session.stop();
}

#[test]
fn stop_during_live_episode_never_fires() {
    let sink = RecordingSink::default();
    let session = DetectionSession::new(
        Arc::new(SystemClock),
        Box::new(SlowLandmarker {
            inner: ScriptedLandmarker::new(vec![ScriptStep::gesture(
                Some(GestureClass::ThumbsUp),
                1,
            )])
            .repeating(true),
            delay: Duration::from_millis(50),
        }),
        Box::new(sink.clone()),
        media_player_mapping(),
    );
    let settings = SessionSettings {
        capture: CaptureSettings {
            device: "stub://armed".to_string(),
            width: 16,
            height: 12,
            target_fps: 30,
            ..CaptureSettings::default()
        },
        timing: TriggerTiming {
            confirmation_window: Duration::from_millis(1500),
            ..TriggerTiming::default()
        },
        ..SessionSettings::default()
    };
    session.start(&settings).expect("start");

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.status().trigger.phase != TriggerPhase::Armed && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(session.status().trigger.phase, TriggerPhase::Armed);
    session.stop();

    std::thread::sleep(Duration::from_secs(2));
    let status = session.status();
    assert!(status.last_report.is_none());
    assert_eq!(status.trigger.phase, TriggerPhase::Idle);
    assert!(sink.launched().is_empty());
    assert!(session.latest_frame().is_none());
}
