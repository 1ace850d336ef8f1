//! gesture_launcher - camera gesture to application launcher daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file + environment overrides)
//! 2. Opens the configured camera and landmark estimator
//! 3. Fires the mapped action once per confirmed gesture
//! 4. Logs phase, countdown and FPS until Ctrl-C (or `--seconds` elapse)

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use gesture_launcher::{
    list_devices, ActionSink, DetectionSession, DryRunSink, HandLandmarker, LauncherConfig, ProcessLandmarker,
    ProcessLauncher, ScriptStep, ScriptedLandmarker, SessionStatus, SystemClock, TriggerOutcome,
    TriggerPhase,
};

const STATUS_POLL: Duration = Duration::from_millis(33);
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON).
    #[arg(long, env = "GESTURE_LAUNCHER_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Capture device, overriding the configured camera (e.g. /dev/video2, stub://demo).
    #[arg(long)]
    device: Option<String>,
    /// Replay scripted poses instead of running an estimator (e.g. "thumbs_up:60,none:150").
    #[arg(long, value_name = "STEPS")]
    script: Option<String>,
    /// Log actions instead of launching them.
    #[arg(long)]
    dry_run: bool,
    /// Exit after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,
    /// Print the capture devices that can be opened, then exit.
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => LauncherConfig::from_path(path)?,
        None => LauncherConfig::load()?,
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cfg.log_level.as_str()),
    )
    .init();

    if args.list_devices {
        for device in list_devices() {
            println!("{}", device);
        }
        return Ok(());
    }
    if let Some(device) = &args.device {
        cfg.camera.device = Some(device.clone());
    }
    if !cfg.detection.detection_enabled {
        log::info!("gesture detection is disabled in configuration; exiting");
        return Ok(());
    }

    let mapping = cfg.mapping()?;
    if mapping.is_empty() {
        log::warn!("no gesture mappings configured; gestures will be detected but not launched");
    }
    for (gesture, action) in mapping.iter() {
        log::info!("mapping: {} -> {}", gesture.label(), action);
    }

    let landmarker = build_landmarker(&args, &cfg)?;
    let sink: Box<dyn ActionSink> = if args.dry_run {
        Box::new(DryRunSink::new())
    } else {
        Box::new(ProcessLauncher::new())
    };

    let session = DetectionSession::new(Arc::new(SystemClock), landmarker, sink, mapping);
    session.start(&cfg.session_settings())?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("gesture_launcher running (Ctrl-C to stop)");
    let started = Instant::now();
    let deadline = args.seconds.map(Duration::from_secs);
    let mut last_log = Instant::now();
    let mut reported = None;

    loop {
        match rx.recv_timeout(STATUS_POLL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        if deadline.is_some_and(|limit| started.elapsed() >= limit) {
            log::info!("run time elapsed");
            break;
        }

        let status = session.status();
        if !status.running {
            log::error!("capture stopped unexpectedly");
            break;
        }
        if status.last_report != reported {
            report_trigger(&status);
            reported = status.last_report.clone();
        }
        if last_log.elapsed() >= STATUS_LOG_INTERVAL {
            log_status(&status);
            last_log = Instant::now();
        }
    }

    session.stop();
    log::info!(
        "gesture_launcher stopped after {} frames",
        session.status().frames_processed
    );
    Ok(())
}

fn build_landmarker(args: &Args, cfg: &LauncherConfig) -> Result<Box<dyn HandLandmarker>> {
    if let Some(script) = &args.script {
        let steps = ScriptStep::parse_list(script)?;
        return Ok(Box::new(ScriptedLandmarker::new(steps).repeating(true)));
    }
    match &cfg.landmarker_command {
        Some(command) => Ok(Box::new(ProcessLandmarker::new(command.clone())?)),
        None => Err(anyhow!(
            "no landmark estimator configured (set landmarker.command, GESTURE_LAUNCHER_LANDMARKER, or pass --script)"
        )),
    }
}

fn report_trigger(status: &SessionStatus) {
    let Some(report) = &status.last_report else {
        return;
    };
    match &report.outcome {
        TriggerOutcome::Launched { action } => {
            log::info!("{} -> launched {}", report.event.gesture.label(), action)
        }
        TriggerOutcome::Unmapped => {
            log::info!("{} detected (no action mapped)", report.event.gesture.label())
        }
        TriggerOutcome::LaunchFailed { action, error } => log::warn!(
            "{} -> failed to launch {}: {}",
            report.event.gesture.label(),
            action,
            error
        ),
    }
}

fn log_status(status: &SessionStatus) {
    let trigger = &status.trigger;
    let hint = trigger
        .hint
        .map(|gesture| format!("{} ({:.0}%)", gesture.label(), trigger.hint_confidence * 100.0))
        .unwrap_or_else(|| "no gesture".to_string());
    match (trigger.phase, trigger.remaining) {
        (TriggerPhase::Armed, Some(left)) => log::info!(
            "fps={} armed {} in {:.1}s, seeing {}",
            status.fps,
            trigger.armed_gesture.map_or("?", |gesture| gesture.label()),
            left.as_secs_f32(),
            hint
        ),
        (TriggerPhase::Cooldown, Some(left)) => log::info!(
            "fps={} cooldown {:.1}s, seeing {}",
            status.fps,
            left.as_secs_f32(),
            hint
        ),
        _ => log::info!("fps={} ready, seeing {}", status.fps, hint),
    }
}
