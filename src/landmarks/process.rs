//! External landmark estimator process.
//!
//! The estimator runs as a child process speaking a line protocol:
//! - on startup it prints `READY` on stdout
//! - per frame it reads a header of three little-endian `u32`s (width, height,
//!   channels) followed by `width * height * channels` raw pixel bytes
//! - it answers with one JSON line:
//!   `{"hands":[{"score":0.93,"landmarks":[{"x":..,"y":..,"z":..}, ...]}],"error":null}`
//!
//! Tracking settings are passed to the child as environment variables when it
//! is spawned.
//!
//! Pipe I/O runs on a writer and a reader thread so every wait on the child is
//! bounded: a child that does not answer in time is killed and respawned on
//! the next frame.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use super::{DetectedHand, HandLandmarker, HandTrackingSettings, Landmark, LandmarkSet};
use crate::frame::Frame;

const READY_LINE: &str = "READY";

/// How long a freshly spawned estimator may take to print `READY`.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait for one frame's answer.
pub const ESTIMATE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Deserialize, Debug)]
struct HandJson {
    score: f32,
    landmarks: Vec<Landmark>,
    #[serde(default)]
    handedness: Option<String>,
}

#[derive(Deserialize, Debug)]
struct EstimateJson {
    #[serde(default)]
    hands: Vec<HandJson>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse one estimator response line into filtered hands.
///
/// Hands without exactly 21 landmarks are skipped. A reported `error` is
/// returned as `Err`.
pub fn parse_response(line: &str, settings: &HandTrackingSettings) -> Result<Vec<DetectedHand>> {
    let response: EstimateJson = serde_json::from_str(line.trim())
        .with_context(|| format!("invalid estimator response: {}", line.trim()))?;
    if let Some(error) = response.error {
        return Err(anyhow!("estimator reported: {}", error));
    }

    let mut hands = Vec::with_capacity(response.hands.len());
    for hand in response.hands {
        match LandmarkSet::from_slice(&hand.landmarks) {
            Ok(landmarks) => {
                log::trace!(
                    "ProcessLandmarker: hand {} score {:.2}",
                    hand.handedness.as_deref().unwrap_or("?"),
                    hand.score
                );
                hands.push(DetectedHand {
                    landmarks,
                    score: hand.score,
                });
            }
            Err(err) => log::warn!("ProcessLandmarker: skipping hand: {}", err),
        }
    }
    Ok(settings.filter(hands))
}

/// Landmark estimator backed by a child process.
pub struct ProcessLandmarker {
    command: Vec<String>,
    settings: HandTrackingSettings,
    timeout: Duration,
    child: Option<Running>,
}

struct Running {
    child: Child,
    frames: mpsc::Sender<Vec<u8>>,
    lines: mpsc::Receiver<io::Result<String>>,
}

impl ProcessLandmarker {
    /// `command` is the program followed by its arguments. The process is
    /// spawned lazily on `configure` or the first frame.
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(anyhow!("landmarker command is empty"));
        }
        Ok(Self {
            command,
            settings: HandTrackingSettings::default(),
            timeout: ESTIMATE_TIMEOUT,
            child: None,
        })
    }

    /// Wait at most `timeout` for each frame's answer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    fn spawn(&self) -> Result<Running> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("landmarker command is empty"))?;
        log::info!("ProcessLandmarker: starting {}", self.command.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .env(
                "GESTURE_LAUNCHER_MIN_DETECTION_CONFIDENCE",
                self.settings.min_detection_confidence.to_string(),
            )
            .env(
                "GESTURE_LAUNCHER_MIN_TRACKING_CONFIDENCE",
                self.settings.min_tracking_confidence.to_string(),
            )
            .env("GESTURE_LAUNCHER_MAX_HANDS", self.settings.max_hands.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn landmarker {}", program))?;

        match start_pipes(&mut child) {
            Ok((frames, lines)) => Ok(Running {
                child,
                frames,
                lines,
            }),
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(err)
            }
        }
    }

    fn running(&mut self) -> Result<&mut Running> {
        if self.child.is_none() {
            self.child = Some(self.spawn()?);
        }
        self.child
            .as_mut()
            .ok_or_else(|| anyhow!("landmarker not running"))
    }

    fn exchange(&mut self, frame: &Frame) -> Result<String> {
        let timeout = self.timeout;
        let running = self.running()?;

        let mut payload = Vec::with_capacity(12 + frame.byte_len());
        for value in [frame.width, frame.height, u32::from(frame.channels)] {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        payload.extend_from_slice(frame.pixels());
        running
            .frames
            .send(payload)
            .map_err(|_| anyhow!("landmarker input closed"))?;

        match running.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(err)) => Err(anyhow::Error::new(err).context("read landmarker response")),
            Err(RecvTimeoutError::Timeout) => {
                Err(anyhow!("landmarker did not answer within {:?}", timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("landmarker closed its output")),
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut running) = self.child.take() {
            let _ = running.child.kill();
            let _ = running.child.wait();
        }
    }
}

/// Move the child's stdin and stdout onto pipe threads and wait for `READY`.
fn start_pipes(
    child: &mut Child,
) -> Result<(mpsc::Sender<Vec<u8>>, mpsc::Receiver<io::Result<String>>)> {
    let mut stdin = child.stdin.take().context("landmarker stdin unavailable")?;
    let stdout = child.stdout.take().context("landmarker stdout unavailable")?;

    let (frames, pending) = mpsc::channel::<Vec<u8>>();
    std::thread::Builder::new()
        .name("landmarker-writer".to_string())
        .spawn(move || {
            for payload in pending {
                if let Err(err) = stdin.write_all(&payload).and_then(|()| stdin.flush()) {
                    log::debug!("ProcessLandmarker: input closed: {}", err);
                    break;
                }
            }
        })
        .context("spawn landmarker writer thread")?;

    let (replies, lines) = mpsc::channel();
    std::thread::Builder::new()
        .name("landmarker-reader".to_string())
        .spawn(move || {
            let mut stdout = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match stdout.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if replies.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = replies.send(Err(err));
                        break;
                    }
                }
            }
        })
        .context("spawn landmarker reader thread")?;

    match lines.recv_timeout(READY_TIMEOUT) {
        Ok(Ok(line)) if line.trim() == READY_LINE => {
            log::info!("ProcessLandmarker: ready");
            Ok((frames, lines))
        }
        Ok(Ok(line)) => Err(anyhow!(
            "landmarker did not signal ready, got: {:?}",
            line.trim()
        )),
        Ok(Err(err)) => Err(anyhow::Error::new(err).context("read landmarker ready line")),
        Err(RecvTimeoutError::Timeout) => Err(anyhow!(
            "landmarker did not signal ready within {:?}",
            READY_TIMEOUT
        )),
        Err(RecvTimeoutError::Disconnected) => {
            Err(anyhow!("landmarker exited before signalling ready"))
        }
    }
}

impl HandLandmarker for ProcessLandmarker {
    fn name(&self) -> &'static str {
        "process"
    }

    fn configure(&mut self, settings: &HandTrackingSettings) -> Result<()> {
        let changed = *settings != self.settings;
        self.settings = settings.clone();
        if changed {
            // Settings travel through the environment, so a running child is restarted.
            self.shutdown();
        }
        self.running().map(|_| ())
    }

    fn estimate(&mut self, frame: &Frame) -> Result<Vec<DetectedHand>> {
        match self.exchange(frame) {
            Ok(line) => parse_response(&line, &self.settings),
            Err(err) => {
                // A late or broken child is unusable; respawn on the next frame.
                self.shutdown();
                Err(err.context("landmarker exchange failed"))
            }
        }
    }
}

impl Drop for ProcessLandmarker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
