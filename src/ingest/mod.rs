//! Frame acquisition.
//!
//! This module provides the capture side of the pipeline:
//! - `CaptureDevice`: one opened camera (V4L2 device or synthetic `stub://` source)
//! - `FrameSource`: owns the device on a dedicated acquisition thread and hands
//!   every frame to a single registered callback
//!
//! The acquisition loop is single-producer/single-consumer with no queue. The
//! callback runs synchronously on the acquisition thread, so a slow consumer
//! delays the next read instead of building a backlog. The callback slot is
//! only held long enough to clone the current callback, so replacing or
//! clearing it never waits on a frame that is still being delivered.
//!
//! The acquisition loop MUST NOT:
//! - Retain frames after handing them to the callback
//! - Treat a single failed read as a device failure
//! - Let an error escape the loop

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::frame::Frame;

pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticDevice;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// How long `stop()` waits for the acquisition thread before detaching it.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Pause after a failed read so a wedged device does not spin the loop.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// An opened capture device.
///
/// `read_frame` blocks until the next frame is available. Implementations are
/// moved onto the acquisition thread and never touched from another thread.
pub trait CaptureDevice: Send {
    /// Device identifier (path or `stub://` name).
    fn name(&self) -> &str;

    /// Negotiated frame size. May differ from the requested size.
    fn resolution(&self) -> (u32, u32);

    /// Capture the next frame.
    fn read_frame(&mut self) -> Result<Frame>;
}

/// Number of `/dev/video{N}` nodes checked by `list_devices`.
pub const SCANNED_DEVICE_COUNT: u32 = 10;

/// Synthetic devices that always open.
pub const SYNTHETIC_DEVICES: &[&str] = &["stub://demo"];

/// Image controls, each normalized to 0.0..=1.0 of the device's range.
///
/// `None` leaves the device's current value untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CameraControls {
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
}

impl CameraControls {
    /// Named controls that have a value.
    pub fn requested(&self) -> impl Iterator<Item = (&'static str, f32)> {
        [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)))
    }
}

/// Map a normalized control value onto a device range, snapped to `step`.
pub fn scale_control(value: f32, minimum: i64, maximum: i64, step: u64) -> i64 {
    if maximum <= minimum {
        return minimum;
    }
    let span = (maximum - minimum) as f64;
    let raw = minimum as f64 + f64::from(value.clamp(0.0, 1.0)) * span;
    let step = step.max(1) as f64;
    let snapped = minimum as f64 + ((raw - minimum as f64) / step).round() * step;
    (snapped as i64).clamp(minimum, maximum)
}

/// Requested capture parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureSettings {
    /// Device path (e.g., "/dev/video0") or synthetic name (e.g., "stub://demo").
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Target frame rate. Devices pace themselves to this rate where supported.
    pub target_fps: u32,
    pub controls: CameraControls,
}

impl CaptureSettings {
    /// Settings for a numbered camera (`/dev/video{index}`).
    pub fn for_index(index: u32, width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            device: format!("/dev/video{}", index),
            width,
            height,
            target_fps,
            controls: CameraControls::default(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::for_index(0, 640, 480, 30)
    }
}

/// Open the device named by `settings`.
///
/// `stub://` names open a synthetic device; anything else is a V4L2 device
/// path and requires the `ingest-v4l2` feature.
pub fn open_device(
    settings: &CaptureSettings,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn CaptureDevice>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticDevice::open(settings.clone(), clock)?));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Device::open(settings.clone(), clock)?))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow::anyhow!(
            "capture device {} requires the ingest-v4l2 feature",
            settings.device
        ))
    }
}

/// Capture devices that can be opened right now.
///
/// Tries `/dev/video0` through `/dev/video9` when V4L2 support is built in,
/// then lists the synthetic devices.
pub fn list_devices() -> Vec<String> {
    let mut devices = Vec::new();
    #[cfg(feature = "ingest-v4l2")]
    for index in 0..SCANNED_DEVICE_COUNT {
        match v4l::Device::new(index as usize) {
            Ok(_) => devices.push(format!("/dev/video{}", index)),
            Err(err) => log::debug!("FrameSource: /dev/video{} not available: {}", index, err),
        }
    }
    devices.extend(SYNTHETIC_DEVICES.iter().map(|name| name.to_string()));
    devices
}

/// Frames-per-second over consecutive one-second windows.
#[derive(Clone, Debug, Default)]
pub struct FpsCounter {
    window_start: Option<Instant>,
    frames: u32,
    current: u32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one frame at `now` and return the most recent full-window rate.
    pub fn tick(&mut self, now: Instant) -> u32 {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;
        if now.duration_since(start) >= FPS_WINDOW {
            self.current = self.frames;
            self.frames = 0;
            self.window_start = Some(now);
        }
        self.current
    }

    pub fn current(&self) -> u32 {
        self.current
    }
}

/// Frame delivery target. Runs on the acquisition thread.
pub type FrameCallback = Box<dyn FnMut(Frame) + Send>;

type CallbackSlot = Arc<Mutex<Option<Arc<Mutex<FrameCallback>>>>>;

type DeviceOpener =
    Box<dyn Fn(&CaptureSettings, Arc<dyn Clock>) -> Result<Box<dyn CaptureDevice>> + Send + Sync>;

struct ActiveCapture {
    settings: CaptureSettings,
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub fps: u32,
}

/// Background frame acquisition with a single registered consumer.
///
/// All methods take `&self`, so a `FrameSource` can be shared and stopped from
/// any thread.
pub struct FrameSource {
    clock: Arc<dyn Clock>,
    opener: DeviceOpener,
    callback: CallbackSlot,
    fps: Arc<AtomicU32>,
    frames_captured: Arc<AtomicU64>,
    read_failures: Arc<AtomicU64>,
    active: Mutex<Option<ActiveCapture>>,
}

impl FrameSource {
    /// Frame source that opens devices with `open_device`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_opener(clock, open_device)
    }

    /// Frame source with a custom device opener.
    pub fn with_opener<F>(clock: Arc<dyn Clock>, opener: F) -> Self
    where
        F: Fn(&CaptureSettings, Arc<dyn Clock>) -> Result<Box<dyn CaptureDevice>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            clock,
            opener: Box::new(opener),
            callback: Arc::new(Mutex::new(None)),
            fps: Arc::new(AtomicU32::new(0)),
            frames_captured: Arc::new(AtomicU64::new(0)),
            read_failures: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    /// Replace the frame callback. Takes effect from the next frame.
    pub fn set_frame_callback<F>(&self, callback: F)
    where
        F: FnMut(Frame) + Send + 'static,
    {
        let callback: FrameCallback = Box::new(callback);
        *self.lock_callback() = Some(Arc::new(Mutex::new(callback)));
    }

    /// Remove the frame callback. Frames are still captured and counted.
    pub fn clear_frame_callback(&self) {
        *self.lock_callback() = None;
    }

    /// Open the device and start the acquisition thread.
    ///
    /// Returns `Ok(())` without side effects if acquisition is already running.
    pub fn start(&self, settings: &CaptureSettings) -> Result<()> {
        let mut active = self.lock_active();
        if let Some(current) = active.as_ref() {
            if !current.handle.is_finished() {
                log::warn!(
                    "FrameSource: {} is already running; start ignored",
                    current.settings.device
                );
                return Ok(());
            }
        }
        if let Some(finished) = active.take() {
            if finished.handle.join().is_err() {
                log::error!("FrameSource: previous acquisition thread panicked");
            }
        }

        let device = (self.opener)(settings, self.clock.clone())
            .with_context(|| format!("open capture device {}", settings.device))?;
        let (width, height) = device.resolution();

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = mpsc::channel();
        let worker = AcquisitionLoop {
            device,
            stop: stop.clone(),
            callback: self.callback.clone(),
            fps: self.fps.clone(),
            frames_captured: self.frames_captured.clone(),
            read_failures: self.read_failures.clone(),
            clock: self.clock.clone(),
        };
        self.fps.store(0, Ordering::SeqCst);
        let handle = std::thread::Builder::new()
            .name("frame-acquisition".to_string())
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })
            .context("spawn acquisition thread")?;

        log::info!(
            "FrameSource: started {} ({}x{} @ {} fps requested)",
            settings.device,
            width,
            height,
            settings.target_fps
        );
        *active = Some(ActiveCapture {
            settings: CaptureSettings {
                width,
                height,
                ..settings.clone()
            },
            stop,
            done,
            handle,
        });
        Ok(())
    }

    /// Stop acquisition and release the device.
    ///
    /// Safe to call when not running and from any thread, including from inside
    /// the frame callback (the loop then exits after the current frame).
    pub fn stop(&self) {
        let mut active = self.lock_active();
        let Some(capture) = active.take() else {
            return;
        };
        capture.stop.store(true, Ordering::SeqCst);

        if capture.handle.thread().id() == std::thread::current().id() {
            log::debug!("FrameSource: stop requested from acquisition thread");
            return;
        }

        match capture.done.recv_timeout(STOP_GRACE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if capture.handle.join().is_err() {
                    log::error!("FrameSource: acquisition thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "FrameSource: acquisition thread for {} did not exit within {:?}; detaching",
                    capture.settings.device,
                    STOP_GRACE
                );
            }
        }
        self.fps.store(0, Ordering::SeqCst);
        log::info!("FrameSource: stopped {}", capture.settings.device);
    }

    pub fn is_running(&self) -> bool {
        self.lock_active()
            .as_ref()
            .is_some_and(|capture| !capture.handle.is_finished())
    }

    /// Most recent frames-per-second reading (0 when stopped).
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::SeqCst)
    }

    /// Active device settings with the negotiated resolution.
    pub fn active_settings(&self) -> Option<CaptureSettings> {
        self.lock_active()
            .as_ref()
            .map(|capture| capture.settings.clone())
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured.load(Ordering::SeqCst),
            read_failures: self.read_failures.load(Ordering::SeqCst),
            fps: self.fps(),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveCapture>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_callback(&self) -> MutexGuard<'_, Option<Arc<Mutex<FrameCallback>>>> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AcquisitionLoop {
    device: Box<dyn CaptureDevice>,
    stop: Arc<AtomicBool>,
    callback: CallbackSlot,
    fps: Arc<AtomicU32>,
    frames_captured: Arc<AtomicU64>,
    read_failures: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl AcquisitionLoop {
    fn run(mut self) {
        let mut counter = FpsCounter::new();
        while !self.stop.load(Ordering::SeqCst) {
            let frame = match self.device.read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    self.read_failures.fetch_add(1, Ordering::SeqCst);
                    log::warn!(
                        "FrameSource: failed to read frame from {}: {:#}",
                        self.device.name(),
                        err
                    );
                    std::thread::sleep(READ_RETRY_DELAY);
                    continue;
                }
            };
            let deliver = self
                .callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            // Checked after taking the callback: a stopped loop never delivers
            // into a callback registered for a later start.
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            self.frames_captured.fetch_add(1, Ordering::SeqCst);
            let fps = counter.tick(self.clock.now());
            self.fps.store(fps, Ordering::SeqCst);

            if let Some(deliver) = deliver {
                let mut guard = deliver.lock().unwrap_or_else(PoisonError::into_inner);
                let callback: &mut FrameCallback = &mut guard;
                callback(frame);
            }
        }
        log::info!(
            "FrameSource: acquisition loop for {} ended",
            self.device.name()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn fps_counter_reports_full_windows_only() {
        let start = Instant::now();
        let mut counter = FpsCounter::new();
        for i in 0..30 {
            counter.tick(start + Duration::from_millis(i * 33));
        }
        assert_eq!(counter.current(), 0);

        let fps = counter.tick(start + Duration::from_millis(1000));
        assert_eq!(fps, 31);

        counter.tick(start + Duration::from_millis(1500));
        let fps = counter.tick(start + Duration::from_millis(2000));
        assert_eq!(fps, 2);
    }

    #[test]
    fn settings_for_index_maps_to_device_node() {
        let settings = CaptureSettings::for_index(2, 320, 240, 15);
        assert_eq!(settings.device, "/dev/video2");
        assert_eq!(settings.target_fps, 15);
    }

    #[test]
    fn scale_control_maps_onto_device_range() {
        assert_eq!(scale_control(0.5, 0, 255, 1), 128);
        assert_eq!(scale_control(0.0, -64, 64, 1), -64);
        assert_eq!(scale_control(1.0, -64, 64, 1), 64);
        assert_eq!(scale_control(0.3, 0, 100, 25), 25);
        assert_eq!(scale_control(2.0, 0, 100, 0), 100);
        assert_eq!(scale_control(0.7, 10, 10, 1), 10);
    }

    #[test]
    fn requested_controls_skip_unset_values() {
        let controls = CameraControls {
            contrast: Some(0.25),
            ..CameraControls::default()
        };
        assert_eq!(controls.requested().collect::<Vec<_>>(), vec![("contrast", 0.25)]);
        assert_eq!(CameraControls::default().requested().count(), 0);
    }

    #[test]
    fn listed_synthetic_devices_open() {
        let devices = list_devices();
        for name in SYNTHETIC_DEVICES {
            assert!(devices.iter().any(|device| device == name));
            let settings = CaptureSettings {
                device: name.to_string(),
                ..CaptureSettings::default()
            };
            assert!(open_device(&settings, Arc::new(SystemClock)).is_ok());
        }
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let source = FrameSource::new(Arc::new(SystemClock));
        source.stop();
        source.stop();
        assert!(!source.is_running());
        assert_eq!(source.fps(), 0);
    }

    #[test]
    fn start_reports_open_failure() {
        let source = FrameSource::new(Arc::new(SystemClock));
        let settings = CaptureSettings {
            device: "stub://unavailable".to_string(),
            ..CaptureSettings::default()
        };
        assert!(source.start(&settings).is_err());
        assert!(!source.is_running());
    }
}
