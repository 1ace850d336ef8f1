//! Synthetic capture device for `stub://` names.
//!
//! Produces paced RGB frames with a moving gradient and a little sensor noise.
//! Used by tests, demos, and any deployment that drives the landmark
//! estimator from a script instead of a camera.
//!
//! `stub://unavailable` refuses to open, which exercises the device-error path.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CaptureDevice, CaptureSettings};
use crate::clock::Clock;
use crate::frame::{Frame, RGB_CHANNELS};

const UNAVAILABLE_DEVICE: &str = "stub://unavailable";

/// Synthetic camera.
pub struct SyntheticDevice {
    settings: CaptureSettings,
    clock: Arc<dyn Clock>,
    frame_count: u64,
    reads: u64,
    /// Simulated scene state; shifts the gradient every 50 frames.
    scene_state: u8,
    fail_every: Option<u64>,
    last_read_at: Option<Instant>,
}

impl SyntheticDevice {
    pub fn open(settings: CaptureSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        if !settings.device.starts_with("stub://") {
            return Err(anyhow!(
                "synthetic device requires a stub:// name, got {}",
                settings.device
            ));
        }
        if settings.device == UNAVAILABLE_DEVICE {
            return Err(anyhow!("device {} is not available", settings.device));
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!(
                "invalid resolution {}x{}",
                settings.width,
                settings.height
            ));
        }
        log::info!(
            "SyntheticDevice: connected to {} ({}x{})",
            settings.device,
            settings.width,
            settings.height
        );
        for (name, value) in settings.controls.requested() {
            log::debug!("SyntheticDevice: {} = {:.2} has no effect", name, value);
        }
        Ok(Self {
            settings,
            clock,
            frame_count: 0,
            reads: 0,
            scene_state: 0,
            fail_every: None,
            last_read_at: None,
        })
    }

    /// Make every `n`th read fail, to exercise transient read errors.
    pub fn with_failure_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame_count
    }

    /// Sleep until the next frame is due at the target rate.
    fn pace(&mut self) {
        if self.settings.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.settings.target_fps;
        if let Some(last) = self.last_read_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_read_at = Some(Instant::now());
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count =
            self.settings.width as usize * self.settings.height as usize * RGB_CHANNELS as usize;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }

        let mut rng = rand::thread_rng();
        for _ in 0..(pixel_count / 1000).max(1) {
            let at = rng.gen_range(0..pixel_count);
            pixels[at] = rng.gen();
        }
        pixels
    }
}

impl CaptureDevice for SyntheticDevice {
    fn name(&self) -> &str {
        &self.settings.device
    }

    fn resolution(&self) -> (u32, u32) {
        (self.settings.width, self.settings.height)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        self.pace();
        self.reads += 1;
        if let Some(n) = self.fail_every {
            if self.reads % n == 0 {
                return Err(anyhow!("synthetic read failure on read {}", self.reads));
            }
        }

        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
            RGB_CHANNELS,
            self.frame_count,
            self.clock.now(),
        )
    }
}
