//! Captured frames.
//!
//! - `Frame`: owned pixel buffer for one capture cycle. Created by a capture
//!   device, moved into the frame callback, never retained by the source.
//! - `LatestFrame`: single-slot handoff so a display path can read the most
//!   recently processed frame without touching the acquisition loop.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Default channel layout produced by capture devices (packed RGB).
pub const RGB_CHANNELS: u8 = 3;

/// One captured frame. Pixel data is row-major, `channels` bytes per pixel.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Monotonic counter assigned by the capture device.
    pub sequence: u64,
    /// Capture instant, read from the source clock.
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap a pixel buffer. The buffer length must match the declared layout.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        sequence: u64,
        captured_at: Instant,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if expected == 0 {
            return Err(anyhow!(
                "frame layout {}x{}x{} is empty",
                width,
                height,
                channels
            ));
        }
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer holds {} bytes, layout {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                expected
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
            sequence,
            captured_at,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }
}

/// Most recently processed frame, shared with readers by `Arc`.
///
/// Writers replace the slot; readers clone the `Arc` under a short lock, so a
/// reader never holds the lock while rendering.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Arc<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: Frame) {
        let frame = Arc::new(frame);
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        let now = Instant::now();
        assert!(Frame::new(vec![0u8; 10], 2, 2, RGB_CHANNELS, 1, now).is_err());
        assert!(Frame::new(Vec::new(), 0, 0, RGB_CHANNELS, 1, now).is_err());

        let frame = Frame::new(vec![7u8; 12], 2, 2, RGB_CHANNELS, 1, now).unwrap();
        assert_eq!(frame.byte_len(), 12);
        assert_eq!(frame.pixels()[0], 7);
    }

    #[test]
    fn latest_frame_keeps_only_newest() {
        let now = Instant::now();
        let slot = LatestFrame::new();
        assert!(slot.latest().is_none());

        slot.store(Frame::new(vec![0u8; 3], 1, 1, RGB_CHANNELS, 1, now).unwrap());
        slot.store(Frame::new(vec![0u8; 3], 1, 1, RGB_CHANNELS, 2, now).unwrap());
        assert_eq!(slot.latest().map(|f| f.sequence), Some(2));

        slot.clear();
        assert!(slot.latest().is_none());
    }
}
