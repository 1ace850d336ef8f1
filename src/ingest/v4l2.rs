//! V4L2 capture device.
//!
//! Opens a local device node (e.g., /dev/video0), negotiates packed RGB at the
//! requested size and rate, applies any requested image controls, and streams
//! frames through memory-mapped buffers.
//!
//! Each frame is copied out of the mmap buffer into an owned `Frame` and handed
//! to the caller; the device keeps no copies.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::sync::Arc;

use super::{scale_control, CameraControls, CaptureDevice, CaptureSettings};
use crate::clock::Clock;
use crate::frame::{Frame, RGB_CHANNELS};

const MMAP_BUFFERS: u32 = 4;

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_CONTRAST: u32 = 0x0098_0901;
const CID_SATURATION: u32 = 0x0098_0902;

/// Camera opened through libv4l.
pub struct V4l2Device {
    settings: CaptureSettings,
    clock: Arc<dyn Clock>,
    state: V4l2State,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn open(settings: CaptureSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&settings.device)
            .with_context(|| format!("open v4l2 device {}", settings.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Device: failed to set format on {}: {}",
                    settings.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(anyhow!(
                "v4l2 device {} does not support packed RGB (negotiated {})",
                settings.device,
                format.fourcc
            ));
        }

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Device: failed to set fps on {}: {}",
                    settings.device,
                    err
                );
            }
        }

        apply_controls(&device, &settings.device, &settings.controls);

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Device: connected to {} ({}x{})",
            settings.device,
            format.width,
            format.height
        );
        Ok(Self {
            settings,
            clock,
            state,
            frame_count: 0,
            active_width: format.width,
            active_height: format.height,
        })
    }
}

/// Set the requested image controls. Unsupported or rejected controls are
/// logged and skipped.
fn apply_controls(device: &v4l::Device, path: &str, controls: &CameraControls) {
    use v4l::control::{Control, Value};

    if controls.requested().next().is_none() {
        return;
    }
    let descriptions = match device.query_controls() {
        Ok(descriptions) => descriptions,
        Err(err) => {
            log::warn!("V4l2Device: failed to query controls on {}: {}", path, err);
            return;
        }
    };
    for (name, value) in controls.requested() {
        let id = match name {
            "brightness" => CID_BRIGHTNESS,
            "contrast" => CID_CONTRAST,
            _ => CID_SATURATION,
        };
        let Some(description) = descriptions.iter().find(|d| d.id == id) else {
            log::warn!("V4l2Device: {} does not support {}", path, name);
            continue;
        };
        let scaled = scale_control(
            value,
            description.minimum,
            description.maximum,
            description.step,
        );
        let control = Control {
            id,
            value: Value::Integer(scaled),
        };
        match device.set_control(control) {
            Ok(()) => log::info!("V4l2Device: {} {} = {}", path, name, scaled),
            Err(err) => log::warn!("V4l2Device: failed to set {} on {}: {}", name, path, err),
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.settings.device
    }

    fn resolution(&self) -> (u32, u32) {
        (self.active_width, self.active_height)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let expected =
            self.active_width as usize * self.active_height as usize * RGB_CHANNELS as usize;
        let pixels = self.state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            if buf.len() < expected {
                return Err(anyhow!(
                    "short v4l2 buffer: {} bytes, expected {}",
                    buf.len(),
                    expected
                ));
            }
            Ok(buf[..expected].to_vec())
        })?;

        self.frame_count += 1;
        Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            RGB_CHANNELS,
            self.frame_count,
            self.clock.now(),
        )
    }
}
