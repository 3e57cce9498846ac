//! V4L2 capture backend (feature: capture-v4l2).
//!
//! Enumerates `/dev/video*` capture nodes and streams RGB frames through
//! memory-mapped buffers. Opening a device holds the file descriptor for as
//! long as the returned stream lives; dropping the stream stops streaming
//! and closes the device.

use ouroboros::self_referencing;

use super::{CaptureBackend, CaptureConstraints, Device, Facing, NegotiatedFormat, VideoStream};
use crate::error::CaptureError;
use crate::frame::CapturedImage;

/// Buffers requested from the driver.
const BUFFER_COUNT: u32 = 4;

/// Buffers dequeued per snapshot so the copied frame is the freshest one
/// rather than whatever sat in the queue since the last snapshot.
const STALE_BUFFERS: u32 = BUFFER_COUNT;

/// Backend over the local V4L2 device nodes.
#[derive(Debug, Default)]
pub struct V4l2Backend;

impl V4l2Backend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn enumerate(&self) -> Result<Vec<Device>, CaptureError> {
        use v4l::capability::Flags;

        let mut devices = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path().display().to_string();
            let device = match v4l::Device::with_path(node.path()) {
                Ok(device) => device,
                Err(err) => {
                    let mapped = map_io_error(&err);
                    if mapped == CaptureError::PermissionDenied {
                        return Err(mapped);
                    }
                    log::debug!("V4l2Backend: skipping {}: {}", path, err);
                    continue;
                }
            };
            let caps = match device.query_caps() {
                Ok(caps) => caps,
                Err(err) => {
                    log::debug!("V4l2Backend: cannot query {}: {}", path, err);
                    continue;
                }
            };
            // Metadata nodes share the driver but cannot stream video.
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }
            let label = node.name().unwrap_or_else(|| caps.card.clone());
            devices.push(Device::new(path, label.clone()).with_facing(Facing::from_label(&label)));
        }
        log::debug!("V4l2Backend: {} capture device(s)", devices.len());
        Ok(devices)
    }

    fn open(
        &mut self,
        device: &Device,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn VideoStream>, CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut handle = v4l::Device::with_path(&device.id).map_err(|err| map_io_error(&err))?;

        let mut format = handle.format().map_err(|err| map_io_error(&err))?;
        format.width = constraints.width;
        format.height = constraints.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match handle.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Backend: failed to set format on {}: {}", device.id, err);
                handle.format().map_err(|err| map_io_error(&err))?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(CaptureError::Overconstrained(format!(
                "{} does not deliver RGB3 frames (got {})",
                device.id, format.fourcc
            )));
        }

        let params = v4l::video::capture::Parameters::with_fps(constraints.fps);
        let fps = match handle.set_params(&params) {
            Ok(params) => fps_of(&params.interval),
            Err(err) => {
                log::warn!("V4l2Backend: failed to set fps on {}: {}", device.id, err);
                handle
                    .params()
                    .map(|params| fps_of(&params.interval))
                    .unwrap_or(constraints.fps)
            }
        };
        let negotiated = NegotiatedFormat {
            width: format.width,
            height: format.height,
            fps,
        };

        let state = V4l2StateTryBuilder {
            device: handle,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
            },
        }
        .try_build()
        .map_err(|err| map_io_error(&err))?;

        log::info!(
            "V4l2Backend: streaming {} ({}x{} @ {}fps)",
            device.id,
            negotiated.width,
            negotiated.height,
            negotiated.fps
        );
        Ok(Box::new(V4l2Stream {
            device_id: device.id.clone(),
            format: negotiated,
            state,
        }))
    }
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Stream {
    device_id: String,
    format: NegotiatedFormat,
    state: V4l2State,
}

impl VideoStream for V4l2Stream {
    fn format(&self) -> NegotiatedFormat {
        self.format
    }

    fn read_latest(&mut self) -> Result<CapturedImage, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let pixels = self.state.with_mut(|fields| {
            for _ in 1..STALE_BUFFERS {
                fields.stream.next()?;
            }
            let (buf, _meta) = fields.stream.next()?;
            Ok::<_, std::io::Error>(buf.to_vec())
        });
        let pixels = pixels.map_err(|err| {
            log::warn!("V4l2Backend: capture on {} failed: {}", self.device_id, err);
            map_stream_error(&err)
        })?;

        let image = CapturedImage {
            pixels,
            width: self.format.width,
            height: self.format.height,
        };
        // The driver hands back short buffers until the sensor has settled.
        if !image.is_complete() {
            return Err(CaptureError::NotReady);
        }
        Ok(image)
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        log::info!("V4l2Backend: released {}", self.device_id);
    }
}

fn fps_of(interval: &v4l::Fraction) -> u32 {
    if interval.numerator == 0 {
        return 0;
    }
    interval.denominator / interval.numerator
}

fn map_io_error(err: &std::io::Error) -> CaptureError {
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) => CaptureError::PermissionDenied,
        Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => {
            CaptureError::DeviceNotFound
        }
        Some(libc::EBUSY) => CaptureError::DeviceBusy,
        Some(libc::EAGAIN) => CaptureError::NotReady,
        _ => match err.kind() {
            std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
            std::io::ErrorKind::NotFound => CaptureError::DeviceNotFound,
            _ => CaptureError::StreamError(err.to_string()),
        },
    }
}

/// Errors while streaming. A busy device mid-stream will not recover by
/// itself, so it ends the session instead of reading as a busy start.
fn map_stream_error(err: &std::io::Error) -> CaptureError {
    match map_io_error(err) {
        CaptureError::DeviceBusy => CaptureError::StreamError(err.to_string()),
        other => other,
    }
}
