//! Camera capture.
//!
//! This module provides the camera side of the pipeline:
//! - Device enumeration and default selection (`DeviceEnumerator`)
//! - The session state machine that owns the live stream (`CaptureSession`)
//! - Capture backends: synthetic `stub://` devices and local V4L2 devices
//!   (feature: capture-v4l2)
//!
//! Backends hand out `VideoStream`s. Dropping a stream releases the
//! underlying hardware handle, so the session only has to drop its active
//! stream to guarantee release on every exit path.
//!
//! The capture layer MUST NOT:
//! - Keep any frame beyond the snapshot that produced it
//! - Log frame content

mod claim;
mod constraints;
mod device;
mod session;
pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

pub use claim::DeviceClaim;
#[cfg(test)]
pub(crate) use claim::serial as serial_claims;
pub use constraints::{CaptureConstraints, NegotiatedFormat};
pub use device::{Device, DeviceEnumerator, Facing};
pub use session::{CaptureSession, CaptureState};
pub use synthetic::{SyntheticBackend, SyntheticDevice, SyntheticFault};
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Backend;

use crate::error::CaptureError;
use crate::frame::CapturedImage;

/// Prefix that selects the synthetic backend.
pub const STUB_SCHEME: &str = "stub://";

/// A source of capture devices.
pub trait CaptureBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// List the video input devices currently visible to this backend.
    fn enumerate(&self) -> Result<Vec<Device>, CaptureError>;

    /// Open a device for exclusive streaming.
    ///
    /// Implementations must release every handle they acquired when this
    /// returns an error.
    fn open(
        &mut self,
        device: &Device,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn VideoStream>, CaptureError>;
}

/// An open, streaming capture device.
pub trait VideoStream {
    /// Format agreed with the device when the stream was opened.
    fn format(&self) -> NegotiatedFormat;

    /// Copy out the most recent displayable image.
    ///
    /// Returns `CaptureError::NotReady` until the source has buffered a
    /// complete frame.
    fn read_latest(&mut self) -> Result<CapturedImage, CaptureError>;
}

/// Backend that reports capture as unavailable.
pub struct UnsupportedBackend;

impl CaptureBackend for UnsupportedBackend {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn enumerate(&self) -> Result<Vec<Device>, CaptureError> {
        Err(CaptureError::NotSupported)
    }

    fn open(
        &mut self,
        _device: &Device,
        _constraints: &CaptureConstraints,
    ) -> Result<Box<dyn VideoStream>, CaptureError> {
        Err(CaptureError::NotSupported)
    }
}

/// Pick a backend for the configured device.
///
/// `stub://` device ids select the synthetic backend. Anything else uses
/// V4L2 when compiled in, and reports `NotSupported` otherwise.
pub fn backend_for(device: Option<&str>) -> Box<dyn CaptureBackend> {
    if let Some(uri) = device.filter(|d| d.starts_with(STUB_SCHEME)) {
        return Box::new(SyntheticBackend::from_uri(uri));
    }
    native_backend()
}

#[cfg(feature = "capture-v4l2")]
fn native_backend() -> Box<dyn CaptureBackend> {
    Box::new(V4l2Backend::new())
}

#[cfg(not(feature = "capture-v4l2"))]
fn native_backend() -> Box<dyn CaptureBackend> {
    log::warn!("capture: built without a native camera backend (enable capture-v4l2)");
    Box::new(UnsupportedBackend)
}
