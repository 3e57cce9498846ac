//! Synthetic capture backend (`stub://` devices).
//!
//! Produces solid-color frames without touching hardware, for tests and
//! demos. Device behavior is controlled through the URI query:
//!
//! - `color=<name|#rrggbb>`: fill color (default green)
//! - `label=<text>`: device label
//! - `facing=front|rear`: facing hint
//! - `width`, `height`, `fps`: the device's maximum format
//! - `warmup=N`: first N reads return `NotReady`
//! - `fail_after=N`: the stream faults after N delivered frames
//! - `fault=denied|busy|missing|stream`: fail at open

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use url::Url;

use super::{CaptureBackend, CaptureConstraints, Device, Facing, NegotiatedFormat, VideoStream};
use crate::error::CaptureError;
use crate::frame::CapturedImage;

const DEFAULT_COLOR: [u8; 3] = [34, 139, 34];
const DEFAULT_MAX_FORMAT: NegotiatedFormat = NegotiatedFormat {
    width: 1280,
    height: 720,
    fps: 30,
};

/// Failure injected when a synthetic device is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticFault {
    PermissionDenied,
    Busy,
    Missing,
    Stream,
}

impl SyntheticFault {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "denied" | "permission" => Some(Self::PermissionDenied),
            "busy" => Some(Self::Busy),
            "missing" | "not_found" => Some(Self::Missing),
            "stream" => Some(Self::Stream),
            _ => None,
        }
    }

    fn to_error(self) -> CaptureError {
        match self {
            Self::PermissionDenied => CaptureError::PermissionDenied,
            Self::Busy => CaptureError::DeviceBusy,
            Self::Missing => CaptureError::DeviceNotFound,
            Self::Stream => CaptureError::StreamError("synthetic device failed to start".into()),
        }
    }
}

/// Description of one synthetic camera.
#[derive(Clone, Debug)]
pub struct SyntheticDevice {
    pub id: String,
    pub label: String,
    pub facing: Facing,
    pub color: [u8; 3],
    pub max_format: NegotiatedFormat,
    pub warmup_reads: u32,
    pub fail_after: Option<u32>,
    pub fault: Option<SyntheticFault>,
}

impl SyntheticDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: id.into(),
            facing: Facing::from_label(&label),
            label,
            color: DEFAULT_COLOR,
            max_format: DEFAULT_MAX_FORMAT,
            warmup_reads: 0,
            fail_after: None,
            fault: None,
        }
    }

    /// Build a device from a `stub://name?key=value` URI.
    ///
    /// Unknown keys and unparsable values are ignored with a warning.
    pub fn from_uri(uri: &str) -> Self {
        let parsed = Url::parse(uri).ok();
        let name = parsed
            .as_ref()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "camera".to_string());
        let mut device = Self::new(uri, format!("Synthetic camera ({})", name));

        let Some(url) = parsed else {
            log::warn!("SyntheticDevice: unparsable uri {}, using defaults", uri);
            return device;
        };
        for (key, value) in url.query_pairs() {
            match &*key {
                "color" => match parse_color(&value) {
                    Some(color) => device.color = color,
                    None => log::warn!("SyntheticDevice: unknown color '{}'", value),
                },
                "label" => {
                    device.label = value.to_string();
                    device.facing = Facing::from_label(&device.label);
                }
                "facing" => {
                    device.facing = match &*value {
                        "rear" | "back" | "environment" => Facing::Rear,
                        "front" | "user" => Facing::Front,
                        _ => Facing::Unknown,
                    }
                }
                "width" => set_u32(&mut device.max_format.width, &key, &value),
                "height" => set_u32(&mut device.max_format.height, &key, &value),
                "fps" => set_u32(&mut device.max_format.fps, &key, &value),
                "warmup" => set_u32(&mut device.warmup_reads, &key, &value),
                "fail_after" => match value.parse() {
                    Ok(n) => device.fail_after = Some(n),
                    Err(_) => log::warn!("SyntheticDevice: invalid fail_after '{}'", value),
                },
                "fault" => device.fault = SyntheticFault::parse(&value),
                other => log::warn!("SyntheticDevice: ignoring unknown key '{}'", other),
            }
        }
        device
    }

    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn with_max_format(mut self, width: u32, height: u32, fps: u32) -> Self {
        self.max_format = NegotiatedFormat { width, height, fps };
        self
    }

    pub fn with_warmup(mut self, reads: u32) -> Self {
        self.warmup_reads = reads;
        self
    }

    pub fn with_fail_after(mut self, frames: u32) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn with_fault(mut self, fault: SyntheticFault) -> Self {
        self.fault = Some(fault);
        self
    }

    fn as_device(&self) -> Device {
        Device::new(self.id.clone(), self.label.clone()).with_facing(self.facing)
    }
}

/// Backend serving a fixed set of synthetic devices.
pub struct SyntheticBackend {
    devices: Vec<SyntheticDevice>,
    deny_enumeration: bool,
    open_streams: Arc<AtomicUsize>,
}

impl SyntheticBackend {
    pub fn new(devices: Vec<SyntheticDevice>) -> Self {
        Self {
            devices,
            deny_enumeration: false,
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_uri(uri: &str) -> Self {
        Self::new(vec![SyntheticDevice::from_uri(uri)])
    }

    /// Make `enumerate` fail as if device access had not been granted.
    pub fn deny_enumeration(mut self) -> Self {
        self.deny_enumeration = true;
        self
    }

    /// Shared counter of streams that are currently open.
    pub fn open_streams(&self) -> Arc<AtomicUsize> {
        self.open_streams.clone()
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn enumerate(&self) -> Result<Vec<Device>, CaptureError> {
        if self.deny_enumeration {
            return Err(CaptureError::PermissionDenied);
        }
        Ok(self.devices.iter().map(SyntheticDevice::as_device).collect())
    }

    fn open(
        &mut self,
        device: &Device,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn VideoStream>, CaptureError> {
        let spec = self
            .devices
            .iter()
            .find(|candidate| candidate.id == device.id)
            .ok_or(CaptureError::DeviceNotFound)?;
        if let Some(fault) = spec.fault {
            return Err(fault.to_error());
        }
        let format = constraints.negotiate(spec.max_format)?;
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "SyntheticBackend: opened {} ({}x{} @ {}fps)",
            spec.id,
            format.width,
            format.height,
            format.fps
        );
        Ok(Box::new(SyntheticStream {
            spec: spec.clone(),
            format,
            reads: 0,
            delivered: 0,
            open_streams: self.open_streams.clone(),
        }))
    }
}

struct SyntheticStream {
    spec: SyntheticDevice,
    format: NegotiatedFormat,
    reads: u32,
    delivered: u32,
    open_streams: Arc<AtomicUsize>,
}

impl VideoStream for SyntheticStream {
    fn format(&self) -> NegotiatedFormat {
        self.format
    }

    fn read_latest(&mut self) -> Result<CapturedImage, CaptureError> {
        self.reads += 1;
        if self.reads <= self.spec.warmup_reads {
            return Err(CaptureError::NotReady);
        }
        if let Some(limit) = self.spec.fail_after {
            if self.delivered >= limit {
                return Err(CaptureError::StreamError(format!(
                    "synthetic stream {} ended after {} frames",
                    self.spec.id, limit
                )));
            }
        }
        self.delivered += 1;

        let pixel_count = (self.format.width * self.format.height) as usize;
        let mut pixels = Vec::with_capacity(pixel_count * 3);
        for _ in 0..pixel_count {
            pixels.extend_from_slice(&self.spec.color);
        }
        Ok(CapturedImage {
            pixels,
            width: self.format.width,
            height: self.format.height,
        })
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
        log::info!("SyntheticBackend: released {}", self.spec.id);
    }
}

fn set_u32(target: &mut u32, key: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => log::warn!("SyntheticDevice: invalid {} '{}'", key, value),
    }
}

fn parse_color(value: &str) -> Option<[u8; 3]> {
    let named = match value.to_ascii_lowercase().as_str() {
        "brown" => Some([139, 69, 19]),
        "green" => Some(DEFAULT_COLOR),
        "blue" => Some([30, 80, 200]),
        "yellow" => Some([230, 200, 30]),
        "red" => Some([200, 30, 30]),
        "white" => Some([255, 255, 255]),
        "black" => Some([0, 0, 0]),
        _ => None,
    };
    if named.is_some() {
        return named;
    }
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(hex.get(range)?, 16).ok();
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_constraints() -> CaptureConstraints {
        CaptureConstraints {
            width: 32,
            height: 24,
            min_width: 16,
            min_height: 12,
            fps: 30,
            min_fps: 15,
        }
    }

    #[test]
    fn uri_parameters_configure_device() {
        let device = SyntheticDevice::from_uri(
            "stub://desk?color=%23102030&facing=rear&warmup=2&fail_after=5&width=800&height=600&fps=20",
        );
        assert_eq!(device.color, [0x10, 0x20, 0x30]);
        assert_eq!(device.facing, Facing::Rear);
        assert_eq!(device.warmup_reads, 2);
        assert_eq!(device.fail_after, Some(5));
        assert_eq!(
            device.max_format,
            NegotiatedFormat {
                width: 800,
                height: 600,
                fps: 20
            }
        );
        assert_eq!(device.label, "Synthetic camera (desk)");
    }

    #[test]
    fn warmup_reads_are_not_ready() -> anyhow::Result<()> {
        let mut backend =
            SyntheticBackend::new(vec![SyntheticDevice::new("stub://w", "Cam").with_warmup(1)]);
        let device = backend.enumerate()?.remove(0);
        let mut stream = backend.open(&device, &small_constraints())?;
        assert_eq!(stream.read_latest().unwrap_err(), CaptureError::NotReady);
        let image = stream.read_latest()?;
        assert_eq!((image.width, image.height), (32, 24));
        assert!(image.is_complete());
        Ok(())
    }

    #[test]
    fn open_fault_maps_to_capture_error() -> anyhow::Result<()> {
        let mut backend = SyntheticBackend::new(vec![
            SyntheticDevice::new("stub://busy", "Cam").with_fault(SyntheticFault::Busy)
        ]);
        let device = backend.enumerate()?.remove(0);
        let err = backend.open(&device, &small_constraints()).err().unwrap();
        assert_eq!(err, CaptureError::DeviceBusy);
        assert_eq!(backend.open_streams().load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn frames_are_filled_with_device_color() -> anyhow::Result<()> {
        let mut backend = SyntheticBackend::new(vec![
            SyntheticDevice::new("stub://paint", "Cam").with_color([200, 10, 30])
        ]);
        let device = backend.enumerate()?.remove(0);
        let mut stream = backend.open(&device, &small_constraints())?;
        let image = stream.read_latest()?;
        assert!(image.pixels.chunks(3).all(|px| px == [200, 10, 30]));
        Ok(())
    }

    #[test]
    fn dropping_stream_releases_it() -> anyhow::Result<()> {
        let mut backend = SyntheticBackend::from_uri("stub://release");
        let counter = backend.open_streams();
        let device = backend.enumerate()?.remove(0);
        let stream = backend.open(&device, &small_constraints())?;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(stream);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn denied_enumeration() {
        let backend = SyntheticBackend::from_uri("stub://x").deny_enumeration();
        assert_eq!(
            backend.enumerate().unwrap_err(),
            CaptureError::PermissionDenied
        );
    }
}
