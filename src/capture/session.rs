use crate::error::CaptureError;
use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};
use crate::notify::{Notification, ObserverSet};

use super::{
    CaptureBackend, CaptureConstraints, Device, DeviceClaim, DeviceEnumerator, Facing,
    NegotiatedFormat, VideoStream,
};

/// Lifecycle of a capture session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CaptureState {
    #[default]
    Idle,
    Starting,
    Live,
    Stopping,
    Failed(CaptureError),
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::Starting => write!(f, "starting"),
            CaptureState::Live => write!(f, "live"),
            CaptureState::Stopping => write!(f, "stopping"),
            CaptureState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Everything held while a session is live. Dropping it releases the
/// stream first and the device claim second.
struct ActiveStream {
    stream: Box<dyn VideoStream>,
    device: Device,
    _claim: DeviceClaim,
}

/// Owns the live stream for one camera and enforces the session state
/// machine:
///
/// ```text
/// Idle --start--> Starting --ready--> Live --stop--> Stopping --> Idle
///                 Starting --error--> Failed --stop--> Idle
///                                     Live --stream error--> Failed
/// ```
///
/// Frames are copied out with `snapshot`; nothing is retained between
/// snapshots.
pub struct CaptureSession {
    backend: Box<dyn CaptureBackend>,
    constraints: CaptureConstraints,
    jpeg_quality: u8,
    state: CaptureState,
    active: Option<ActiveStream>,
    observers: ObserverSet,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn CaptureBackend>, constraints: CaptureConstraints) -> Self {
        Self {
            backend,
            constraints,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            state: CaptureState::Idle,
            active: None,
            observers: ObserverSet::new(),
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn with_observers(mut self, observers: ObserverSet) -> Self {
        self.observers = observers;
        self
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == CaptureState::Live
    }

    /// Device backing the live stream.
    pub fn device(&self) -> Option<&Device> {
        self.active.as_ref().map(|active| &active.device)
    }

    /// Format negotiated for the live stream.
    pub fn format(&self) -> Option<NegotiatedFormat> {
        self.active.as_ref().map(|active| active.stream.format())
    }

    pub fn enumerator(&self) -> DeviceEnumerator<'_> {
        DeviceEnumerator::new(self.backend.as_ref())
    }

    /// Claim a device and begin streaming.
    ///
    /// Prefers `device_id` when given, then an environment-facing camera,
    /// then the default device. Calling this on a live (or starting)
    /// session fails with `DeviceBusy` and leaves that session untouched.
    pub fn start(&mut self, device_id: Option<&str>) -> Result<(), CaptureError> {
        match self.state {
            CaptureState::Idle | CaptureState::Failed(_) => {}
            CaptureState::Starting | CaptureState::Live | CaptureState::Stopping => {
                log::warn!("CaptureSession: start rejected, session is {}", self.state);
                return Err(CaptureError::DeviceBusy);
            }
        }

        self.transition(CaptureState::Starting);
        match self.open(device_id) {
            Ok(active) => {
                let format = active.stream.format();
                log::info!(
                    "CaptureSession: live on {} ({}x{} @ {}fps)",
                    active.device.display_label(),
                    format.width,
                    format.height,
                    format.fps
                );
                self.active = Some(active);
                self.transition(CaptureState::Live);
                Ok(())
            }
            Err(err) => {
                log::warn!("CaptureSession: start failed: {}", err);
                self.transition(CaptureState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    fn open(&mut self, device_id: Option<&str>) -> Result<ActiveStream, CaptureError> {
        let devices = self.enumerator().list()?;
        let device = match device_id {
            Some(id) => devices.iter().find(|device| device.id == id),
            None => devices
                .iter()
                .find(|device| device.facing == Facing::Rear)
                .or_else(|| DeviceEnumerator::select_default(&devices)),
        }
        .cloned()
        .ok_or(CaptureError::DeviceNotFound)?;

        // The claim is dropped (released) if opening the stream fails below.
        let claim = DeviceClaim::acquire(&device.id)?;
        let stream = self.backend.open(&device, &self.constraints)?;
        let format = self.constraints.accept(stream.format())?;
        log::debug!(
            "CaptureSession: {} accepted {}x{} @ {}fps",
            device.id,
            format.width,
            format.height,
            format.fps
        );
        Ok(ActiveStream {
            stream,
            device,
            _claim: claim,
        })
    }

    /// Take a JPEG snapshot of the current frame.
    ///
    /// Only valid while live. `NotReady` and `Encode` errors leave the session
    /// live; any other stream error tears the session down into `Failed`.
    pub fn snapshot(&mut self) -> Result<Frame, CaptureError> {
        if !self.is_live() {
            return Err(CaptureError::NotReady);
        }
        let Some(active) = self.active.as_mut() else {
            return Err(CaptureError::NotReady);
        };
        let image = match active.stream.read_latest() {
            Ok(image) => image,
            Err(err) if !err.is_terminal() => return Err(err),
            Err(err) => {
                self.fail(err.clone());
                return Err(err);
            }
        };
        let frame = Frame::encode(&image, self.jpeg_quality)?;
        log::debug!(
            "CaptureSession: snapshot {}x{} ({} bytes)",
            frame.width,
            frame.height,
            frame.len()
        );
        Ok(frame)
    }

    /// Release the stream and return to `Idle`.
    ///
    /// Idempotent: from `Idle` this does nothing and emits nothing.
    pub fn stop(&mut self) {
        match self.state {
            CaptureState::Idle => {}
            CaptureState::Failed(_) => {
                self.active = None;
                self.transition(CaptureState::Idle);
            }
            CaptureState::Starting | CaptureState::Live | CaptureState::Stopping => {
                self.transition(CaptureState::Stopping);
                if let Some(active) = self.active.take() {
                    log::info!("CaptureSession: releasing {}", active.device.id);
                    drop(active);
                }
                self.transition(CaptureState::Idle);
            }
        }
    }

    fn fail(&mut self, err: CaptureError) {
        log::error!("CaptureSession: stream failed: {}", err);
        self.active = None;
        self.transition(CaptureState::Failed(err));
    }

    fn transition(&mut self, next: CaptureState) {
        if self.state == next {
            return;
        }
        log::debug!("CaptureSession: {} -> {}", self.state, next);
        self.state = next.clone();
        self.observers
            .emit(Notification::CameraStateChanged { state: next });
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}
