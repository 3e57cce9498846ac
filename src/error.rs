//! Error taxonomy shared by the capture and submission halves of the pipeline.
//!
//! Capture errors describe why a camera session could not start or had to be
//! torn down. Failure causes describe why a single submitted frame did not
//! produce a classification. The two are kept apart because they heal
//! differently: a capture error parks the session in `Failed` until someone
//! calls `start` again, while a failure cause only bumps a counter and the
//! next tick tries again.

/// Capture-side failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureError {
    /// Capture is not available in this build or runtime.
    NotSupported,
    /// Access to the capture device was refused.
    PermissionDenied,
    /// No device matched the request.
    DeviceNotFound,
    /// The device is already claimed by another consumer.
    DeviceBusy,
    /// The source has not buffered a displayable frame yet.
    NotReady,
    /// The device cannot satisfy the minimum resolution or frame rate.
    Overconstrained(String),
    /// The live stream faulted.
    StreamError(String),
    /// A frame was read but could not be encoded. The session stays live.
    Encode(String),
}

impl CaptureError {
    /// Stable short code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::NotSupported => "not_supported",
            CaptureError::PermissionDenied => "permission_denied",
            CaptureError::DeviceNotFound => "device_not_found",
            CaptureError::DeviceBusy => "device_busy",
            CaptureError::NotReady => "not_ready",
            CaptureError::Overconstrained(_) => "overconstrained",
            CaptureError::StreamError(_) => "stream_error",
            CaptureError::Encode(_) => "encode_failed",
        }
    }

    /// Whether this error ends the current session.
    ///
    /// `NotReady` and `Encode` are per-snapshot conditions; `DeviceBusy` is
    /// also returned when `start` is called on a live session, which must not
    /// disturb that session.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            CaptureError::NotReady | CaptureError::Encode(_) | CaptureError::DeviceBusy
        )
    }
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NotSupported => {
                write!(f, "camera capture is not supported in this runtime")
            }
            CaptureError::PermissionDenied => write!(
                f,
                "camera permission denied; allow camera access and try again"
            ),
            CaptureError::DeviceNotFound => {
                write!(f, "no camera found; connect a camera and try again")
            }
            CaptureError::DeviceBusy => {
                write!(f, "camera is already in use by another consumer")
            }
            CaptureError::NotReady => {
                write!(f, "camera has not produced a displayable frame yet")
            }
            CaptureError::Overconstrained(reason) => {
                write!(f, "camera cannot satisfy capture constraints: {}", reason)
            }
            CaptureError::StreamError(reason) => write!(f, "video stream error: {}", reason),
            CaptureError::Encode(reason) => write!(f, "failed to encode frame: {}", reason),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Why a submitted frame produced no classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureCause {
    /// The request did not complete within the submission timeout.
    Timeout,
    /// Transport-level fault other than a timeout.
    Network(String),
    /// The service answered with a non-success status.
    ServerError { status: u16, body: String },
    /// The frame could not be captured or encoded for upload.
    FrameCapture(String),
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Timeout => write!(f, "request timed out"),
            FailureCause::Network(detail) => write!(f, "network error: {}", detail),
            FailureCause::ServerError { status, body } => {
                if body.trim().is_empty() {
                    write!(f, "backend error: {}", status)
                } else {
                    write!(f, "backend error: {} - {}", status, body.trim())
                }
            }
            FailureCause::FrameCapture(detail) => write!(f, "frame capture failed: {}", detail),
        }
    }
}

impl std::error::Error for FailureCause {}
