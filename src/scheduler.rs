use std::time::{Duration, Instant};

use crate::capture::CaptureSession;
use crate::detect::ClassificationOutcome;
use crate::error::{CaptureError, FailureCause};
use crate::frame::Frame;
use crate::reconcile::DetectionReconciler;

/// Deployed sampling interval.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(15);

/// Why a tick did nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    NotLive,
    Offline,
    NotReady,
}

/// What a tick decided.
#[derive(Debug)]
pub enum TickDecision {
    /// No-op; nothing was captured or recorded.
    Skipped(SkipReason),
    /// A frame was captured and `in_flight` is now set. The caller owns the
    /// submission and must report back through `DetectionReconciler`.
    Submit(Frame),
    /// The frame could not be encoded; a failure was recorded and the
    /// session stays live.
    CaptureFailed,
    /// The stream faulted and the session moved to `Failed`. The timer is
    /// cancelled.
    SessionFailed(CaptureError),
}

/// Periodic timer driving capture-and-submit cycles.
///
/// The scheduler does not own a thread; the event loop asks for the next
/// deadline and calls `on_tick` when it passes. Cancelling is therefore
/// synchronous: once `cancel` returns, `due` is false until `arm` is called
/// again.
#[derive(Debug)]
pub struct SamplingScheduler {
    interval: Duration,
    next_tick: Option<Instant>,
}

impl SamplingScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_tick: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start (or restart) the timer; the first tick fires one interval from
    /// `now`.
    pub fn arm(&mut self, now: Instant) {
        self.next_tick = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.next_tick = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn due(&self, now: Instant) -> bool {
        self.next_tick.map_or(false, |deadline| now >= deadline)
    }

    /// Run one tick.
    ///
    /// Re-arms the timer, then skips if a submission is in flight, the
    /// session is not live, or the endpoint is unreachable. Otherwise takes
    /// a snapshot and marks the submission as in flight.
    pub fn on_tick(
        &mut self,
        now: Instant,
        session: &mut CaptureSession,
        reconciler: &mut DetectionReconciler,
        online: bool,
    ) -> TickDecision {
        if self.next_tick.is_none() {
            return TickDecision::Skipped(SkipReason::NotLive);
        }
        self.next_tick = Some(now + self.interval);

        if reconciler.state().in_flight() {
            log::debug!("scheduler: tick skipped, submission in flight");
            return TickDecision::Skipped(SkipReason::InFlight);
        }
        if !session.is_live() {
            return TickDecision::Skipped(SkipReason::NotLive);
        }
        if !online {
            log::debug!("scheduler: tick skipped, endpoint offline");
            return TickDecision::Skipped(SkipReason::Offline);
        }

        match session.snapshot() {
            Ok(frame) => {
                reconciler.begin_submission();
                TickDecision::Submit(frame)
            }
            Err(CaptureError::NotReady) => {
                log::debug!("scheduler: tick skipped, no frame buffered yet");
                TickDecision::Skipped(SkipReason::NotReady)
            }
            Err(err) if !err.is_terminal() => {
                reconciler.apply(ClassificationOutcome::failure(FailureCause::FrameCapture(
                    err.to_string(),
                )));
                TickDecision::CaptureFailed
            }
            Err(err) => {
                self.cancel();
                TickDecision::SessionFailed(err)
            }
        }
    }
}

impl Default for SamplingScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL)
    }
}
