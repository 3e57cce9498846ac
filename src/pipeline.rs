//! Capture, submit and reconcile event loop.
//!
//! One thread owns the session, the scheduler and the reconciler and
//! processes events one at a time. The only concurrent work is the HTTP
//! request, which runs on a short-lived worker thread and reports back
//! through the loop's channel as `PipelineEvent::Completed`.
//!
//! A watchdog bounds every submission: if no completion arrives within the
//! submit timeout plus a small grace period, the loop records
//! `Failure{Timeout}` itself and clears `in_flight`. A completion that shows
//! up afterwards is recognised by its submission id and ignored.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::capture::{backend_for, CaptureSession, CaptureState};
use crate::config::HueWatchConfig;
use crate::connectivity::ConnectivityProbe;
use crate::detect::{ClassificationOutcome, Classifier, DetectionClient, DEFAULT_SUBMIT_TIMEOUT};
use crate::error::{CaptureError, FailureCause};
use crate::frame::Frame;
use crate::notify::ObserverSet;
use crate::reconcile::{DetectionReconciler, DetectionState};
use crate::scheduler::{SamplingScheduler, TickDecision, DEFAULT_SAMPLE_INTERVAL};

/// Slack on top of the submit timeout before the watchdog fires.
pub const WATCHDOG_GRACE: Duration = Duration::from_millis(250);

/// Longest `run` waits without an event or deadline.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Input to the event loop.
#[derive(Debug)]
pub enum PipelineEvent {
    /// Endpoint reachability changed.
    Connectivity(bool),
    /// A submission finished.
    Completed {
        submission: u64,
        outcome: ClassificationOutcome,
    },
    StartCamera(Option<String>),
    StopCamera,
    Shutdown,
}

/// Cloneable sender for feeding events into a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: Sender<PipelineEvent>,
}

impl PipelineHandle {
    /// Returns `false` once the pipeline is gone.
    pub fn send(&self, event: PipelineEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn set_online(&self, online: bool) -> bool {
        self.send(PipelineEvent::Connectivity(online))
    }

    pub fn start_camera(&self, device: Option<String>) -> bool {
        self.send(PipelineEvent::StartCamera(device))
    }

    pub fn stop_camera(&self) -> bool {
        self.send(PipelineEvent::StopCamera)
    }

    pub fn shutdown(&self) -> bool {
        self.send(PipelineEvent::Shutdown)
    }
}

struct PendingSubmission {
    id: u64,
    deadline: Instant,
    generation: u64,
}

pub struct Pipeline {
    session: CaptureSession,
    scheduler: SamplingScheduler,
    reconciler: DetectionReconciler,
    classifier: Arc<dyn Classifier>,
    submit_timeout: Duration,
    online: bool,
    tx: Sender<PipelineEvent>,
    rx: Receiver<PipelineEvent>,
    pending: Option<PendingSubmission>,
    next_submission: u64,
    // Bumped on every camera stop; completions from an older generation are
    // not applied.
    generation: u64,
    running: bool,
}

impl Pipeline {
    pub fn new(
        session: CaptureSession,
        reconciler: DetectionReconciler,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            session,
            scheduler: SamplingScheduler::new(DEFAULT_SAMPLE_INTERVAL),
            reconciler,
            classifier,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            online: true,
            tx,
            rx,
            pending: None,
            next_submission: 1,
            generation: 0,
            running: true,
        }
    }

    /// Build the full pipeline from configuration: camera backend, HTTP
    /// client and reconciler all report to `observers`.
    pub fn from_config(cfg: &HueWatchConfig, observers: ObserverSet) -> Result<Self> {
        let backend = backend_for(cfg.capture.device.as_deref());
        log::info!("pipeline: using {} capture backend", backend.name());
        let session = CaptureSession::new(backend, cfg.capture.constraints())
            .with_jpeg_quality(cfg.capture.jpeg_quality)
            .with_observers(observers.clone());
        let reconciler =
            DetectionReconciler::new(observers).with_failure_threshold(cfg.failure_threshold);
        let client = DetectionClient::new(&cfg.endpoint, cfg.submit_timeout)?;
        Ok(Self::new(session, reconciler, Arc::new(client))
            .with_sample_interval(cfg.sample_interval)
            .with_submit_timeout(cfg.submit_timeout))
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.scheduler = SamplingScheduler::new(interval);
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            tx: self.tx.clone(),
        }
    }

    /// Start the configured connectivity probe, wired to this pipeline.
    ///
    /// Returns `None` when probing is disabled, in which case the endpoint
    /// is always treated as reachable.
    pub fn spawn_probe(&self, cfg: &HueWatchConfig) -> Result<Option<ConnectivityProbe>> {
        if !cfg.connectivity.enabled {
            return Ok(None);
        }
        let handle = self.handle();
        let probe = ConnectivityProbe::spawn(
            &cfg.endpoint,
            cfg.connectivity.probe_interval,
            cfg.connectivity.probe_timeout,
            move |online| {
                handle.set_online(online);
            },
        )?;
        Ok(Some(probe))
    }

    pub fn state(&self) -> &DetectionState {
        self.reconciler.state()
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn scheduler(&self) -> &SamplingScheduler {
        &self.scheduler
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start the camera and arm the sampling timer.
    pub fn start_camera(&mut self, device: Option<&str>) -> Result<(), CaptureError> {
        self.session.start(device)?;
        self.scheduler.arm(Instant::now());
        Ok(())
    }

    /// Cancel the timer, release the camera and clear the current label.
    ///
    /// Idempotent. An in-flight submission keeps `in_flight` set until it
    /// completes or the watchdog fires, but its outcome is discarded.
    pub fn stop_camera(&mut self) {
        self.scheduler.cancel();
        if *self.session.state() == CaptureState::Idle {
            return;
        }
        self.session.stop();
        self.generation += 1;
        self.reconciler.clear_current();
    }

    /// Run one scheduler tick immediately.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, now: Instant) {
        let decision =
            self.scheduler
                .on_tick(now, &mut self.session, &mut self.reconciler, self.online);
        match decision {
            TickDecision::Submit(frame) => self.dispatch(frame, now),
            TickDecision::SessionFailed(err) => {
                log::warn!("pipeline: sampling stopped, camera failed: {}", err);
            }
            TickDecision::Skipped(_) | TickDecision::CaptureFailed => {}
        }
    }

    fn dispatch(&mut self, frame: Frame, now: Instant) {
        let id = self.next_submission;
        self.next_submission += 1;
        let classifier = self.classifier.clone();
        let tx = self.tx.clone();
        log::debug!(
            "pipeline: submission {} ({}x{}, {} bytes)",
            id,
            frame.width,
            frame.height,
            frame.len()
        );
        let spawned = std::thread::Builder::new()
            .name("hue-watch-submit".to_string())
            .spawn(move || {
                let outcome = classifier.classify(frame);
                // The loop may already be gone during shutdown.
                let _ = tx.send(PipelineEvent::Completed {
                    submission: id,
                    outcome,
                });
            });
        match spawned {
            Ok(_) => {
                self.pending = Some(PendingSubmission {
                    id,
                    deadline: now + self.submit_timeout + WATCHDOG_GRACE,
                    generation: self.generation,
                });
            }
            Err(err) => {
                log::error!("pipeline: failed to start submission worker: {}", err);
                self.reconciler
                    .apply(ClassificationOutcome::failure(FailureCause::Network(format!(
                        "submission worker: {}",
                        err
                    ))));
                self.reconciler.finish_submission();
            }
        }
    }

    /// Handle one event.
    pub fn process(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Connectivity(online) => {
                if self.online != online {
                    log::info!(
                        "pipeline: endpoint {}",
                        if online { "online" } else { "offline" }
                    );
                }
                self.online = online;
            }
            PipelineEvent::Completed {
                submission,
                outcome,
            } => self.complete(submission, outcome),
            PipelineEvent::StartCamera(device) => {
                if let Err(err) = self.start_camera(device.as_deref()) {
                    log::warn!("pipeline: camera start failed: {}", err);
                }
            }
            PipelineEvent::StopCamera => self.stop_camera(),
            PipelineEvent::Shutdown => {
                log::info!("pipeline: shutting down");
                self.stop_camera();
                self.running = false;
            }
        }
    }

    fn complete(&mut self, submission: u64, outcome: ClassificationOutcome) {
        let pending = match self.pending.take() {
            Some(pending) if pending.id == submission => pending,
            other => {
                self.pending = other;
                log::debug!(
                    "pipeline: late completion for submission {} ignored",
                    submission
                );
                return;
            }
        };
        if pending.generation == self.generation {
            self.reconciler.apply(outcome);
        } else {
            log::debug!(
                "pipeline: submission {} finished after the camera stopped, discarded",
                submission
            );
        }
        self.reconciler.finish_submission();
    }

    fn check_watchdog(&mut self, now: Instant) {
        let expired = matches!(&self.pending, Some(pending) if now >= pending.deadline);
        if !expired {
            return;
        }
        if let Some(pending) = self.pending.take() {
            log::warn!(
                "pipeline: submission {} exceeded {}ms, treating as timed out",
                pending.id,
                self.submit_timeout.as_millis()
            );
            if pending.generation == self.generation {
                self.reconciler
                    .apply(ClassificationOutcome::failure(FailureCause::Timeout));
            }
            self.reconciler.finish_submission();
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let tick = self.scheduler.next_deadline();
        let watchdog = self.pending.as_ref().map(|pending| pending.deadline);
        match (tick, watchdog) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Wait for at most `max_wait` for an event or a deadline, then handle
    /// whatever is due. Returns `false` once the pipeline has shut down.
    pub fn pump(&mut self, max_wait: Duration) -> bool {
        if !self.running {
            return false;
        }
        let now = Instant::now();
        let wait = self
            .next_wake()
            .map_or(max_wait, |wake| wake.saturating_duration_since(now).min(max_wait));
        match self.rx.recv_timeout(wait) {
            Ok(event) => self.process(event),
            Err(RecvTimeoutError::Timeout) => {}
            // The pipeline holds a sender itself, so this cannot happen
            // while it is alive.
            Err(RecvTimeoutError::Disconnected) => self.running = false,
        }
        if !self.running {
            return false;
        }
        let now = Instant::now();
        self.check_watchdog(now);
        if self.scheduler.due(now) {
            self.tick_at(now);
        }
        self.running
    }

    /// Process events until `Shutdown`.
    pub fn run(&mut self) {
        while self.pump(IDLE_WAIT) {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;

    use super::*;
    use crate::capture::{serial_claims, CaptureConstraints, SyntheticBackend};
    use crate::notify::{ChannelObserver, Notification};

    fn small_constraints() -> CaptureConstraints {
        CaptureConstraints {
            width: 64,
            height: 48,
            min_width: 32,
            min_height: 24,
            fps: 30,
            min_fps: 15,
        }
    }

    fn pipeline<C: Classifier + 'static>(
        uri: &str,
        classifier: C,
    ) -> (Pipeline, Receiver<Notification>) {
        let (observer, rx) = ChannelObserver::new();
        let observers = ObserverSet::new().with(observer);
        let session = CaptureSession::new(
            Box::new(SyntheticBackend::from_uri(uri)),
            small_constraints(),
        )
        .with_observers(observers.clone());
        let pipeline = Pipeline::new(
            session,
            DetectionReconciler::new(observers),
            Arc::new(classifier),
        )
        .with_sample_interval(Duration::from_millis(20))
        .with_submit_timeout(Duration::from_millis(200));
        (pipeline, rx)
    }

    fn pump_until<F: Fn(&Pipeline) -> bool>(pipeline: &mut Pipeline, done: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(pipeline) {
            assert!(Instant::now() < deadline, "pipeline did not settle");
            pipeline.pump(Duration::from_millis(10));
        }
    }

    #[test]
    fn detection_flows_to_state() {
        let _serial = serial_claims();
        let uri = "stub://pipe-flow?color=blue";
        let (mut pipeline, _rx) = pipeline(uri, |_frame: Frame| {
            ClassificationOutcome::from_label("blue")
        });
        pipeline.start_camera(Some(uri)).expect("start");
        pump_until(&mut pipeline, |p| p.state().detection_count() >= 1);

        assert_eq!(pipeline.state().current_label(), Some("blue"));
        assert_eq!(pipeline.state().history(), ["blue"]);
    }

    #[test]
    fn hanging_classifier_times_out() {
        let _serial = serial_claims();
        let uri = "stub://pipe-hang";
        let (mut pipeline, rx) = pipeline(uri, |_frame: Frame| {
            std::thread::sleep(Duration::from_secs(2));
            ClassificationOutcome::from_label("late")
        });
        pipeline.start_camera(Some(uri)).expect("start");
        pump_until(&mut pipeline, |p| p.state().consecutive_failures() >= 1);

        assert!(!pipeline.state().in_flight());
        assert!(rx.try_iter().any(|n| matches!(
            n,
            Notification::DetectionFailed {
                cause: FailureCause::Timeout,
                ..
            }
        )));
        pipeline.stop_camera();
    }

    #[test]
    fn stop_discards_in_flight_outcome() {
        let _serial = serial_claims();
        let uri = "stub://pipe-stop";
        let (mut pipeline, _rx) = pipeline(uri, |_frame: Frame| {
            std::thread::sleep(Duration::from_millis(50));
            ClassificationOutcome::from_label("green")
        });
        pipeline.start_camera(Some(uri)).expect("start");
        pump_until(&mut pipeline, |p| p.state().in_flight());

        pipeline.stop_camera();
        assert!(!pipeline.scheduler().is_armed());
        pump_until(&mut pipeline, |p| !p.state().in_flight());

        assert_eq!(pipeline.state().current_label(), None);
        assert!(pipeline.state().history().is_empty());
        assert_eq!(pipeline.state().detection_count(), 0);
    }

    #[test]
    fn offline_blocks_new_submissions() {
        let _serial = serial_claims();
        let uri = "stub://pipe-offline";
        let (mut pipeline, _rx) = pipeline(uri, |_frame: Frame| {
            ClassificationOutcome::from_label("brown")
        });
        pipeline.process(PipelineEvent::Connectivity(false));
        pipeline.start_camera(Some(uri)).expect("start");
        for _ in 0..5 {
            pipeline.pump(Duration::from_millis(25));
        }
        assert!(!pipeline.state().in_flight());
        assert_eq!(pipeline.state().detection_count(), 0);

        pipeline.handle().set_online(true);
        pump_until(&mut pipeline, |p| p.state().detection_count() >= 1);
        assert_eq!(pipeline.state().current_label(), Some("brown"));
    }

    #[test]
    fn going_offline_keeps_in_flight_submission() {
        let _serial = serial_claims();
        let uri = "stub://pipe-offline-inflight?color=blue";
        let (mut pipeline, _rx) = pipeline(uri, |_frame: Frame| {
            std::thread::sleep(Duration::from_millis(50));
            ClassificationOutcome::from_label("blue")
        });
        pipeline.start_camera(Some(uri)).expect("start");
        pump_until(&mut pipeline, |p| p.state().in_flight());

        pipeline.process(PipelineEvent::Connectivity(false));
        assert!(!pipeline.is_online());
        assert!(pipeline.state().in_flight());
        pump_until(&mut pipeline, |p| !p.state().in_flight());

        assert_eq!(pipeline.state().current_label(), Some("blue"));
        assert_eq!(pipeline.state().detection_count(), 1);
        assert_eq!(pipeline.state().consecutive_failures(), 0);
        pipeline.stop_camera();
    }

    #[test]
    fn shutdown_stops_loop_and_camera() {
        let _serial = serial_claims();
        let uri = "stub://pipe-shutdown";
        let (mut pipeline, _rx) = pipeline(uri, |_frame: Frame| ClassificationOutcome::Unknown);
        pipeline.start_camera(Some(uri)).expect("start");
        assert!(pipeline.handle().shutdown());
        pipeline.run();
        assert!(!pipeline.is_running());
        assert_eq!(*pipeline.session().state(), CaptureState::Idle);
    }

    #[test]
    fn late_completion_is_ignored() {
        let uri = "stub://pipe-late";
        let (mut pipeline, _rx) = pipeline(uri, |_frame: Frame| ClassificationOutcome::Unknown);
        pipeline.process(PipelineEvent::Completed {
            submission: 42,
            outcome: ClassificationOutcome::from_label("red"),
        });
        assert_eq!(pipeline.state().current_label(), None);
        assert_eq!(pipeline.state().detection_count(), 0);
    }
}
