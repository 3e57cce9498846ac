//! Detection state and the reconciler that owns it.
//!
//! Outcomes are applied one at a time in arrival order. Only the
//! reconciler mutates `DetectionState`; everyone else reads it through
//! accessors, so the history invariants cannot be broken from outside:
//!
//! ```compile_fail
//! use hue_watch::reconcile::DetectionReconciler;
//! use hue_watch::notify::ObserverSet;
//!
//! let reconciler = DetectionReconciler::new(ObserverSet::new());
//! reconciler.state().history.push("Unknown".to_string());
//! ```

use std::time::SystemTime;

use crate::detect::{is_reportable_label, ClassificationOutcome, UNKNOWN_LABEL};
use crate::notify::{Notification, ObserverSet};

/// Number of distinct labels kept in the history.
pub const HISTORY_CAPACITY: usize = 5;

/// Consecutive failures after which a failure notification is terminal.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Snapshot of what the pipeline currently believes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionState {
    current_label: Option<String>,
    history: Vec<String>,
    in_flight: bool,
    consecutive_failures: u32,
    detection_count: u64,
    last_detection_at: Option<SystemTime>,
}

impl DetectionState {
    /// Last applied label, `"Unknown"` included. Cleared when the camera
    /// stops.
    pub fn current_label(&self) -> Option<&str> {
        self.current_label.as_deref()
    }

    /// Distinct labels, most recent first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Outcomes that produced a label (a real one or `"Unknown"`).
    pub fn detection_count(&self) -> u64 {
        self.detection_count
    }

    pub fn last_detection_at(&self) -> Option<SystemTime> {
        self.last_detection_at
    }
}

/// Applies classification outcomes and notifies observers.
pub struct DetectionReconciler {
    state: DetectionState,
    failure_threshold: u32,
    observers: ObserverSet,
}

impl DetectionReconciler {
    pub fn new(observers: ObserverSet) -> Self {
        Self {
            state: DetectionState::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            observers,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Mark a submission as started. Returns `false` (and changes nothing)
    /// when one is already in flight.
    pub fn begin_submission(&mut self) -> bool {
        if self.state.in_flight {
            return false;
        }
        self.state.in_flight = true;
        self.observers
            .emit(Notification::DetectingStateChanged { detecting: true });
        true
    }

    /// Mark the in-flight submission as finished, whatever its outcome.
    pub fn finish_submission(&mut self) {
        if !self.state.in_flight {
            return;
        }
        self.state.in_flight = false;
        self.observers
            .emit(Notification::DetectingStateChanged { detecting: false });
    }

    /// Fold one outcome into the state.
    pub fn apply(&mut self, outcome: ClassificationOutcome) {
        match outcome {
            ClassificationOutcome::Success { label } if is_reportable_label(&label) => {
                self.apply_label(label.trim().to_string())
            }
            ClassificationOutcome::Success { label } => {
                log::debug!("reconcile: label {:?} treated as unknown", label);
                self.apply_unknown()
            }
            ClassificationOutcome::Unknown => self.apply_unknown(),
            ClassificationOutcome::Failure { cause } => {
                self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
                let attempt = self.state.consecutive_failures;
                let terminal = attempt >= self.failure_threshold;
                self.observers.emit(Notification::DetectionFailed {
                    cause,
                    attempt,
                    terminal,
                });
            }
        }
    }

    /// Forget the current label; history and counters are kept.
    pub fn clear_current(&mut self) {
        self.state.current_label = None;
    }

    fn apply_label(&mut self, label: String) {
        let previous = self.state.history.iter().position(|seen| *seen == label);
        match previous {
            Some(index) => {
                let existing = self.state.history.remove(index);
                self.state.history.insert(0, existing);
            }
            None => {
                self.state.history.insert(0, label.clone());
                self.state.history.truncate(HISTORY_CAPACITY);
            }
        }
        self.state.consecutive_failures = 0;
        self.record_detection(label.clone());

        self.observers.emit(Notification::ColorDetected {
            label: label.clone(),
        });
        if previous.is_none() {
            self.observers.emit(Notification::NewColorFound { label });
        }
    }

    fn apply_unknown(&mut self) {
        self.record_detection(UNKNOWN_LABEL.to_string());
        self.observers.emit(Notification::ColorDetected {
            label: UNKNOWN_LABEL.to_string(),
        });
    }

    fn record_detection(&mut self, label: String) {
        self.state.current_label = Some(label);
        self.state.detection_count += 1;
        self.state.last_detection_at = Some(SystemTime::now());
    }
}
