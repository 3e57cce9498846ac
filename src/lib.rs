//! Hue Watch
//!
//! Samples frames from a live camera, submits them to a remote color
//! classification service over HTTP and reconciles the results into a
//! small, observable detection state.
//!
//! # Architecture
//!
//! The pipeline keeps two invariants by construction:
//!
//! 1. **One live camera**: at most one `CaptureSession` is live per
//!    process, whichever device it opened; a second `start` fails with
//!    `DeviceBusy`.
//! 2. **One submission in flight**: a scheduler tick that finds a
//!    submission outstanding does nothing. Every submission is bounded by
//!    the submit timeout, so the flag can never stay set.
//!
//! # Module Structure
//!
//! - `capture`: devices, the session state machine, capture backends
//! - `frame`: encoded snapshots
//! - `detect`: the HTTP classification client and response mapping
//! - `scheduler`: the sampling timer
//! - `reconcile`: detection state and history
//! - `notify`: the observer surface
//! - `connectivity`: endpoint reachability probing
//! - `pipeline`: the event loop tying it together
//! - `config`: file and environment configuration

pub mod capture;
pub mod config;
pub mod connectivity;
pub mod detect;
pub mod error;
pub mod frame;
pub mod notify;
pub mod pipeline;
pub mod reconcile;
pub mod scheduler;
pub mod ui;

pub use capture::{
    backend_for, CaptureBackend, CaptureConstraints, CaptureSession, CaptureState, Device,
    DeviceEnumerator, Facing, VideoStream,
};
pub use config::HueWatchConfig;
pub use detect::{ClassificationOutcome, Classifier, DetectionClient};
pub use error::{CaptureError, FailureCause};
pub use frame::Frame;
pub use notify::{LogObserver, Notification, Observer, ObserverSet};
pub use pipeline::{Pipeline, PipelineEvent, PipelineHandle};
pub use reconcile::{DetectionReconciler, DetectionState};
pub use scheduler::{SamplingScheduler, TickDecision};
