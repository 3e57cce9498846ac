//! Observer notifications.
//!
//! Everything a presentation layer may depend on flows through
//! `Notification`. Observers are called synchronously on the pipeline
//! thread, in the order events are applied, and must not block.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::capture::CaptureState;
use crate::error::FailureCause;

/// State change pushed to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// A classification was applied (a real label or "Unknown").
    ColorDetected { label: String },
    /// The label was not in the history before this detection.
    NewColorFound { label: String },
    /// A submission failed. `terminal` is set once the consecutive failure
    /// threshold is reached; sampling continues regardless.
    DetectionFailed {
        cause: FailureCause,
        attempt: u32,
        terminal: bool,
    },
    /// A submission started (`true`) or finished (`false`).
    DetectingStateChanged { detecting: bool },
    /// The capture session moved to a new state.
    CameraStateChanged { state: CaptureState },
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::ColorDetected { label } => write!(f, "color detected: {}", label),
            Notification::NewColorFound { label } => write!(f, "new color found: {}", label),
            Notification::DetectionFailed {
                cause,
                attempt,
                terminal,
            } => {
                if *terminal {
                    write!(
                        f,
                        "detection failed after {} attempts: {}; check backend connection",
                        attempt, cause
                    )
                } else {
                    write!(f, "detection failed (attempt {}): {}; retrying", attempt, cause)
                }
            }
            Notification::DetectingStateChanged { detecting } => {
                write!(f, "detecting={}", detecting)
            }
            Notification::CameraStateChanged { state } => write!(f, "camera {}", state),
        }
    }
}

/// Receiver of pipeline notifications.
pub trait Observer: Send + Sync {
    fn notify(&self, notification: &Notification);
}

impl<F> Observer for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn notify(&self, notification: &Notification) {
        self(notification)
    }
}

/// Fan-out to every registered observer, in registration order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<O: Observer + 'static>(mut self, observer: O) -> Self {
        self.push(observer);
        self
    }

    pub fn push<O: Observer + 'static>(&mut self, observer: O) {
        self.observers.push(Arc::new(observer));
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn emit(&self, notification: Notification) {
        for observer in &self.observers {
            observer.notify(&notification);
        }
    }
}

/// Writes every notification to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::DetectionFailed { terminal: true, .. } => {
                log::error!("{}", notification)
            }
            Notification::DetectionFailed { .. } => log::warn!("{}", notification),
            Notification::CameraStateChanged {
                state: CaptureState::Failed(_),
            } => log::error!("{}", notification),
            Notification::DetectingStateChanged { .. } => log::debug!("{}", notification),
            _ => log::info!("{}", notification),
        }
    }
}

/// Forwards notifications into an mpsc channel.
pub struct ChannelObserver {
    tx: Mutex<Sender<Notification>>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<Notification>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl Observer for ChannelObserver {
    fn notify(&self, notification: &Notification) {
        if let Ok(tx) = self.tx.lock() {
            // A dropped receiver just means nobody is listening any more.
            let _ = tx.send(notification.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observers_receive_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = seen.clone();
        let second = seen.clone();
        let set = ObserverSet::new()
            .with(move |_: &Notification| first.lock().unwrap().push("first"))
            .with(move |_: &Notification| second.lock().unwrap().push("second"));

        set.emit(Notification::DetectingStateChanged { detecting: true });
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn channel_observer_forwards_clones() {
        let (observer, rx) = ChannelObserver::new();
        let set = ObserverSet::new().with(observer);
        set.emit(Notification::ColorDetected {
            label: "Blue".into(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::ColorDetected {
                label: "Blue".into()
            }
        );
    }

    #[test]
    fn failure_text_switches_to_terminal_wording() {
        let retrying = Notification::DetectionFailed {
            cause: FailureCause::Timeout,
            attempt: 1,
            terminal: false,
        };
        assert!(retrying.to_string().contains("retrying"));
        let terminal = Notification::DetectionFailed {
            cause: FailureCause::Timeout,
            attempt: 3,
            terminal: true,
        };
        assert!(terminal.to_string().contains("after 3 attempts"));
    }
}
