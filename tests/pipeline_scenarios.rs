use anyhow::Result;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hue_watch::capture::{SyntheticBackend, SyntheticDevice};
use hue_watch::notify::ChannelObserver;
use hue_watch::{
    CaptureConstraints, CaptureError, CaptureSession, CaptureState, ClassificationOutcome,
    Classifier, DetectionClient, DetectionReconciler, FailureCause, Frame, Notification,
    ObserverSet, Pipeline,
};

/// Only one camera may be live per process, so scenarios run one at a time.
static CAMERA: Mutex<()> = Mutex::new(());

fn exclusive_camera() -> MutexGuard<'static, ()> {
    CAMERA.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replays a fixed list of outcomes, then answers `Unknown`.
struct Scripted {
    outcomes: Mutex<VecDeque<ClassificationOutcome>>,
    calls: Mutex<u32>,
}

impl Scripted {
    fn new(outcomes: Vec<ClassificationOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(0),
        }
    }
}

impl Classifier for Scripted {
    fn classify(&self, frame: Frame) -> ClassificationOutcome {
        assert!(!frame.is_empty());
        *self.calls.lock().unwrap() += 1;
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ClassificationOutcome::Unknown)
    }
}

fn success(label: &str) -> ClassificationOutcome {
    ClassificationOutcome::Success {
        label: label.to_string(),
    }
}

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

fn session(uri: &str, observers: ObserverSet) -> CaptureSession {
    CaptureSession::new(
        Box::new(SyntheticBackend::from_uri(uri)),
        small_constraints(),
    )
    .with_observers(observers)
}

fn pipeline(uri: &str, classifier: Arc<dyn Classifier>) -> (Pipeline, Receiver<Notification>) {
    let (observer, rx) = ChannelObserver::new();
    let observers = ObserverSet::new().with(observer);
    let pipeline = Pipeline::new(
        session(uri, observers.clone()),
        DetectionReconciler::new(observers),
        classifier,
    )
    .with_sample_interval(Duration::from_millis(10))
    .with_submit_timeout(Duration::from_secs(2));
    (pipeline, rx)
}

fn pump_until(pipeline: &mut Pipeline, done: impl Fn(&Pipeline) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(pipeline) {
        assert!(Instant::now() < deadline, "pipeline did not settle");
        pipeline.pump(Duration::from_millis(10));
    }
}

#[test]
fn repeated_label_only_announced_once() -> Result<()> {
    let _camera = exclusive_camera();
    let uri = "stub://scenario-history?color=brown";
    let classifier = Arc::new(Scripted::new(vec![
        success("Brown Card"),
        success("Green Card"),
        success("Brown Card"),
    ]));
    let (mut pipeline, rx) = pipeline(uri, classifier.clone());
    pipeline.start_camera(Some(uri))?;
    pump_until(&mut pipeline, |p| {
        p.state().detection_count() >= 3 && !p.state().in_flight()
    });
    pipeline.stop_camera();

    assert_eq!(pipeline.state().history(), ["Brown Card", "Green Card"]);
    let notes: Vec<Notification> = rx.try_iter().collect();
    let new_colors: Vec<&str> = notes
        .iter()
        .filter_map(|n| match n {
            Notification::NewColorFound { label } => Some(label.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(new_colors, ["Brown Card", "Green Card"]);

    // Every submission toggled the detecting flag on and then off again.
    let toggles: Vec<bool> = notes
        .iter()
        .filter_map(|n| match n {
            Notification::DetectingStateChanged { detecting } => Some(*detecting),
            _ => None,
        })
        .collect();
    assert!(toggles.chunks(2).all(|pair| pair == [true, false]));
    Ok(())
}

#[test]
fn failures_become_terminal_then_reset() -> Result<()> {
    let _camera = exclusive_camera();
    let uri = "stub://scenario-failures";
    let network = || ClassificationOutcome::failure(FailureCause::Network("refused".into()));
    let classifier = Arc::new(Scripted::new(vec![
        network(),
        network(),
        network(),
        success("Yellow Card"),
    ]));
    let (mut pipeline, rx) = pipeline(uri, classifier);
    pipeline.start_camera(Some(uri))?;

    pump_until(&mut pipeline, |p| p.state().consecutive_failures() >= 3);
    let failures: Vec<(u32, bool)> = rx
        .try_iter()
        .filter_map(|n| match n {
            Notification::DetectionFailed {
                attempt, terminal, ..
            } => Some((attempt, terminal)),
            _ => None,
        })
        .collect();
    assert_eq!(failures, [(1, false), (2, false), (3, true)]);

    // Sampling keeps going after the terminal notification.
    pump_until(&mut pipeline, |p| p.state().current_label() == Some("Yellow Card"));
    assert_eq!(pipeline.state().consecutive_failures(), 0);
    pipeline.stop_camera();
    Ok(())
}

#[test]
fn start_while_live_is_rejected_without_teardown() -> Result<()> {
    let _camera = exclusive_camera();
    let uri = "stub://scenario-busy";
    let (observer, rx) = ChannelObserver::new();
    let mut session = session(uri, ObserverSet::new().with(observer));
    session.start(Some(uri))?;
    let _ = rx.try_iter().count();

    assert_eq!(session.start(Some(uri)), Err(CaptureError::DeviceBusy));
    assert!(session.is_live());
    assert!(rx.try_recv().is_err());
    session.snapshot()?;

    session.stop();
    session.stop();
    let notes: Vec<Notification> = rx.try_iter().collect();
    assert_eq!(
        notes,
        [
            Notification::CameraStateChanged {
                state: CaptureState::Stopping
            },
            Notification::CameraStateChanged {
                state: CaptureState::Idle
            },
        ]
    );
    Ok(())
}

#[test]
fn second_consumer_of_a_device_is_busy() -> Result<()> {
    let _camera = exclusive_camera();
    let uri = "stub://scenario-shared";
    let mut first = session(uri, ObserverSet::new());
    let mut second = session(uri, ObserverSet::new());
    first.start(Some(uri))?;

    assert_eq!(second.start(Some(uri)), Err(CaptureError::DeviceBusy));
    assert_eq!(*second.state(), CaptureState::Failed(CaptureError::DeviceBusy));
    assert!(first.is_live());

    first.stop();
    second.stop();
    second.start(Some(uri))?;
    assert!(second.is_live());
    Ok(())
}

#[test]
fn second_camera_cannot_go_live() -> Result<()> {
    let _camera = exclusive_camera();
    let mut desk = session("stub://scenario-desk", ObserverSet::new());
    let mut door = session("stub://scenario-door", ObserverSet::new());
    desk.start(None)?;

    assert_eq!(door.start(None), Err(CaptureError::DeviceBusy));
    assert!(desk.is_live());
    assert!(!door.is_live());

    desk.stop();
    door.stop();
    door.start(None)?;
    assert!(door.is_live());
    Ok(())
}

#[test]
fn denied_camera_fails_and_can_retry() -> Result<()> {
    let _camera = exclusive_camera();
    let (observer, rx) = ChannelObserver::new();
    let backend = SyntheticBackend::new(vec![SyntheticDevice::from_uri(
        "stub://scenario-denied?fault=denied",
    )]);
    let mut session = CaptureSession::new(Box::new(backend), CaptureConstraints::default())
        .with_observers(ObserverSet::new().with(observer));

    assert_eq!(session.start(None), Err(CaptureError::PermissionDenied));
    assert_eq!(
        *session.state(),
        CaptureState::Failed(CaptureError::PermissionDenied)
    );
    let failed = rx.try_iter().any(|n| {
        n == Notification::CameraStateChanged {
            state: CaptureState::Failed(CaptureError::PermissionDenied),
        }
    });
    assert!(failed);

    session.stop();
    assert_eq!(*session.state(), CaptureState::Idle);
    Ok(())
}

#[test]
fn tick_during_submission_captures_nothing() -> Result<()> {
    let _camera = exclusive_camera();
    let uri = "stub://scenario-inflight";
    let calls = Arc::new(Mutex::new(0u32));
    let seen = calls.clone();
    let classifier = Arc::new(move |_frame: Frame| {
        *seen.lock().unwrap() += 1;
        std::thread::sleep(Duration::from_millis(200));
        success("green")
    });
    let (mut pipeline, _rx) = pipeline(uri, classifier);
    pipeline.start_camera(Some(uri))?;

    // Ten-millisecond ticks for well over one submission's duration.
    let until = Instant::now() + Duration::from_millis(150);
    while Instant::now() < until {
        pipeline.pump(Duration::from_millis(5));
        pipeline.tick();
    }
    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(pipeline.state().in_flight());

    pump_until(&mut pipeline, |p| !p.state().in_flight());
    pipeline.stop_camera();
    Ok(())
}

#[test]
fn end_to_end_against_http_service() -> Result<()> {
    let _camera = exclusive_camera();
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let endpoint = format!("http://{}/detect/", listener.local_addr()?);
    let server = std::thread::spawn(move || -> Result<()> {
        let (mut stream, _) = listener.accept()?;
        stream.set_read_timeout(Some(Duration::from_millis(500)))?;
        let mut buf = [0u8; 65536];
        // Drain whatever the client sends until it pauses.
        while let Ok(n) = stream.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
        let body = r#"{"dominant_color":"blue","confidence":0.93}"#;
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )?;
        Ok(())
    });

    let uri = "stub://scenario-http?color=blue";
    let client = DetectionClient::new(&endpoint, Duration::from_secs(5))?;
    let (mut pipeline, _rx) = pipeline(uri, Arc::new(client));
    pipeline.start_camera(Some(uri))?;
    pump_until(&mut pipeline, |p| p.state().detection_count() >= 1);
    pipeline.stop_camera();

    assert_eq!(pipeline.state().history(), ["blue"]);
    assert_eq!(pipeline.state().current_label(), None);
    server.join().map_err(|_| anyhow::anyhow!("server panicked"))??;
    Ok(())
}
