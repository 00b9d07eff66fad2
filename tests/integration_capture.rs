//! Integration tests for the capture service.
//!
//! These tests drive the whole pipeline with a scripted camera, fixed
//! classifiers, a manual clock and fake mail transports:
//! - Manual capture requests, including ones that time out
//! - The capture cooldown
//! - Camera disconnect and reconnect
//! - Email queue backpressure

use chrono::{Local, TimeZone};
use smile_capture::core::clock::ManualClock;
use smile_capture::core::decision::CaptureMode;
use smile_capture::core::detector::{FixedClassifier, Rect};
use smile_capture::core::dispatch::{BlockingTransport, EmailSettings, RecordingTransport, SmtpCredentials};
use smile_capture::core::frame::Frame;
use smile_capture::core::gallery::GalleryStore;
use smile_capture::core::pipeline::{CaptureService, LoopStatus, ServiceConfig};
use smile_capture::core::source::{ScriptedDevice, SourceConfig};
use smile_capture::error::CaptureError;
use smile_capture::events::{CaptureEvent, CaptureOutcome, DeviceEvent, DispatchEvent, Event, EventChannel, EventReceiver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

fn device() -> ScriptedDevice {
    ScriptedDevice::new()
        .with_fallback(Frame::filled(64, 48, [90, 90, 90]))
        .with_interval(Duration::from_millis(5))
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
}

fn face() -> FixedClassifier {
    FixedClassifier::with(vec![Rect::new(10, 10, 30, 30)])
}

fn settings() -> EmailSettings {
    EmailSettings {
        host: "smtp.example.com".to_string(),
        port: 587,
        sender: "camera@example.com".to_string(),
        sender_name: "Smile Capture".to_string(),
        recipient: "family@example.com".to_string(),
        credentials: SmtpCredentials {
            username: "camera@example.com".to_string(),
            password: "secret".to_string(),
        },
        timeout: Duration::from_secs(5),
    }
}

fn config(mode: CaptureMode, auto_email: bool) -> ServiceConfig {
    ServiceConfig {
        mode,
        auto_email,
        ..ServiceConfig::default()
    }
}

fn wait_for(receiver: &EventReceiver, pred: impl Fn(&Event) -> bool) -> Event {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if let Some(event) = receiver.recv_timeout(Duration::from_millis(50)) {
            if pred(&event) {
                return event;
            }
        }
    }
    panic!("expected event did not arrive");
}

/// Events arriving within `window` that match `pred`
fn count_within(receiver: &EventReceiver, window: Duration, pred: impl Fn(&Event) -> bool) -> usize {
    let deadline = Instant::now() + window;
    let mut count = 0;
    while Instant::now() < deadline {
        if let Some(event) = receiver.recv_timeout(Duration::from_millis(10)) {
            if pred(&event) {
                count += 1;
            }
        }
    }
    count
}

fn is_saved(event: &Event) -> bool {
    matches!(event, Event::Capture(CaptureEvent::Saved { .. }))
}

#[test]
fn manual_capture_saves_exactly_one_image_without_a_face() {
    let dir = TempDir::new().unwrap();
    let (events, receiver) = EventChannel::new();
    let service = CaptureService::builder()
        .device(Box::new(device()))
        .classifiers(Box::new(FixedClassifier::failing()), Box::new(FixedClassifier::none()))
        .gallery(Arc::new(GalleryStore::open(dir.path()).unwrap()))
        .clock(clock())
        .events(events)
        .config(config(CaptureMode::Manual, false))
        .build()
        .unwrap();
    service.start().unwrap();

    let record = service.capture_now().unwrap();

    assert!(record.path.is_file());
    assert_eq!(count_within(&receiver, Duration::from_millis(200), is_saved), 1);
    assert_eq!(service.list().len(), 1);
    service.shutdown();
}

#[test]
fn timed_out_capture_request_is_never_captured() {
    let dir = TempDir::new().unwrap();
    let camera = device();
    // the loop is stuck retrying reads for ~400ms
    camera.push_failures(8);
    let (events, receiver) = EventChannel::new();
    let service = CaptureService::builder()
        .device(Box::new(camera.clone()))
        .classifiers(Box::new(FixedClassifier::none()), Box::new(FixedClassifier::none()))
        .gallery(Arc::new(GalleryStore::open(dir.path()).unwrap()))
        .clock(clock())
        .events(events)
        .config(ServiceConfig {
            manual_capture_timeout: Duration::from_millis(150),
            source: SourceConfig {
                max_consecutive_failures: 20,
                retry_backoff: Duration::from_millis(50),
            },
            ..config(CaptureMode::Manual, false)
        })
        .build()
        .unwrap();
    service.start().unwrap();

    let result = service.capture_now();
    assert!(matches!(result, Err(CaptureError::Timeout(_))));

    // well past the failures: frames flow again but nothing was captured
    std::thread::sleep(Duration::from_millis(700));
    assert!(camera.reads() > 8);
    assert_eq!(count_within(&receiver, Duration::from_millis(50), is_saved), 0);
    assert!(service.list().is_empty());

    // a fresh request at the same clock second is served normally
    let record = service.capture_now().unwrap();
    assert_eq!(service.list(), vec![record]);
    service.shutdown();
}

#[test]
fn auto_mode_respects_cooldown() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let (events, receiver) = EventChannel::new();
    let service = CaptureService::builder()
        .device(Box::new(device()))
        .classifiers(Box::new(face()), Box::new(FixedClassifier::none()))
        .gallery(Arc::new(GalleryStore::open(dir.path()).unwrap()))
        .clock(clock.clone())
        .events(events)
        .config(config(CaptureMode::Auto, false))
        .build()
        .unwrap();
    service.start().unwrap();

    wait_for(&receiver, is_saved);

    clock.advance(Duration::from_millis(500));
    assert_eq!(count_within(&receiver, Duration::from_millis(150), is_saved), 0);

    clock.advance(Duration::from_millis(1600));
    wait_for(&receiver, is_saved);
    service.shutdown();

    let ids: Vec<String> = service.list().iter().map(|r| r.id.to_string()).collect();
    assert_eq!(ids, vec!["20240501_120000", "20240501_120002"]);
}

#[test]
fn auto_capture_without_email_reports_saved_only() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(RecordingTransport::new());
    let (events, receiver) = EventChannel::new();
    let service = CaptureService::builder()
        .device(Box::new(device()))
        .classifiers(Box::new(face()), Box::new(face()))
        .gallery(Arc::new(GalleryStore::open(dir.path()).unwrap()))
        .clock(clock())
        .email(settings())
        .transport(transport.clone())
        .events(events)
        .config(config(CaptureMode::Auto, false))
        .build()
        .unwrap();
    service.start().unwrap();

    let outcome = wait_for(&receiver, |e| matches!(e, Event::Capture(CaptureEvent::Outcome { .. })));
    service.shutdown();

    assert!(matches!(
        outcome,
        Event::Capture(CaptureEvent::Outcome {
            outcome: CaptureOutcome::SavedOnly,
            ..
        })
    ));
    assert_eq!(transport.sent_count(), 0);
}

#[test]
fn camera_disconnect_stops_loop_until_reconnect() {
    let dir = TempDir::new().unwrap();
    let camera = device();
    camera.push_failures(5);
    let (events, receiver) = EventChannel::new();
    let service = CaptureService::builder()
        .device(Box::new(camera.clone()))
        .classifiers(Box::new(FixedClassifier::none()), Box::new(FixedClassifier::none()))
        .gallery(Arc::new(GalleryStore::open(dir.path()).unwrap()))
        .clock(clock())
        .events(events)
        .config(config(CaptureMode::Manual, false))
        .build()
        .unwrap();
    service.start().unwrap();

    wait_for(&receiver, |e| matches!(e, Event::Device(DeviceEvent::Disconnected { failures: 5 })));
    let deadline = Instant::now() + WAIT;
    while service.status() == LoopStatus::Running && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(service.status(), LoopStatus::Disconnected { failures: 5 });
    assert_eq!(service.session().consecutive_read_errors, 5);

    service.reconnect().unwrap();

    wait_for(&receiver, |e| matches!(e, Event::Device(DeviceEvent::Reconnected)));
    assert_eq!(service.status(), LoopStatus::Running);
    assert_eq!(service.session().consecutive_read_errors, 0);
    assert_eq!(camera.opens(), 2);
    assert!(service.capture_now().is_ok());
    service.shutdown();
}

#[test]
fn full_email_queue_rejects_job_but_keeps_capture() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let transport = Arc::new(BlockingTransport::new());
    let started = transport.started();
    let (events, receiver) = EventChannel::new();
    let service = CaptureService::builder()
        .device(Box::new(device()))
        .classifiers(Box::new(FixedClassifier::none()), Box::new(FixedClassifier::none()))
        .gallery(Arc::new(GalleryStore::open(dir.path()).unwrap()))
        .clock(clock.clone())
        .email(settings())
        .transport(transport.clone())
        .events(events)
        .config(ServiceConfig {
            queue_capacity: 2,
            ..config(CaptureMode::Manual, true)
        })
        .build()
        .unwrap();
    service.start().unwrap();

    // first job occupies the worker
    service.capture_now().unwrap();
    started.recv_timeout(WAIT).unwrap();

    // two more fill the queue
    for _ in 0..2 {
        clock.advance(Duration::from_secs(1));
        service.capture_now().unwrap();
    }

    clock.advance(Duration::from_secs(1));
    let overflow = service.capture_now().unwrap();

    let event = wait_for(&receiver, |e| matches!(e, Event::Dispatch(DispatchEvent::Backpressure { .. })));
    assert!(matches!(
        event,
        Event::Dispatch(DispatchEvent::Backpressure { capacity: 2, .. })
    ));
    wait_for(&receiver, |e| {
        matches!(e, Event::Capture(CaptureEvent::Outcome { id, outcome: CaptureOutcome::SavedOnly }) if *id == overflow.id)
    });
    assert_eq!(service.list().len(), 4);
    assert!(service.gallery().get(&overflow.id).is_some());

    transport.release(3);
    service.shutdown();
}
