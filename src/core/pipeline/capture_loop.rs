//! The frame-by-frame capture loop.

use crate::core::clock::Clock;
use crate::core::decision::{DecisionEngine, SessionState, Trigger};
use crate::core::detector::AttributeDetector;
use crate::core::dispatch::{DispatchQueue, EmailJob, EmailSettings, JobOrigin};
use crate::core::frame::Frame;
use crate::core::gallery::{CaptureRecord, GalleryStore};
use crate::core::source::FrameSource;
use crate::error::{CaptureError, DeviceError, PersistenceError};
use crate::events::{CaptureEvent, CaptureOutcome, DeviceEvent, Event, EventSender, SessionEvent, StopReason};
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Token for cancelling a running loop
#[derive(Clone, Default, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Shared claim on one manual capture request.
///
/// Starts pending; the loop claims it before persisting and the caller
/// abandons it when it stops waiting. Only the first transition wins, so an
/// abandoned request is never captured and a claimed one is always answered.
#[derive(Clone, Default, Debug)]
pub struct RequestTicket {
    state: Arc<AtomicU8>,
}

impl RequestTicket {
    const PENDING: u8 = 0;
    const CLAIMED: u8 = 1;
    const ABANDONED: u8 = 2;

    pub fn new() -> Self {
        Self::default()
    }

    /// Take the request for capture; false if the caller gave up
    pub fn claim(&self) -> bool {
        self.transition(Self::CLAIMED)
    }

    /// Withdraw the request; false if the loop already claimed it
    pub fn abandon(&self) -> bool {
        self.transition(Self::ABANDONED)
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(Self::PENDING, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Requests serviced by the loop between frames
pub enum LoopCommand {
    /// Capture the next frame regardless of mode, detection or cooldown
    CaptureNow {
        reply: Sender<Result<CaptureRecord, CaptureError>>,
        ticket: RequestTicket,
    },
}

/// Why [`CaptureLoop::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    Disconnected { failures: u32 },
}

/// Optional email hookup for automatic sends
#[derive(Clone)]
pub struct AutoEmail {
    pub queue: DispatchQueue,
    pub settings: Arc<EmailSettings>,
}

/// Owns the acquire → detect → decide → persist chain.
///
/// Runs on one dedicated thread. The only shared state it touches is the
/// gallery's short critical section and the atomics in [`SessionState`].
pub struct CaptureLoop {
    source: FrameSource,
    detector: AttributeDetector,
    engine: DecisionEngine,
    gallery: Arc<GalleryStore>,
    auto_email: Option<AutoEmail>,
    session: Arc<SessionState>,
    clock: Arc<dyn Clock>,
    events: EventSender,
    commands: Receiver<LoopCommand>,
}

impl CaptureLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: FrameSource,
        detector: AttributeDetector,
        engine: DecisionEngine,
        gallery: Arc<GalleryStore>,
        auto_email: Option<AutoEmail>,
        clock: Arc<dyn Clock>,
        events: EventSender,
        commands: Receiver<LoopCommand>,
    ) -> Self {
        let session = engine.session().clone();
        Self {
            source,
            detector,
            engine,
            gallery,
            auto_email,
            session,
            clock,
            events,
            commands,
        }
    }

    /// Run until cancelled or the camera disconnects.
    ///
    /// The current iteration always finishes, so a cancel never leaves a
    /// half-written capture. The loop is handed back so the camera can be
    /// reconnected and the loop restarted.
    pub fn run(mut self, cancel: &CancellationToken) -> (Self, LoopExit) {
        info!("capture loop started");
        let exit = loop {
            if cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            match self.source.acquire() {
                Ok(frame) => self.step(frame),
                Err(DeviceError::Disconnected { failures }) => {
                    self.events.send(Event::Device(DeviceEvent::Disconnected { failures }));
                    break LoopExit::Disconnected { failures };
                }
                Err(e) => {
                    self.events.send(Event::Device(DeviceEvent::ReadFailed {
                        failures: self.session.consecutive_read_errors(),
                        message: e.to_string(),
                    }));
                    thread::sleep(self.source.retry_backoff());
                }
            }
        };
        self.reject_pending();
        info!(?exit, "capture loop stopped");
        let reason = match exit {
            LoopExit::Cancelled => StopReason::Shutdown,
            LoopExit::Disconnected { .. } => StopReason::Disconnected,
        };
        self.events.send(Event::Session(SessionEvent::LoopStopped { reason }));
        (self, exit)
    }

    /// Process one acquired frame
    pub fn step(&mut self, frame: Frame) {
        let detection = self.detector.detect(frame);
        let pending = self.next_request();
        let now = self.clock.now();

        let Some(trigger) = self.engine.evaluate(&detection, now, pending.is_some()) else {
            return;
        };

        let result = self.capture(&detection.into_frame(), now, trigger);
        if let Some(LoopCommand::CaptureNow { reply, .. }) = pending {
            let _ = reply.send(result.map_err(CaptureError::from));
        }
    }

    /// First queued request whose caller is still waiting
    fn next_request(&self) -> Option<LoopCommand> {
        while let Ok(command) = self.commands.try_recv() {
            let LoopCommand::CaptureNow { ticket, .. } = &command;
            if ticket.claim() {
                return Some(command);
            }
            debug!("dropping capture request the caller gave up on");
        }
        None
    }

    fn capture(&mut self, frame: &Frame, now: DateTime<Local>, trigger: Trigger) -> Result<CaptureRecord, PersistenceError> {
        match self.gallery.persist(frame, now) {
            Ok(record) => {
                self.engine.commit(now);
                self.events.send(Event::Capture(CaptureEvent::Saved {
                    id: record.id,
                    path: record.path.clone(),
                    trigger,
                }));
                self.dispatch(&record);
                Ok(record)
            }
            Err(e) => {
                error!(?trigger, error = %e, "capture failed");
                self.events.send(Event::Capture(CaptureEvent::Failed {
                    trigger,
                    message: e.to_string(),
                }));
                Err(e)
            }
        }
    }

    /// Hand a capture to the email worker, or report it as saved only
    fn dispatch(&self, record: &CaptureRecord) {
        let queued = match (&self.auto_email, self.session.auto_email()) {
            (Some(auto), true) => {
                let job = EmailJob::for_capture(&auto.settings, record, JobOrigin::AutoCapture, self.clock.now());
                match auto.queue.enqueue(job) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(id = %record.id, error = %e, "capture not emailed");
                        false
                    }
                }
            }
            (None, true) => {
                debug!(id = %record.id, "email not configured, capture kept locally");
                false
            }
            (_, false) => false,
        };

        // the worker reports the outcome for queued jobs
        if !queued {
            self.events.send(Event::Capture(CaptureEvent::Outcome {
                id: record.id,
                outcome: CaptureOutcome::SavedOnly,
            }));
        }
    }

    /// Fail capture requests the loop will no longer service
    fn reject_pending(&self) {
        while let Ok(LoopCommand::CaptureNow { reply, ticket }) = self.commands.try_recv() {
            if ticket.claim() {
                let _ = reply.send(Err(CaptureError::NotRunning));
            }
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn source_mut(&mut self) -> &mut FrameSource {
        &mut self.source
    }
}
