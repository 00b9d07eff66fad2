//! The capture service: command surface over the capture loop.

use super::capture_loop::{AutoEmail, CancellationToken, CaptureLoop, LoopCommand, LoopExit, RequestTicket};
use crate::config::AppConfig;
use crate::core::clock::{Clock, SystemClock};
use crate::core::decision::{CaptureMode, DecisionEngine, SessionSnapshot, SessionState, MIN_COOLDOWN};
use crate::core::detector::{AttributeDetector, Classifier};
use crate::core::dispatch::{
    DispatchQueue, DispatchWorker, EmailJob, EmailSettings, JobOrigin, MailTransport, SmtpMailer, DEFAULT_QUEUE_CAPACITY,
};
use crate::core::gallery::{CaptureId, CaptureRecord, GalleryStore, LoadReport};
use crate::core::source::{CameraDevice, FrameSource, SourceConfig};
use crate::error::{CaptureError, ConfigError, DeviceError, DispatchError, GalleryError, SmileCaptureError};
use crate::events::{null_sender, DeviceEvent, Event, EventSender, GalleryEvent, SessionEvent};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Runtime settings for the service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub mode: CaptureMode,
    pub auto_email: bool,
    pub cooldown: Duration,
    pub source: SourceConfig,
    pub queue_capacity: usize,
    pub manual_capture_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl ServiceConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            mode: config.capture.mode,
            auto_email: config.email.auto_email,
            cooldown: config.capture.cooldown(),
            source: config.camera.source_config(),
            queue_capacity: config.email.queue_capacity,
            manual_capture_timeout: config.capture.manual_capture_timeout(),
            shutdown_timeout: config.capture.shutdown_timeout(),
        }
    }
}

/// Where the capture loop is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// Built but never started
    Idle,
    Running,
    /// Stopped by the camera; `reconnect` to resume
    Disconnected { failures: u32 },
    Stopped,
}

enum LoopSlot {
    Parked {
        capture_loop: Box<CaptureLoop>,
        exit: Option<LoopExit>,
    },
    Running {
        handle: JoinHandle<(CaptureLoop, LoopExit)>,
        cancel: CancellationToken,
    },
    /// A loop that did not stop within the shutdown timeout
    Abandoned,
}

/// Builder for [`CaptureService`]
pub struct CaptureServiceBuilder {
    device: Option<Box<dyn CameraDevice>>,
    face: Option<Box<dyn Classifier>>,
    smile: Option<Box<dyn Classifier>>,
    gallery: Option<Arc<GalleryStore>>,
    clock: Arc<dyn Clock>,
    transport: Option<Arc<dyn MailTransport>>,
    email: Option<EmailSettings>,
    events: EventSender,
    config: ServiceConfig,
}

impl CaptureServiceBuilder {
    pub fn new() -> Self {
        Self {
            device: None,
            face: None,
            smile: None,
            gallery: None,
            clock: Arc::new(SystemClock),
            transport: None,
            email: None,
            events: null_sender(),
            config: ServiceConfig::default(),
        }
    }

    /// Set the camera
    pub fn device(mut self, device: Box<dyn CameraDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Set the face and smile classifiers
    pub fn classifiers(mut self, face: Box<dyn Classifier>, smile: Box<dyn Classifier>) -> Self {
        self.face = Some(face);
        self.smile = Some(smile);
        self
    }

    pub fn gallery(mut self, gallery: Arc<GalleryStore>) -> Self {
        self.gallery = Some(gallery);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set mail settings; without a transport an SMTP mailer is built from them
    pub fn email(mut self, settings: EmailSettings) -> Self {
        self.email = Some(settings);
        self
    }

    /// Override the mail transport
    pub fn transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the service. The loop is not started.
    pub fn build(self) -> Result<CaptureService, SmileCaptureError> {
        let missing = |what: &str| ConfigError::Invalid(format!("capture service needs {what}"));
        let device = self.device.ok_or_else(|| missing("a camera device"))?;
        let face = self.face.ok_or_else(|| missing("a face classifier"))?;
        let smile = self.smile.ok_or_else(|| missing("a smile classifier"))?;
        let gallery = self.gallery.ok_or_else(|| missing("a gallery"))?;
        if self.config.cooldown < MIN_COOLDOWN {
            return Err(ConfigError::Invalid(format!(
                "capture cooldown must be at least {MIN_COOLDOWN:?}, got {:?}",
                self.config.cooldown
            ))
            .into());
        }

        let session = Arc::new(SessionState::new(self.config.mode, self.config.auto_email));
        let email = self.email.map(Arc::new);

        let transport = match (self.transport, &email) {
            (Some(transport), _) => Some(transport),
            (None, Some(settings)) => Some(Arc::new(SmtpMailer::from_settings(settings)) as Arc<dyn MailTransport>),
            (None, None) => None,
        };
        let worker = match transport {
            Some(transport) => Some(
                DispatchWorker::spawn(self.config.queue_capacity.max(1), transport, self.events.clone())
                    .map_err(|e| DispatchError::Transport(format!("failed to start email worker: {e}")))?,
            ),
            None => None,
        };
        let queue = worker.as_ref().map(DispatchWorker::queue);

        let auto_email = match (&queue, &email) {
            (Some(queue), Some(settings)) => Some(AutoEmail {
                queue: queue.clone(),
                settings: settings.clone(),
            }),
            _ => None,
        };

        let (commands, command_rx) = bounded(4);
        let source = FrameSource::new(device, self.config.source.clone(), session.clone());
        let capture_loop = CaptureLoop::new(
            source,
            AttributeDetector::new(face, smile),
            DecisionEngine::new(self.config.cooldown, session.clone()),
            gallery.clone(),
            auto_email,
            self.clock.clone(),
            self.events.clone(),
            command_rx,
        );

        Ok(CaptureService {
            session,
            gallery,
            clock: self.clock,
            events: self.events,
            email,
            queue,
            worker: Mutex::new(worker),
            commands,
            slot: Mutex::new(LoopSlot::Parked {
                capture_loop: Box::new(capture_loop),
                exit: None,
            }),
            config: self.config,
        })
    }
}

impl Default for CaptureServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The command surface the CLI (or any UI) drives.
///
/// All methods take `&self` and may be called from any thread.
pub struct CaptureService {
    session: Arc<SessionState>,
    gallery: Arc<GalleryStore>,
    clock: Arc<dyn Clock>,
    events: EventSender,
    email: Option<Arc<EmailSettings>>,
    queue: Option<DispatchQueue>,
    worker: Mutex<Option<DispatchWorker>>,
    commands: Sender<LoopCommand>,
    slot: Mutex<LoopSlot>,
    config: ServiceConfig,
}

impl CaptureService {
    pub fn builder() -> CaptureServiceBuilder {
        CaptureServiceBuilder::new()
    }

    /// Open the camera and start the capture loop on its own thread
    pub fn start(&self) -> Result<(), SmileCaptureError> {
        let mut slot = self.lock_slot();
        reap(&mut slot);
        match std::mem::replace(&mut *slot, LoopSlot::Abandoned) {
            LoopSlot::Parked {
                mut capture_loop,
                exit,
            } => {
                if let Some(LoopExit::Disconnected { .. }) = exit {
                    *slot = LoopSlot::Parked { capture_loop, exit };
                    return Err(DeviceError::Disconnected {
                        failures: self.session.consecutive_read_errors(),
                    }
                    .into());
                }
                if let Err(e) = capture_loop.source_mut().open() {
                    *slot = LoopSlot::Parked { capture_loop, exit };
                    return Err(e.into());
                }
                *slot = self.spawn_loop(capture_loop)?;
                Ok(())
            }
            running @ LoopSlot::Running { .. } => {
                *slot = running;
                Ok(())
            }
            LoopSlot::Abandoned => Err(CaptureError::NotRunning.into()),
        }
    }

    fn spawn_loop(&self, capture_loop: Box<CaptureLoop>) -> Result<LoopSlot, SmileCaptureError> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let capture_loop = *capture_loop;
        let handle = thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || capture_loop.run(&token))
            .map_err(|e| SmileCaptureError::Unsupported(format!("failed to start capture loop: {e}")))?;
        self.events.send(Event::Session(SessionEvent::LoopStarted));
        Ok(LoopSlot::Running { handle, cancel })
    }

    pub fn status(&self) -> LoopStatus {
        let mut slot = self.lock_slot();
        reap(&mut slot);
        match &*slot {
            LoopSlot::Running { .. } => LoopStatus::Running,
            LoopSlot::Parked { exit: None, .. } => LoopStatus::Idle,
            LoopSlot::Parked {
                exit: Some(LoopExit::Disconnected { failures }),
                ..
            } => LoopStatus::Disconnected { failures: *failures },
            LoopSlot::Parked {
                exit: Some(LoopExit::Cancelled),
                ..
            }
            | LoopSlot::Abandoned => LoopStatus::Stopped,
        }
    }

    /// Flip between auto and manual; effective from the next frame
    pub fn toggle_mode(&self) -> CaptureMode {
        let mode = self.session.toggle_mode();
        info!(%mode, "capture mode changed");
        self.events.send(Event::Session(SessionEvent::ModeChanged { mode }));
        mode
    }

    pub fn set_mode(&self, mode: CaptureMode) {
        if self.session.mode() != mode {
            self.session.set_mode(mode);
            info!(%mode, "capture mode changed");
            self.events.send(Event::Session(SessionEvent::ModeChanged { mode }));
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.session.mode()
    }

    pub fn set_auto_email(&self, enabled: bool) {
        self.session.set_auto_email(enabled);
        info!(enabled, "auto email changed");
        self.events.send(Event::Session(SessionEvent::AutoEmailChanged { enabled }));
    }

    pub fn auto_email(&self) -> bool {
        self.session.auto_email()
    }

    /// Whether mail settings are available
    pub fn email_configured(&self) -> bool {
        self.email.is_some() && self.queue.is_some()
    }

    pub fn session(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Capture the next frame regardless of mode, detection or cooldown.
    ///
    /// Waits up to the configured timeout for the loop to take the request.
    /// A request that times out is withdrawn and never captured; one the loop
    /// has already taken is waited for until it is persisted or fails.
    pub fn capture_now(&self) -> Result<CaptureRecord, CaptureError> {
        if self.status() != LoopStatus::Running {
            return Err(CaptureError::NotRunning);
        }

        let timeout = self.config.manual_capture_timeout;
        let ticket = RequestTicket::new();
        let (reply, response) = bounded(1);
        let command = LoopCommand::CaptureNow {
            reply,
            ticket: ticket.clone(),
        };
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(CaptureError::Timeout(timeout)),
            Err(TrySendError::Disconnected(_)) => return Err(CaptureError::NotRunning),
        }

        match response.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) if ticket.abandon() => {
                warn!(?timeout, "capture request timed out and was withdrawn");
                Err(CaptureError::Timeout(timeout))
            }
            // the loop took it just in time; its answer is on the way
            Err(RecvTimeoutError::Timeout) => response.recv().unwrap_or(Err(CaptureError::NotRunning)),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::NotRunning),
        }
    }

    pub fn list(&self) -> Vec<CaptureRecord> {
        self.gallery.list()
    }

    pub fn gallery(&self) -> &Arc<GalleryStore> {
        &self.gallery
    }

    /// Load captures left by earlier sessions
    pub fn load_existing(&self) -> Result<LoadReport, SmileCaptureError> {
        let report = self.gallery.load_existing()?;
        self.events.send(Event::Gallery(GalleryEvent::Loaded {
            loaded: report.loaded,
            skipped: report.skipped.clone(),
        }));
        Ok(report)
    }

    pub fn delete(&self, id: &CaptureId) -> Result<CaptureRecord, SmileCaptureError> {
        let record = self.gallery.delete(id)?;
        self.events.send(Event::Gallery(GalleryEvent::Deleted { id: *id }));
        Ok(record)
    }

    /// Queue an email for an existing capture
    pub fn send_email(&self, id: &CaptureId) -> Result<(), SmileCaptureError> {
        let (queue, settings) = match (&self.queue, &self.email) {
            (Some(queue), Some(settings)) => (queue, settings),
            _ => return Err(DispatchError::NotConfigured("no mail settings".to_string()).into()),
        };
        let record = self
            .gallery
            .get(id)
            .ok_or_else(|| GalleryError::NotFound { id: id.to_string() })?;
        queue.enqueue(EmailJob::for_capture(settings, &record, JobOrigin::ManualSend, self.clock.now()))?;
        Ok(())
    }

    /// Stop the loop if needed, re-open the camera and start again.
    ///
    /// The read-error streak is cleared only when the camera opens.
    pub fn reconnect(&self) -> Result<(), SmileCaptureError> {
        let mut slot = self.lock_slot();
        self.stop_loop(&mut slot);

        match std::mem::replace(&mut *slot, LoopSlot::Abandoned) {
            LoopSlot::Parked {
                mut capture_loop,
                exit,
            } => {
                if let Err(e) = capture_loop.source_mut().reconnect() {
                    warn!(error = %e, "reconnect failed");
                    *slot = LoopSlot::Parked { capture_loop, exit };
                    return Err(e.into());
                }
                self.events.send(Event::Device(DeviceEvent::Reconnected));
                *slot = self.spawn_loop(capture_loop)?;
                Ok(())
            }
            other => {
                *slot = other;
                Err(CaptureError::NotRunning.into())
            }
        }
    }

    /// Stop the loop and the email worker with bounded waits.
    ///
    /// Releases the camera. Queued emails may be abandoned.
    pub fn shutdown(&self) {
        info!("shutting down");
        {
            let mut slot = self.lock_slot();
            self.stop_loop(&mut slot);
            if let LoopSlot::Parked { capture_loop, .. } = std::mem::replace(&mut *slot, LoopSlot::Abandoned) {
                // dropping the loop releases the camera
                drop(capture_loop);
            }
        }

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut worker) = worker {
            worker.shutdown(self.config.shutdown_timeout);
        }
    }

    /// Cancel a running loop and park it, waiting at most the shutdown timeout
    fn stop_loop(&self, slot: &mut LoopSlot) {
        let LoopSlot::Running { handle, cancel } = std::mem::replace(slot, LoopSlot::Abandoned) else {
            return;
        };
        cancel.cancel();

        let deadline = Instant::now() + self.config.shutdown_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        if !handle.is_finished() {
            warn!("capture loop did not stop in time, abandoning it");
            return;
        }
        match handle.join() {
            Ok((capture_loop, exit)) => {
                *slot = LoopSlot::Parked {
                    capture_loop: Box::new(capture_loop),
                    exit: Some(exit),
                };
            }
            Err(_) => warn!("capture loop panicked"),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, LoopSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.as_ref().map(DispatchQueue::capacity).unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        let running = matches!(*self.lock_slot(), LoopSlot::Running { .. });
        if running {
            self.shutdown();
        }
    }
}

/// Park a loop whose thread has already returned
fn reap(slot: &mut LoopSlot) {
    let finished = matches!(slot, LoopSlot::Running { handle, .. } if handle.is_finished());
    if !finished {
        return;
    }
    if let LoopSlot::Running { handle, .. } = std::mem::replace(slot, LoopSlot::Abandoned) {
        if let Ok((capture_loop, exit)) = handle.join() {
            *slot = LoopSlot::Parked {
                capture_loop: Box::new(capture_loop),
                exit: Some(exit),
            };
        }
    }
}
