//! The dispatch worker thread and its queue handle.

use super::{compose_message, EmailJob, MailTransport};
use crate::error::DispatchError;
use crate::events::{CaptureEvent, CaptureOutcome, DispatchEvent, Event, EventSender};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default number of jobs that may wait for the worker
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Cloneable, non-blocking handle for enqueuing email jobs
#[derive(Clone)]
pub struct DispatchQueue {
    jobs: Sender<EmailJob>,
    capacity: usize,
    events: EventSender,
}

impl DispatchQueue {
    /// Offer a job to the worker.
    ///
    /// Never blocks. A full queue drops the job with
    /// `DispatchError::Backpressure`.
    pub fn enqueue(&self, job: EmailJob) -> Result<(), DispatchError> {
        let attachment = job.attachment_path.clone();
        match self.jobs.try_send(job) {
            Ok(()) => {
                debug!(attachment = %attachment.display(), "email queued");
                self.events.send(Event::Dispatch(DispatchEvent::Queued { attachment }));
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(capacity = self.capacity, attachment = %attachment.display(), "email queue full, job dropped");
                self.events.send(Event::Dispatch(DispatchEvent::Backpressure {
                    attachment: attachment.clone(),
                    capacity: self.capacity,
                }));
                Err(DispatchError::Backpressure {
                    capacity: self.capacity,
                    attachment,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::WorkerStopped),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs waiting (not counting one being sent)
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }
}

/// Owner of the dispatch thread
pub struct DispatchWorker {
    queue: DispatchQueue,
    shutdown: Sender<()>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    /// Start the worker with room for `capacity` waiting jobs
    pub fn spawn(capacity: usize, transport: Arc<dyn MailTransport>, events: EventSender) -> std::io::Result<Self> {
        let capacity = capacity.max(1);
        let (job_tx, job_rx) = bounded::<EmailJob>(capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        let worker_events = events.clone();
        let handle = thread::Builder::new().name("email-dispatch".to_string()).spawn(move || {
            // dropped on exit, which is what `shutdown` waits for
            let _done = done_tx;
            run(job_rx, shutdown_rx, transport.as_ref(), &worker_events);
        })?;

        Ok(Self {
            queue: DispatchQueue {
                jobs: job_tx,
                capacity,
                events,
            },
            shutdown: shutdown_tx,
            done: done_rx,
            handle: Some(handle),
        })
    }

    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    /// Stop the worker, waiting at most `timeout` for a send in flight.
    ///
    /// Jobs still queued are abandoned. Returns `false` if the worker did not
    /// finish in time; it is then left to finish on its own.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let _ = self.shutdown.try_send(());
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                info!("email worker stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "email worker still busy, abandoning it");
                self.handle.take();
                false
            }
        }
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown.try_send(());
        }
    }
}

fn run(jobs: Receiver<EmailJob>, shutdown: Receiver<()>, transport: &dyn MailTransport, events: &EventSender) {
    debug!("email worker started");
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(jobs) -> job => match job {
                Ok(job) => process(job, transport, events),
                Err(_) => break,
            },
        }
    }
    let abandoned = jobs.len();
    if abandoned > 0 {
        warn!(abandoned, "email jobs abandoned at shutdown");
    }
}

/// Send one job. Exactly one attempt; failures are reported, never retried.
fn process(job: EmailJob, transport: &dyn MailTransport, events: &EventSender) {
    let attachment = job.attachment_path.clone();
    let result = fs::read(&attachment)
        .map_err(|source| DispatchError::Attachment {
            path: attachment.clone(),
            source,
        })
        .and_then(|bytes| compose_message(&job, bytes))
        .and_then(|message| transport.send(&message, &job.credentials));

    let outcome = match result {
        Ok(()) => {
            info!(attachment = %attachment.display(), recipient = %job.recipient, "email sent");
            events.send(Event::Dispatch(DispatchEvent::Sent {
                attachment,
                recipient: job.recipient.clone(),
            }));
            CaptureOutcome::SavedAndEmailed
        }
        Err(e) => {
            error!(attachment = %attachment.display(), error = %e, "email failed");
            events.send(Event::Dispatch(DispatchEvent::Failed {
                attachment,
                message: e.to_string(),
            }));
            CaptureOutcome::SavedOnly
        }
    };

    if job.reports_capture_outcome() {
        if let Some(id) = job.capture_id {
            events.send(Event::Capture(CaptureEvent::Outcome { id, outcome }));
        }
    }
}
