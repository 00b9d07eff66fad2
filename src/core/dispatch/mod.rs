//! # Dispatch Module
//!
//! Asynchronous email delivery for captures.
//!
//! ## Design
//! - The capture loop only ever calls [`DispatchQueue::enqueue`], a bounded
//!   non-blocking insert; a full queue drops the job and reports backpressure
//! - A single worker thread drains the queue in FIFO order, composes a
//!   plain-text + HTML message with the image attached, and sends it once
//! - Send failures are logged and reported as events; there is no retry
//! - Network latency is absorbed only on the worker thread
//!
//! ## Example
//! ```rust,ignore
//! let mut worker = DispatchWorker::spawn(8, Arc::new(SmtpMailer::from_settings(&settings)), events)?;
//! worker.queue().enqueue(EmailJob::for_capture(&settings, &record, JobOrigin::ManualSend, Local::now()))?;
//! worker.shutdown(Duration::from_secs(2));
//! ```

pub(crate) mod job;
mod message;
mod transport;
mod worker;

pub use job::{EmailJob, EmailSettings, JobOrigin, SmtpCredentials};
pub use message::{compose_message, Importance, XMsMailPriority, XPriority, SUBJECT};
pub use transport::{MailTransport, SmtpMailer};
#[cfg(any(test, feature = "test-util"))]
pub use transport::{BlockingTransport, RecordingTransport};
pub use worker::{DispatchQueue, DispatchWorker, DEFAULT_QUEUE_CAPACITY};
