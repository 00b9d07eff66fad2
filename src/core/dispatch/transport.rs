//! Mail transports.

use super::{EmailSettings, SmtpCredentials};
use crate::error::DispatchError;
#[cfg(any(test, feature = "test-util"))]
use crossbeam_channel::{Receiver, Sender};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
#[cfg(any(test, feature = "test-util"))]
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Something that can deliver a composed message
pub trait MailTransport: Send + Sync {
    fn send(&self, message: &Message, credentials: &SmtpCredentials) -> Result<(), DispatchError>;
}

/// SMTP with STARTTLS
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub fn from_settings(settings: &EmailSettings) -> Self {
        Self::new(settings.host.clone(), settings.port, settings.timeout)
    }

    fn transport(&self, credentials: &SmtpCredentials) -> Result<SmtpTransport, DispatchError> {
        let transport = SmtpTransport::starttls_relay(&self.host)
            .map_err(|e| DispatchError::Transport(e.to_string()))?
            .port(self.port)
            .credentials(Credentials::new(credentials.username.clone(), credentials.password.clone()))
            .timeout(Some(self.timeout))
            .build();
        Ok(transport)
    }
}

impl MailTransport for SmtpMailer {
    fn send(&self, message: &Message, credentials: &SmtpCredentials) -> Result<(), DispatchError> {
        debug!(host = %self.host, port = self.port, "connecting to SMTP server");
        let transport = self.transport(credentials)?;
        transport
            .send(message)
            .map(|_| ())
            .map_err(|e| DispatchError::Transport(e.to_string()))
    }
}

#[cfg(any(test, feature = "test-util"))]
/// In-memory transport for testing.
///
/// Keeps the formatted bytes of every message, and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    fail: Mutex<bool>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Formatted messages sent so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(any(test, feature = "test-util"))]
impl MailTransport for RecordingTransport {
    fn send(&self, message: &Message, _credentials: &SmtpCredentials) -> Result<(), DispatchError> {
        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(DispatchError::Transport("connection refused".to_string()));
        }
        self.lock().push(message.formatted());
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
/// Transport that holds every send until released, for testing backpressure.
///
/// `started()` yields once per send that has begun; `release()` lets one
/// blocked send finish.
#[derive(Debug)]
pub struct BlockingTransport {
    gate: Receiver<()>,
    opener: Sender<()>,
    started_tx: Sender<()>,
    started_rx: Receiver<()>,
}

#[cfg(any(test, feature = "test-util"))]
impl BlockingTransport {
    pub fn new() -> Self {
        let (opener, gate) = crossbeam_channel::unbounded();
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        Self {
            gate,
            opener,
            started_tx,
            started_rx,
        }
    }

    /// Receiver that yields once for each send that has started
    pub fn started(&self) -> Receiver<()> {
        self.started_rx.clone()
    }

    /// Let `count` blocked sends complete
    pub fn release(&self, count: usize) {
        for _ in 0..count {
            let _ = self.opener.send(());
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Default for BlockingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-util"))]
impl MailTransport for BlockingTransport {
    fn send(&self, _message: &Message, _credentials: &SmtpCredentials) -> Result<(), DispatchError> {
        let _ = self.started_tx.send(());
        self.gate
            .recv()
            .map_err(|_| DispatchError::Transport("transport closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatch::job::tests::{record, settings};
    use crate::core::dispatch::{compose_message, EmailJob, JobOrigin};
    use std::sync::Arc;
    use std::thread;

    fn message() -> Message {
        let record = record();
        let job = EmailJob::for_capture(&settings(), &record, JobOrigin::ManualSend, record.created_at);
        compose_message(&job, vec![1, 2, 3]).unwrap()
    }

    #[test]
    fn recording_transport_keeps_messages() {
        let transport = RecordingTransport::new();
        let credentials = settings().credentials;

        transport.send(&message(), &credentials).unwrap();

        assert_eq!(transport.sent_count(), 1);
        let text = String::from_utf8_lossy(&transport.sent()[0]).into_owned();
        assert!(text.contains("Smile Detected"));
    }

    #[test]
    fn recording_transport_can_fail() {
        let transport = RecordingTransport::new();
        transport.set_failing(true);

        let result = transport.send(&message(), &settings().credentials);

        assert!(matches!(result, Err(DispatchError::Transport(_))));
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn blocking_transport_waits_for_release() {
        let transport = Arc::new(BlockingTransport::new());
        let started = transport.started();

        let sender = {
            let transport = transport.clone();
            thread::spawn(move || transport.send(&message(), &settings().credentials))
        };

        started.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!sender.is_finished());

        transport.release(1);
        assert!(sender.join().unwrap().is_ok());
    }

    #[test]
    fn smtp_mailer_uses_settings() {
        let mailer = SmtpMailer::from_settings(&settings());
        assert_eq!(mailer.port, 587);
        assert_eq!(mailer.host, "smtp.example.com");
    }
}
