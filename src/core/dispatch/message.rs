//! Message composition.

use super::EmailJob;
use crate::error::DispatchError;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::Message;
use std::path::Path;

pub const SUBJECT: &str = "Smile Detected - New Captured Image";

macro_rules! fixed_header {
    ($(#[$meta:meta])* $name:ident, $header:literal, $value:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl Header for $name {
            fn name() -> HeaderName {
                HeaderName::new_from_ascii_str($header)
            }

            fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                if s.trim().eq_ignore_ascii_case($value) {
                    Ok(Self)
                } else {
                    Err(format!("unexpected {} value: {}", $header, s).into())
                }
            }

            fn display(&self) -> HeaderValue {
                HeaderValue::new(Self::name(), $value.to_string())
            }
        }
    };
}

fixed_header!(
    /// `X-Priority: 1`
    XPriority,
    "X-Priority",
    "1"
);
fixed_header!(XMsMailPriority, "X-MSMail-Priority", "High");
fixed_header!(Importance, "Importance", "High");

/// Build the multipart message for `job` with `attachment` as the image bytes
pub fn compose_message(job: &EmailJob, attachment: Vec<u8>) -> Result<Message, DispatchError> {
    let from = mailbox(Some(job.sender_name.clone()), &job.sender)?;
    let to = mailbox(None, &job.recipient)?;

    let captured_at = job.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
    let file_name = attachment_name(&job.attachment_path);
    let content_type = ContentType::parse(image_mime(&job.attachment_path))
        .map_err(|e| DispatchError::Compose(e.to_string()))?;

    let body = MultiPart::mixed()
        .multipart(MultiPart::alternative_plain_html(plain_body(&captured_at), html_body(&captured_at)))
        .singlepart(Attachment::new(file_name).body(attachment, content_type));

    Message::builder()
        .from(from)
        .to(to)
        .subject(SUBJECT)
        .header(XPriority)
        .header(XMsMailPriority)
        .header(Importance)
        .multipart(body)
        .map_err(|e| DispatchError::Compose(e.to_string()))
}

fn mailbox(name: Option<String>, address: &str) -> Result<Mailbox, DispatchError> {
    let parsed = address.trim().parse().map_err(|e: lettre::address::AddressError| DispatchError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Mailbox::new(name.filter(|n| !n.trim().is_empty()), parsed))
}

fn attachment_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture.jpg".to_string())
}

fn image_mime(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

fn plain_body(captured_at: &str) -> String {
    format!(
        "New smile captured!\n\n\
         A new smile was captured at {captured_at}.\n\
         The image is attached to this email.\n\n\
         Smile Capture\n"
    )
}

fn html_body(captured_at: &str) -> String {
    format!(
        r#"<html>
<body style="font-family: Arial, sans-serif; color: #333333; max-width: 600px; margin: 0 auto; padding: 20px;">
  <h2 style="color: #4a6cd4; margin-top: 0;">New smile captured!</h2>
  <p>A new smile was captured at <b>{captured_at}</b>.</p>
  <p>The image is attached to this email.</p>
  <p>Smile Capture</p>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatch::job::tests::{record, settings};
    use crate::core::dispatch::JobOrigin;
    use std::path::PathBuf;

    fn job() -> EmailJob {
        let record = record();
        EmailJob::for_capture(&settings(), &record, JobOrigin::AutoCapture, record.created_at)
    }

    fn rendered(job: &EmailJob) -> String {
        let message = compose_message(job, vec![0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    #[test]
    fn sets_subject_sender_and_priority_headers() {
        let text = rendered(&job());

        assert!(text.contains("Subject: Smile Detected - New Captured Image"));
        assert!(text.contains("Smile Capture"));
        assert!(text.contains("camera@example.com"));
        assert!(text.contains("To: me@example.com"));
        assert!(text.contains("X-Priority: 1"));
        assert!(text.contains("X-MSMail-Priority: High"));
        assert!(text.contains("Importance: High"));
    }

    #[test]
    fn has_plain_and_html_parts_with_capture_time() {
        let text = rendered(&job());

        assert!(text.contains("multipart/alternative"));
        assert!(text.contains("text/plain"));
        assert!(text.contains("text/html"));
        assert!(text.contains("2024-05-01 12:00:00"));
    }

    #[test]
    fn attaches_image_by_file_name() {
        let text = rendered(&job());

        assert!(text.contains("image/jpeg"));
        assert!(text.contains("face_20240501_120000.jpg"));
        assert!(text.contains("attachment"));
    }

    #[test]
    fn png_attachments_get_png_type() {
        let mut job = job();
        job.attachment_path = PathBuf::from("face_20240501_120000.png");
        assert!(rendered(&job).contains("image/png"));
    }

    #[test]
    fn rejects_bad_recipient() {
        let mut job = job();
        job.recipient = "not an address".to_string();

        let result = compose_message(&job, Vec::new());
        assert!(matches!(result, Err(DispatchError::InvalidAddress { .. })));
    }

    #[test]
    fn custom_headers_parse_their_own_value() {
        assert_eq!(XPriority::parse("1").unwrap(), XPriority);
        assert!(Importance::parse("Low").is_err());
    }
}
