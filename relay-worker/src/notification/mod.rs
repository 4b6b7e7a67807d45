//! Inbound notification parsing.
//!
//! Turns an untrusted SES receipt notification into an [`InboundMessage`]
//! that is known to be safe to relay.
//!
//! ## Validation Order
//!
//! ```text
//! JSON → content → recipients → spam/virus gate → original sender
//! ```

pub mod types;

use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use mailparse::{parse_headers, MailHeaderMap};
use tracing::{info, warn};

use crate::error::ParseError;

pub use types::{SesHeader, SesMail, SesNotification, SesReceipt, SesVerdict, Verdict};

/// How the `content` field of a notification is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentEncoding {
    #[default]
    Base64,
    Raw,
}

impl FromStr for ContentEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base64" => Ok(ContentEncoding::Base64),
            "raw" => Ok(ContentEncoding::Raw),
            other => Err(format!("unknown content encoding `{}`", other)),
        }
    }
}

/// A validated message ready to be relayed.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    raw_content: Vec<u8>,
    recipients: Vec<String>,
    original_sender: Option<String>,
    spam_verdict: Verdict,
    virus_verdict: Verdict,
}

impl InboundMessage {
    pub fn raw_content(&self) -> &[u8] {
        &self.raw_content
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Sender as reported by the notification, for logging.
    ///
    /// [`crate::rewrite::rewrite_message`] takes the sender from the
    /// message's own `From` header instead.
    pub fn original_sender(&self) -> Option<&str> {
        self.original_sender.as_deref()
    }

    pub fn spam_verdict(&self) -> &Verdict {
        &self.spam_verdict
    }

    pub fn virus_verdict(&self) -> &Verdict {
        &self.virus_verdict
    }
}

/// Parse and validate a raw SES notification.
pub fn parse_notification(
    raw: &[u8],
    encoding: ContentEncoding,
) -> Result<InboundMessage, ParseError> {
    let notification: SesNotification = serde_json::from_slice(raw)?;

    let content = match notification.content.as_deref() {
        Some(content) if !content.is_empty() => content,
        _ => return Err(ParseError::MissingContent),
    };
    let raw_content = match encoding {
        ContentEncoding::Base64 => decode_wrapped(content)?,
        ContentEncoding::Raw => content.as_bytes().to_vec(),
    };

    let recipients = extract_recipients(&notification);
    if recipients.is_empty() {
        return Err(ParseError::MissingRecipients);
    }

    let spam_verdict = Verdict::from_status(&notification.receipt.spam_verdict.status);
    let virus_verdict = Verdict::from_status(&notification.receipt.virus_verdict.status);

    info!(
        spam = %spam_verdict,
        virus = %virus_verdict,
        recipients = recipients.len(),
        content_length = raw_content.len(),
        "notification_verdicts"
    );

    if !(spam_verdict.is_forwardable() && virus_verdict.is_forwardable()) {
        warn!(spam = %spam_verdict, virus = %virus_verdict, "notification_unsafe");
        return Err(ParseError::UnsafeMessage {
            spam: spam_verdict,
            virus: virus_verdict,
        });
    }

    let original_sender = notification
        .mail
        .header("From")
        .map(str::to_string)
        .or_else(|| sender_from_content(&raw_content));

    Ok(InboundMessage {
        raw_content,
        recipients,
        original_sender,
        spam_verdict,
        virus_verdict,
    })
}

/// Decode base64 that may be wrapped over several lines.
fn decode_wrapped(content: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let unwrapped: String = content
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n'))
        .collect();
    BASE64.decode(unwrapped.trim())
}

/// Recipients come from the receipt list when present, otherwise from the
/// `To` header. The two sources are never merged.
fn extract_recipients(notification: &SesNotification) -> Vec<String> {
    if !notification.receipt.recipients.is_empty() {
        return notification
            .receipt
            .recipients
            .iter()
            .filter(|r| !r.is_empty())
            .cloned()
            .collect();
    }

    match notification.mail.header("To") {
        Some(to) if !to.is_empty() => vec![to.to_string()],
        _ => Vec::new(),
    }
}

fn sender_from_content(content: &[u8]) -> Option<String> {
    match parse_headers(content) {
        Ok((headers, _)) => headers.get_first_value("From"),
        Err(e) => {
            warn!(error = %e, "notification_header_parse_failed");
            None
        }
    }
}
