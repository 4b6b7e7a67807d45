//! Transport header rewriting.
//!
//! Redirects a raw message to new recipients by editing a handful of known
//! header fields. Every other header keeps its bytes and relative order, and
//! the body is never touched.
//!
//! ## Managed Headers
//!
//! | Header | Action |
//! |---|---|
//! | `To` | value replaced with the new recipients |
//! | `X-Original-To` | inserted after each `To`, carrying the old recipients |
//! | `From` | value replaced with the original recipient |
//! | `Reply-To` | appended with the true sender, unless already present |
//! | `X-Actual-From` | appended with the true sender |
//! | `Return-Path`, `Sender`, `DKIM-Signature` | removed |

pub mod headers;

use std::str::FromStr;

use tracing::debug;

pub use headers::{HeaderBlock, HeaderLine};

pub const TO: &str = "To";
pub const FROM: &str = "From";
pub const REPLY_TO: &str = "Reply-To";
pub const X_ORIGINAL_TO: &str = "X-Original-To";
pub const X_ACTUAL_FROM: &str = "X-Actual-From";

/// Headers that no longer hold once the envelope changes.
pub const TRANSPORT_HEADERS: [&str; 3] = ["Return-Path", "Sender", "DKIM-Signature"];

/// Which rewrites to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewritePolicy {
    /// Insert `X-Original-To` after each rewritten `To`
    pub record_original_recipients: bool,
    /// Swap `From` for the original recipient and keep the sender reachable
    pub rewrite_sender: bool,
    /// Drop `Return-Path`, `Sender` and `DKIM-Signature`
    pub strip_transport_headers: bool,
}

impl RewritePolicy {
    /// Every rewrite enabled.
    pub const fn full() -> Self {
        Self {
            record_original_recipients: true,
            rewrite_sender: true,
            strip_transport_headers: true,
        }
    }

    /// Sender swap and header stripping, without `X-Original-To`.
    pub const fn sender_swap() -> Self {
        Self {
            record_original_recipients: false,
            rewrite_sender: true,
            strip_transport_headers: true,
        }
    }

    /// Only `To` and `X-Original-To`.
    pub const fn redirect_only() -> Self {
        Self {
            record_original_recipients: true,
            rewrite_sender: false,
            strip_transport_headers: false,
        }
    }
}

impl Default for RewritePolicy {
    fn default() -> Self {
        Self::full()
    }
}

impl FromStr for RewritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::full()),
            "sender_swap" => Ok(Self::sender_swap()),
            "redirect_only" => Ok(Self::redirect_only()),
            other => Err(format!("unknown rewrite policy `{}`", other)),
        }
    }
}

/// Rewrite `raw` so it is delivered to `new_recipients`.
///
/// `original_recipients` are the addresses the message was received for,
/// before routing. The first of them becomes the new `From` when
/// [`RewritePolicy::rewrite_sender`] is set and the message has a sender.
/// The sender is the first non-empty `From` header of `raw` itself, not the
/// value reported alongside the notification.
pub fn rewrite_message(
    raw: &[u8],
    original_recipients: &[String],
    new_recipients: &[String],
    policy: &RewritePolicy,
) -> Vec<u8> {
    let mut block = HeaderBlock::parse(raw);
    let append_terminator = block.trailing_terminator();

    let mut removed = 0;
    if policy.strip_transport_headers {
        removed = block.remove_all(&TRANSPORT_HEADERS);
    }

    let sender = if policy.rewrite_sender {
        block.first_value(FROM).filter(|from| !from.is_empty())
    } else {
        None
    };

    if let Some(sender) = &sender {
        if let Some(original) = original_recipients.first() {
            block.replace_all(FROM, original);
        }
        if !block.contains(REPLY_TO) {
            block.append(HeaderLine::new(REPLY_TO, sender, &append_terminator));
        }
        block.append(HeaderLine::new(X_ACTUAL_FROM, sender, &append_terminator));
    }

    let to = new_recipients.join(", ");
    let replaced = if policy.record_original_recipients {
        block.replace_all_with_companion(TO, &to, X_ORIGINAL_TO, &original_recipients.join(", "))
    } else {
        block.replace_all(TO, &to)
    };

    debug!(
        removed_bytes = removed,
        to_replaced = replaced,
        sender_rewritten = sender.is_some(),
        header_len = block.header_len(),
        body_len = block.tail().len(),
        "message_rewritten"
    );

    block.to_bytes()
}
