//! Queue message types.
//!
//! This module defines the message formats for:
//! - `inbound_notifications` queue: SNS event batches wrapping SES notifications
//! - `outbound_mail` queue: rewritten messages ready for delivery

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

/// Queue name for inbound SNS event batches.
pub const INBOUND_QUEUE: &str = "inbound_notifications";

/// Queue name for rewritten messages awaiting delivery.
pub const OUTBOUND_QUEUE: &str = "outbound_mail";

// =============================================================================
// Inbound Types (inbound_notifications queue)
// =============================================================================

/// SNS event batch, as delivered by the SES receipt rule's SNS action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnsEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<SnsRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnsRecord {
    #[serde(rename = "Sns")]
    pub sns: SnsEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnsEntity {
    /// SNS message identifier, used to tag per-record failures
    #[serde(rename = "MessageId", default)]
    pub message_id: Option<String>,
    /// SES notification JSON
    #[serde(rename = "Message", default)]
    pub message: String,
}

/// One notification of a batch, ready for the forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub id: String,
    pub payload: Vec<u8>,
}

impl InboundRecord {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

impl SnsEvent {
    /// Split the batch into records, keeping their order.
    pub fn into_records(self) -> Vec<InboundRecord> {
        self.records
            .into_iter()
            .map(|record| {
                let payload = record.sns.message.into_bytes();
                let id = record
                    .sns
                    .message_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| fallback_id(&payload));
                InboundRecord { id, payload }
            })
            .collect()
    }
}

/// Generate a stable identifier from message bytes using SHA256.
pub fn fallback_id(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let hash = hex::encode(hasher.finalize());

    info!(
        payload_length = payload.len(),
        generated_id = %hash,
        "record_id_fallback"
    );

    hash
}

// =============================================================================
// Outbound Types (outbound_mail queue)
// =============================================================================

/// Rewritten message published for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMail {
    /// Identifier derived from the rewritten message bytes
    pub message_id: String,
    /// Mapped destination addresses
    pub destinations: Vec<String>,
    /// Rewritten message, base64-encoded
    pub raw_message: String,
}

impl OutboundMail {
    pub fn new(raw: &[u8], destinations: &[String]) -> Self {
        Self {
            message_id: fallback_id(raw),
            destinations: destinations.to_vec(),
            raw_message: BASE64.encode(raw),
        }
    }
}
