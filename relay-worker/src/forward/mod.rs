//! Batch forwarding.
//!
//! Drives every record of a notification batch through the relay pipeline:
//!
//! ```text
//! InboundRecord → parse_notification() → RoutingConfig::map() (per recipient)
//!               → rewrite_message() → MailTransmitter::send()
//! ```
//!
//! Records are independent. A failing record never stops the others; all
//! failures are collected and reported together, in input order.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{BatchError, RecordError, RecordFailure};
use crate::notification::{parse_notification, ContentEncoding};
use crate::queue::{InboundRecord, SnsEvent};
use crate::rewrite::{rewrite_message, RewritePolicy};
use crate::routing::RoutingConfig;
use crate::transmit::MailTransmitter;

/// Per-process forwarding settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderSettings {
    pub encoding: ContentEncoding,
    pub policy: RewritePolicy,
    /// Maximum number of records processed at the same time
    pub concurrency: usize,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            encoding: ContentEncoding::Base64,
            policy: RewritePolicy::full(),
            concurrency: 16,
        }
    }
}

impl ForwarderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            encoding: config.content_encoding,
            policy: config.rewrite_policy,
            concurrency: config.worker_concurrency,
        }
    }
}

/// A record that was handed to the transmitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardedRecord {
    pub id: String,
    pub destinations: Vec<String>,
}

/// Outcome of a fully successful batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub forwarded: Vec<ForwardedRecord>,
}

/// Relays notification batches through a [`MailTransmitter`].
pub struct Forwarder<T> {
    routing: Arc<RoutingConfig>,
    settings: ForwarderSettings,
    transmitter: T,
}

impl<T: MailTransmitter> Forwarder<T> {
    pub fn new(routing: Arc<RoutingConfig>, settings: ForwarderSettings, transmitter: T) -> Self {
        Self {
            routing,
            settings,
            transmitter,
        }
    }

    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    /// Decode an SNS event batch and process its records.
    pub async fn process_event(&self, raw_event: &[u8]) -> Result<BatchReport, BatchError> {
        let event: SnsEvent = serde_json::from_slice(raw_event).map_err(|e| {
            error!(error = %e, "event_parse_failed");
            BatchError::MalformedEvent(e)
        })?;

        self.process_batch(event.into_records()).await
    }

    /// Process every record and aggregate the failures.
    pub async fn process_batch(
        &self,
        records: Vec<InboundRecord>,
    ) -> Result<BatchReport, BatchError> {
        info!(records = records.len(), "batch_process_start");

        if records.is_empty() {
            error!(error = %BatchError::EmptyBatch, "batch_process_failed");
            return Err(BatchError::EmptyBatch);
        }

        // buffered() keeps input order whatever order the records finish in
        let outcomes: Vec<(String, Result<Vec<String>, RecordError>)> =
            stream::iter(records.into_iter().map(|record| async move {
                let outcome = self.process_record(&record).await;
                (record.id, outcome)
            }))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut forwarded = Vec::new();
        let mut failures = Vec::new();

        for (id, outcome) in outcomes {
            match outcome {
                Ok(destinations) => forwarded.push(ForwardedRecord { id, destinations }),
                Err(error) => {
                    error!(record_id = %id, error = %error, "record_failed");
                    failures.push(RecordFailure { id, error });
                }
            }
        }

        if !failures.is_empty() {
            let err = BatchError::RecordsFailed(failures);
            error!(
                forwarded = forwarded.len(),
                error = %err,
                "batch_process_failed"
            );
            return Err(err);
        }

        info!(forwarded = forwarded.len(), "batch_process_complete");

        Ok(BatchReport { forwarded })
    }

    /// Relay a single record, returning the destinations it was sent to.
    pub async fn process_record(&self, record: &InboundRecord) -> Result<Vec<String>, RecordError> {
        info!(
            record_id = %record.id,
            payload_length = record.payload.len(),
            "record_received"
        );

        let message = parse_notification(&record.payload, self.settings.encoding)?;

        let mut destinations = Vec::with_capacity(message.recipients().len());
        for recipient in message.recipients() {
            match self.routing.map(recipient) {
                Ok(destination) => {
                    info!(
                        record_id = %record.id,
                        to = %recipient,
                        destination = %destination,
                        "recipient_mapped"
                    );
                    // First-seen order, no duplicates
                    if !destinations.contains(&destination) {
                        destinations.push(destination);
                    }
                }
                Err(e) => {
                    warn!(record_id = %record.id, to = %recipient, error = %e, "recipient_unmapped");
                }
            }
        }

        if destinations.is_empty() {
            return Err(RecordError::NoDestination);
        }

        let rewritten = rewrite_message(
            message.raw_content(),
            message.recipients(),
            &destinations,
            &self.settings.policy,
        );

        info!(
            record_id = %record.id,
            destinations = ?destinations,
            original_sender = ?message.original_sender(),
            message_length = rewritten.len(),
            "record_forwarding"
        );

        self.transmitter
            .send(&rewritten, &destinations)
            .await
            .map_err(RecordError::Transmission)?;

        info!(record_id = %record.id, "record_forwarded");

        Ok(destinations)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde_json::json;

    use super::*;
    use crate::error::ParseError;
    use crate::routing::RuleSpec;

    /// Transmitter that records every call and can be told to fail.
    #[derive(Default)]
    struct RecordingTransmitter {
        sent: Mutex<Vec<(Vec<u8>, Vec<String>)>>,
        fail_for: Option<String>,
    }

    impl RecordingTransmitter {
        fn failing_for(destination: &str) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_for: Some(destination.to_string()),
            }
        }

        fn sent(&self) -> Vec<(Vec<u8>, Vec<String>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailTransmitter for RecordingTransmitter {
        async fn send(&self, raw: &[u8], destinations: &[String]) -> Result<()> {
            if self.fail_for.as_ref().is_some_and(|d| destinations.contains(d)) {
                bail!("relay unavailable");
            }
            self.sent
                .lock()
                .unwrap()
                .push((raw.to_vec(), destinations.to_vec()));
            Ok(())
        }
    }

    /// Transmitter whose latency shrinks with the destination index, so
    /// later records complete first.
    struct SlowFailingTransmitter;

    #[async_trait]
    impl MailTransmitter for SlowFailingTransmitter {
        async fn send(&self, _raw: &[u8], destinations: &[String]) -> Result<()> {
            let index: u64 = destinations[0].trim_end_matches("@dest").parse()?;
            tokio::time::sleep(Duration::from_millis(50 - index * 10)).await;
            bail!("failed {}", index);
        }
    }

    fn routing() -> Arc<RoutingConfig> {
        Arc::new(
            RoutingConfig::new(vec![
                RuleSpec::new(".+@example.com", "123"),
                RuleSpec::new("abc@(def).ghi", "$1.abc"),
                RuleSpec::new("^slow(\\d)@relay$", "$1@dest"),
            ])
            .unwrap(),
        )
    }

    fn forwarder<T: MailTransmitter>(transmitter: T) -> Forwarder<T> {
        let settings = ForwarderSettings {
            concurrency: 4,
            ..ForwarderSettings::default()
        };
        Forwarder::new(routing(), settings, transmitter)
    }

    const RAW_EMAIL: &str =
        "From: src <src@mail>\r\nTo: abc@def.ghi\r\nDKIM-Signature: x\r\n\r\nCONTENT";

    fn notification(recipients: &[&str], content: &str) -> Vec<u8> {
        json!({
            "content": BASE64.encode(content),
            "receipt": {
                "recipients": recipients,
                "spamVerdict": {"status": "PASS"},
                "virusVerdict": {"status": "PASS"}
            },
            "mail": {"headers": [{"name": "To", "value": recipients.join(", ")}]}
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let err = forwarder.process_batch(vec![]).await.unwrap_err();

        assert!(matches!(err, BatchError::EmptyBatch));
        assert_eq!(err.to_string(), "no record");
    }

    #[tokio::test]
    async fn test_parse_failure_tagged_with_record_id() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let err = forwarder
            .process_batch(vec![InboundRecord::new("123", "{,}")])
            .await
            .unwrap_err();

        match &err {
            BatchError::RecordsFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].id, "123");
                assert!(matches!(
                    failures[0].error,
                    RecordError::Parse(ParseError::MalformedPayload(_))
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("123: "));
    }

    #[tokio::test]
    async fn test_no_destination() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let payload = notification(&["hello@moto.com"], RAW_EMAIL);
        let err = forwarder
            .process_batch(vec![InboundRecord::new("456", payload)])
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "456: no destination");
        assert!(forwarder.transmitter().sent().is_empty());
    }

    #[tokio::test]
    async fn test_forwards_rewritten_message() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let payload = notification(&["abc@def.ghi"], RAW_EMAIL);
        let report = forwarder
            .process_batch(vec![InboundRecord::new("789", payload)])
            .await
            .unwrap();

        assert_eq!(
            report.forwarded,
            vec![ForwardedRecord {
                id: "789".to_string(),
                destinations: vec!["def.abc".to_string()],
            }]
        );

        let sent = forwarder.transmitter().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, vec!["def.abc".to_string()]);
        assert_eq!(
            String::from_utf8(sent[0].0.clone()).unwrap(),
            "From: abc@def.ghi\r\nTo: def.abc\r\nX-Original-To: abc@def.ghi\r\nReply-To: src <src@mail>\r\nX-Actual-From: src <src@mail>\r\n\r\nCONTENT"
        );
    }

    #[tokio::test]
    async fn test_unmapped_recipients_dropped() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let payload = notification(&["nobody@moto.com", "user@example.com"], RAW_EMAIL);
        let report = forwarder
            .process_batch(vec![InboundRecord::new("1", payload)])
            .await
            .unwrap();

        assert_eq!(report.forwarded[0].destinations, vec!["123".to_string()]);
        assert_eq!(forwarder.transmitter().sent()[0].1, vec!["123".to_string()]);
    }

    #[tokio::test]
    async fn test_shared_destination_sent_once() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let payload = notification(
            &["a@example.com", "abc@def.ghi", "b@example.com"],
            RAW_EMAIL,
        );
        let report = forwarder
            .process_batch(vec![InboundRecord::new("dup", payload)])
            .await
            .unwrap();

        let expected = vec!["123".to_string(), "def.abc".to_string()];
        assert_eq!(report.forwarded[0].destinations, expected);

        let sent = forwarder.transmitter().sent();
        assert_eq!(sent[0].1, expected);
        let raw = String::from_utf8(sent[0].0.clone()).unwrap();
        assert!(raw.contains("\r\nTo: 123, def.abc\r\n"));
    }

    #[tokio::test]
    async fn test_sender_taken_from_message_headers() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let payload = json!({
            "content": BASE64.encode(RAW_EMAIL),
            "receipt": {
                "recipients": ["abc@def.ghi"],
                "spamVerdict": {"status": "PASS"},
                "virusVerdict": {"status": "PASS"}
            },
            "mail": {"headers": [{"name": "From", "value": "envelope@mail"}]}
        })
        .to_string();

        forwarder
            .process_batch(vec![InboundRecord::new("s", payload)])
            .await
            .unwrap();

        let raw = String::from_utf8(forwarder.transmitter().sent()[0].0.clone()).unwrap();
        assert!(raw.contains("Reply-To: src <src@mail>\r\n"));
        assert!(!raw.contains("envelope@mail"));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_batch() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let records = vec![
            InboundRecord::new("a", "{,}"),
            InboundRecord::new("b", notification(&["abc@def.ghi"], RAW_EMAIL)),
            InboundRecord::new("c", notification(&["hello@moto.com"], RAW_EMAIL)),
        ];

        let err = forwarder.process_batch(records).await.unwrap_err();
        let message = err.to_string();

        assert!(message.starts_with("a: "));
        assert!(message.ends_with(", c: no destination"));
        assert!(!message.contains("b: "));
        assert_eq!(forwarder.transmitter().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unsafe_message_not_forwarded() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let payload = json!({
            "content": BASE64.encode(RAW_EMAIL),
            "receipt": {
                "recipients": ["abc@def.ghi"],
                "spamVerdict": {"status": "FAIL"},
                "virusVerdict": {"status": "PASS"}
            }
        })
        .to_string();

        let err = forwarder
            .process_batch(vec![InboundRecord::new("spam", payload)])
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "spam: don't forward spam/virus (spam = FAIL, virus = PASS)"
        );
        assert!(forwarder.transmitter().sent().is_empty());
    }

    #[tokio::test]
    async fn test_transmission_failure_is_record_failure() {
        let forwarder = forwarder(RecordingTransmitter::failing_for("123"));
        let records = vec![
            InboundRecord::new("x", notification(&["user@example.com"], RAW_EMAIL)),
            InboundRecord::new("y", notification(&["abc@def.ghi"], RAW_EMAIL)),
        ];

        let err = forwarder.process_batch(records).await.unwrap_err();

        assert_eq!(err.to_string(), "x: transmission failed: relay unavailable");
        assert_eq!(forwarder.transmitter().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_order_is_input_order() {
        let forwarder = forwarder(SlowFailingTransmitter);
        let records: Vec<InboundRecord> = (1..=4)
            .map(|i| {
                let recipient = format!("slow{}@relay", i);
                InboundRecord::new(format!("r{}", i), notification(&[&recipient], RAW_EMAIL))
            })
            .collect();

        let err = forwarder.process_batch(records).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "r1: transmission failed: failed 1, r2: transmission failed: failed 2, \
             r3: transmission failed: failed 3, r4: transmission failed: failed 4"
        );
    }

    #[tokio::test]
    async fn test_process_event() {
        let forwarder = forwarder(RecordingTransmitter::default());
        let message = String::from_utf8(notification(&["abc@def.ghi"], RAW_EMAIL)).unwrap();
        let event = json!({"Records": [{"Sns": {"MessageId": "m-1", "Message": message}}]});

        let report = forwarder
            .process_event(event.to_string().as_bytes())
            .await
            .unwrap();

        assert_eq!(report.forwarded[0].id, "m-1");
    }

    #[tokio::test]
    async fn test_process_event_malformed() {
        let forwarder = forwarder(RecordingTransmitter::default());

        let err = forwarder.process_event(b"not json").await.unwrap_err();
        assert!(matches!(err, BatchError::MalformedEvent(_)));

        let err = forwarder.process_event(b"{}").await.unwrap_err();
        assert!(matches!(err, BatchError::EmptyBatch));
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config {
            cloudamqp_url: String::new(),
            worker_concurrency: 3,
            routing_config: None,
            routing_config_path: "./ef.json".into(),
            content_encoding: ContentEncoding::Raw,
            rewrite_policy: RewritePolicy::redirect_only(),
            transmit_mode: Default::default(),
            transmit_url: None,
            transmit_token: None,
            request_timeout_ms: 1000,
            port: 8080,
            webhook_auth_token: None,
        };

        let settings = ForwarderSettings::from_config(&config);
        assert_eq!(settings.concurrency, 3);
        assert_eq!(settings.encoding, ContentEncoding::Raw);
        assert_eq!(settings.policy, RewritePolicy::redirect_only());
    }
}
