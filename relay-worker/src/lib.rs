//! Mailrelay - SES notification relay.
//!
//! This library provides the shared modules for the two relay binaries:
//! - `mailrelay-worker`: RabbitMQ consumer of SNS notification batches
//! - `mailrelay-web`: HTTP endpoint accepting the same batches
//!
//! ## Architecture
//!
//! ```text
//! SES → SNS → inbound_notifications → Worker ┐
//!                                             ├→ Forwarder → outbound_mail | HTTP relay
//!             POST /notifications → Web ─────┘
//! ```
//!
//! For each notification the [`Forwarder`] maps every recipient through the
//! [`RoutingConfig`], rewrites the message headers and hands the result to a
//! [`MailTransmitter`].

pub mod config;
pub mod error;
pub mod forward;
pub mod notification;
pub mod queue;
pub mod rewrite;
pub mod routing;
pub mod transmit;
pub mod web;

// Re-export commonly used types
pub use config::{Config, TransmitMode};
pub use error::{BatchError, MapError, ParseError, RecordError, RecordFailure, RoutingError};
pub use forward::{BatchReport, ForwardedRecord, Forwarder, ForwarderSettings};
pub use notification::{parse_notification, ContentEncoding, InboundMessage};
pub use queue::{InboundRecord, Publisher, INBOUND_QUEUE, OUTBOUND_QUEUE};
pub use rewrite::{rewrite_message, RewritePolicy};
pub use routing::{load_routing, RoutingConfig, RuleSpec};
pub use transmit::{HttpTransmitter, MailTransmitter, Transport};
pub use web::AppState;
