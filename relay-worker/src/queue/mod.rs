//! RabbitMQ queue integration.
//!
//! This module provides:
//! - Message types for the inbound and outbound queues
//! - An async publisher for outbound mail
//!
//! ## Queue Architecture
//!
//! ```text
//! SES → SNS → inbound_notifications → Worker → outbound_mail
//! ```

pub mod publisher;
pub mod types;

pub use publisher::Publisher;
pub use types::{
    fallback_id, InboundRecord, OutboundMail, SnsEntity, SnsEvent, SnsRecord, INBOUND_QUEUE,
    OUTBOUND_QUEUE,
};
