//! Web server module for the HTTP entry point.
//!
//! This module provides a small axum front end that:
//! - Reports liveness on `GET /health`
//! - Accepts SNS notification batches on `POST /notifications`
//! - Verifies the optional `X-Custom-Auth` shared secret
//!
//! Batches are forwarded inside the request, with the same [`crate::Forwarder`]
//! the queue worker uses.

pub mod handlers;

pub use handlers::{
    health, notifications, AppState, HealthResponse, NotificationResponse, AUTH_HEADER,
};
