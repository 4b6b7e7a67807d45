//! Mail transmission.
//!
//! The relay hands finished messages to a [`MailTransmitter`]. Two
//! implementations ship with the crate:
//! - [`HttpTransmitter`]: POSTs the message to an HTTP relay endpoint
//! - [`crate::queue::Publisher`]: enqueues the message on RabbitMQ
//!
//! [`Transport`] picks one of them from the process configuration.

pub mod http;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::config::{Config, TransmitMode};
use crate::queue::Publisher;

pub use http::HttpTransmitter;

/// Sends a finished message to its destinations.
#[async_trait]
pub trait MailTransmitter: Send + Sync {
    /// Deliver `raw` to `destinations`. Errors are opaque to the relay.
    async fn send(&self, raw: &[u8], destinations: &[String]) -> Result<()>;
}

#[async_trait]
impl<T: MailTransmitter + ?Sized> MailTransmitter for std::sync::Arc<T> {
    async fn send(&self, raw: &[u8], destinations: &[String]) -> Result<()> {
        (**self).send(raw, destinations).await
    }
}

#[async_trait]
impl<T: MailTransmitter + ?Sized> MailTransmitter for Box<T> {
    async fn send(&self, raw: &[u8], destinations: &[String]) -> Result<()> {
        (**self).send(raw, destinations).await
    }
}

/// The transmitter selected by `TRANSMIT_MODE`.
#[derive(Clone)]
pub enum Transport {
    Queue(Publisher),
    Http(HttpTransmitter),
}

impl Transport {
    /// Build the configured transmitter. Fails when `http` mode has no URL.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = match config.transmit_mode {
            TransmitMode::Queue => Transport::Queue(Publisher::new(config.cloudamqp_url.clone())),
            TransmitMode::Http => {
                let url = config
                    .transmit_url
                    .clone()
                    .context("TRANSMIT_URL is required when TRANSMIT_MODE=http")?;
                Transport::Http(HttpTransmitter::new(
                    url,
                    config.transmit_token.clone(),
                    config.request_timeout_ms,
                )?)
            }
        };

        info!(mode = transport.mode(), "transport_created");

        Ok(transport)
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Transport::Queue(_) => "queue",
            Transport::Http(_) => "http",
        }
    }

    /// Release broker connections, if any.
    pub async fn close(&self) {
        if let Transport::Queue(publisher) = self {
            publisher.close().await;
        }
    }
}

#[async_trait]
impl MailTransmitter for Transport {
    async fn send(&self, raw: &[u8], destinations: &[String]) -> Result<()> {
        match self {
            Transport::Queue(publisher) => publisher.send(raw, destinations).await,
            Transport::Http(http) => http.send(raw, destinations).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: TransmitMode, url: Option<&str>) -> Config {
        Config {
            cloudamqp_url: "amqp://localhost:5672".to_string(),
            worker_concurrency: 1,
            routing_config: None,
            routing_config_path: "./ef.json".into(),
            content_encoding: Default::default(),
            rewrite_policy: Default::default(),
            transmit_mode: mode,
            transmit_url: url.map(str::to_string),
            transmit_token: None,
            request_timeout_ms: 1000,
            port: 8080,
            webhook_auth_token: None,
        }
    }

    #[test]
    fn test_transport_from_config_queue() {
        let transport = Transport::from_config(&config(TransmitMode::Queue, None)).unwrap();
        assert_eq!(transport.mode(), "queue");
    }

    #[test]
    fn test_transport_from_config_http() {
        let transport =
            Transport::from_config(&config(TransmitMode::Http, Some("http://relay.local/send")))
                .unwrap();
        assert_eq!(transport.mode(), "http");
    }

    #[test]
    fn test_transport_http_requires_url() {
        let err = Transport::from_config(&config(TransmitMode::Http, None))
            .err()
            .unwrap();
        assert!(err.to_string().contains("TRANSMIT_URL"));
    }

    #[test]
    fn test_boxed_transmitters() {
        fn assert_transmitter<T: MailTransmitter>() {}
        assert_transmitter::<Transport>();
        assert_transmitter::<Box<dyn MailTransmitter>>();
        assert_transmitter::<std::sync::Arc<HttpTransmitter>>();
    }
}
