//! HTTP relay client.
//!
//! Sends each message as JSON to a relay endpoint:
//!
//! ```json
//! {"destinations": ["new@mail"], "raw_message": "<base64>"}
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use super::MailTransmitter;

/// Request body sent to the relay endpoint.
#[derive(Debug, Serialize)]
pub struct RelayRequest<'a> {
    pub destinations: &'a [String],
    pub raw_message: String,
}

impl<'a> RelayRequest<'a> {
    pub fn new(raw: &[u8], destinations: &'a [String]) -> Self {
        Self {
            destinations,
            raw_message: BASE64.encode(raw),
        }
    }
}

/// Relay client backed by a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransmitter {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpTransmitter {
    pub fn new(url: String, token: Option<String>, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(16)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl MailTransmitter for HttpTransmitter {
    async fn send(&self, raw: &[u8], destinations: &[String]) -> Result<()> {
        let body = RelayRequest::new(raw, destinations);

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach mail relay")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                detail = %detail,
                "relay_send_rejected"
            );
            bail!("mail relay responded with {}: {}", status, detail);
        }

        info!(
            status = status.as_u16(),
            destinations = destinations.len(),
            message_length = raw.len(),
            "relay_send_complete"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_request_serialization() {
        let destinations = vec!["new@mail".to_string()];
        let body = RelayRequest::new(b"To: new@mail\r\n\r\nhi", &destinations);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["destinations"][0], "new@mail");
        assert_eq!(
            BASE64.decode(json["raw_message"].as_str().unwrap()).unwrap(),
            b"To: new@mail\r\n\r\nhi"
        );
    }

    #[test]
    fn test_transmitter_creation() {
        let transmitter =
            HttpTransmitter::new("http://localhost:9/send".to_string(), None, 1000).unwrap();
        assert_eq!(transmitter.url, "http://localhost:9/send");
        assert!(transmitter.token.is_none());
    }
}
