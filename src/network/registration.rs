//! Stream registration with the control plane
//!
//! A single authenticated `POST` that exchanges a topic for the SSRC and RTP
//! port the ingest side expects. There is no retry: a failure here means the
//! device is misconfigured or the control plane is unreachable.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;

use crate::config::ControlConfig;
use crate::error::RegistrationError;
use crate::protocol::{MediaKind, RegisterRequest, StreamRegistration};

/// Header carrying the device identifier
pub const DEVICE_ID_HEADER: &str = "X-Device-Id";

/// Device identity presented to the control plane
#[derive(Clone)]
pub struct Credentials {
    pub device_id: String,
    pub device_token: String,
}

impl Credentials {
    pub fn new(device_id: impl Into<String>, device_token: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_token: device_token.into(),
        }
    }

    fn validate(&self) -> Result<(), RegistrationError> {
        if self.device_id.trim().is_empty() {
            return Err(RegistrationError::InvalidInput("device id is empty"));
        }
        if self.device_token.trim().is_empty() {
            return Err(RegistrationError::InvalidInput("device token is empty"));
        }
        Ok(())
    }
}

// Keep the token out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("device_id", &self.device_id)
            .field("device_token", &"<redacted>")
            .finish()
    }
}

/// Client for `POST /api/streams/register`
pub struct RegistrationClient {
    client: reqwest::Client,
    url: String,
    credentials: Credentials,
}

impl RegistrationClient {
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            credentials,
        }
    }

    /// Build a client from the `[control]` config section
    pub fn from_config(config: &ControlConfig) -> Result<Self, RegistrationError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            url: config.register_url(),
            credentials: Credentials::new(&config.device_id, &config.device_token),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Register a topic carrying the given kind of media
    pub async fn register(
        &self,
        topic: &str,
        kind: MediaKind,
    ) -> Result<StreamRegistration, RegistrationError> {
        self.send(&RegisterRequest::new(topic, kind)).await
    }

    /// Send a prepared registration request
    pub async fn send(
        &self,
        request: &RegisterRequest,
    ) -> Result<StreamRegistration, RegistrationError> {
        if request.topic.trim().is_empty() {
            return Err(RegistrationError::InvalidInput("topic is empty"));
        }
        self.credentials.validate()?;

        tracing::debug!(
            url = %self.url,
            topic = %request.topic,
            media_type = ?request.media_type,
            "Registering stream"
        );

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(DEVICE_ID_HEADER, &self.credentials.device_id)
            .header(AUTHORIZATION, format!("Bearer {}", self.credentials.device_token))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(RegistrationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let registration: StreamRegistration = serde_json::from_str(&body)
            .map_err(|source| RegistrationError::Malformed { source, body })?;

        tracing::info!(
            "Successfully registered stream. Topic: {}, SSRC: {}, Port: {}",
            request.topic,
            registration.ssrc,
            registration.rtp_port
        );

        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_inputs_fail_before_network() {
        // Port 9 on localhost is never served; any request would fail with
        // Transport rather than InvalidInput.
        let url = "http://127.0.0.1:9/api/streams/register";

        let client = RegistrationClient::new(url, Credentials::new("audio", "token"));
        let err = client.register("", MediaKind::Audio).await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidInput("topic is empty")));

        let client = RegistrationClient::new(url, Credentials::new("", "token"));
        let err = client.register("topic", MediaKind::Audio).await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidInput(_)));

        let client = RegistrationClient::new(url, Credentials::new("audio", ""));
        let err = client.register("topic", MediaKind::Audio).await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidInput(_)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = Credentials::new("audio", "FnhXd7dNy8iC");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("audio"));
        assert!(!dbg.contains("FnhXd7dNy8iC"));
    }

    #[test]
    fn test_from_config_uses_register_path() {
        let config = ControlConfig {
            server_url: "http://10.0.0.2:8080".into(),
            device_id: "audio".into(),
            device_token: "token".into(),
            request_timeout_secs: Some(5),
        };
        let client = RegistrationClient::from_config(&config).unwrap();
        assert_eq!(client.url(), "http://10.0.0.2:8080/api/streams/register");
    }
}
