//! Cloud Pub/Sub pull subscriber (REST, synchronous pull).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::auth::{GoogleAuth, GoogleAuthError};

pub const DEFAULT_PUBSUB_API_BASE: &str = "https://pubsub.googleapis.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("auth error: {0}")]
    Auth(#[from] GoogleAuthError),
    #[error("http error: {0}")]
    Http(String),
    #[error("pubsub returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
}

/// One delivered message. `data` is the decoded payload; an undecodable
/// payload arrives as an empty buffer so it can still be acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledMessage {
    pub ack_id: String,
    pub message_id: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PubSubClient {
    auth: GoogleAuth,
    api_base: String,
    subscription: String,
}

impl PubSubClient {
    pub fn new(auth: GoogleAuth, project_id: &str, subscription_id: &str) -> Self {
        Self::with_api_base(auth, DEFAULT_PUBSUB_API_BASE, project_id, subscription_id)
    }

    pub fn with_api_base(
        auth: GoogleAuth,
        api_base: impl Into<String>,
        project_id: &str,
        subscription_id: &str,
    ) -> Self {
        Self {
            auth,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            subscription: format!("projects/{}/subscriptions/{}", project_id, subscription_id),
        }
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Pull up to `max_messages` without waiting for new ones. An idle
    /// subscription yields an empty vec.
    pub fn pull(&self, max_messages: u32) -> Result<Vec<PulledMessage>, PubSubError> {
        let url = format!("{}/{}:pull", self.api_base, self.subscription);
        let response = self.post(
            &url,
            json!({ "maxMessages": max_messages.max(1), "returnImmediately": true }),
        )?;
        let pulled: PullResponse = response
            .json()
            .map_err(|e| PubSubError::Parse(e.to_string()))?;

        Ok(pulled
            .received_messages
            .unwrap_or_default()
            .into_iter()
            .map(|received| {
                let message = received.message.unwrap_or_default();
                let data = match message.data.as_deref() {
                    Some(encoded) if !encoded.is_empty() => {
                        STANDARD.decode(encoded.trim()).unwrap_or_else(|err| {
                            warn!(
                                "pubsub message {} has undecodable data: {}",
                                message.message_id, err
                            );
                            Vec::new()
                        })
                    }
                    _ => Vec::new(),
                };
                PulledMessage {
                    ack_id: received.ack_id,
                    message_id: message.message_id,
                    data,
                }
            })
            .collect())
    }

    pub fn acknowledge(&self, ack_ids: &[String]) -> Result<(), PubSubError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        let url = format!("{}/{}:acknowledge", self.api_base, self.subscription);
        self.post(&url, json!({ "ackIds": ack_ids }))?;
        Ok(())
    }

    fn post(&self, url: &str, body: serde_json::Value) -> Result<Response, PubSubError> {
        let token = self.auth.get_access_token()?;
        let response = Client::new()
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .map_err(|e| PubSubError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            error!("pubsub request {} failed: {} - {}", url, status, body);
            return Err(PubSubError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Option<Vec<ReceivedMessage>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    #[serde(default)]
    message: Option<PubsubMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message_id: String,
}
