//! Classification backend.
//!
//! The pipeline only sees the [`Classifier`] trait. [`OpenAiClassifier`] is the
//! production implementation: one chat-completions call per message, with the
//! model asked to answer in bare JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::email::{Category, Classification};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(30);

const CLASSIFY_PROMPT: &str = r#"Analyze the following email and return ONLY pure JSON, without markdown and without backticks.

Categories: ["business","private","payments","action_needed","junk","newsletter"]

Labels:
- if email is Promotions then it's "newsletter"
- if email is private email then it's "private"
- if email is Bank/invoices then it's "payments"
- if email is business offer/linkedIn then it's "business"
- if email is Junk/spam then it's "junk"

If the email is from a real person and not spam/newsletter/ads/invoices, and requires a response or action, categorize it as "action_needed" and draft a short, polite reply in the language of origin.
Only "action_needed" gets a reply, and it should address the sender by name. For every other category reply must be an empty string.
Include sender_name, taken from the email body or subject when possible, otherwise an empty string.

Format:
{"category":"...","label":"...","reply":"...","sender_name":"..."}"#;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Http(String),
    #[error("classifier returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("classifier returned no choices")]
    EmptyResponse,
    #[error("cannot parse classifier output: {0}")]
    Parse(String),
    #[error("classifier returned unknown category: {0}")]
    UnknownCategory(String),
}

pub trait Classifier: Send + Sync {
    fn classify(&self, subject: &str, body: &str) -> Result<Classification, ClassifierError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_OPENAI_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            timeout: DEFAULT_CLASSIFIER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClassifier {
    config: OpenAiConfig,
}

impl OpenAiClassifier {
    pub fn new(config: OpenAiConfig) -> Self {
        Self { config }
    }

    fn call_openai(&self, subject: &str, body: &str) -> Result<String, ClassifierError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        let request = OpenAIChatRequest {
            model: self.config.model.clone(),
            messages: vec![OpenAIChatMessage {
                role: "user".to_string(),
                content: format!(
                    "{}\n\nEmail:\nSubject: {}\n\nBody:\n{}",
                    CLASSIFY_PROMPT, subject, body
                ),
            }],
        };

        debug!("Calling OpenAI: {} with model {}", url, self.config.model);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| ClassifierError::Http(e.to_string()))?;
        let response = client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .map_err(|e| ClassifierError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let openai_response: OpenAIChatResponse = response
            .json()
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;

        openai_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(ClassifierError::EmptyResponse)
    }
}

impl Classifier for OpenAiClassifier {
    fn classify(&self, subject: &str, body: &str) -> Result<Classification, ClassifierError> {
        let content = self.call_openai(subject, body)?;
        parse_decision(&content)
    }
}

/// Parse the model's JSON answer, tolerating a Markdown code fence.
pub fn parse_decision(content: &str) -> Result<Classification, ClassifierError> {
    let text = strip_code_fences(content);
    let decision: ModelDecision = serde_json::from_str(text).map_err(|err| {
        warn!("classifier output is not JSON: {} (raw={})", err, text);
        ClassifierError::Parse(err.to_string())
    })?;

    let category = decision
        .category
        .parse::<Category>()
        .map_err(|_| ClassifierError::UnknownCategory(decision.category.clone()))?;

    Ok(Classification::new(
        category,
        decision.label.as_deref(),
        decision.reply,
        decision.sender_name,
    ))
}

fn strip_code_fences(content: &str) -> &str {
    let text = content.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}

#[derive(Debug, Deserialize)]
struct ModelDecision {
    category: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    sender_name: Option<String>,
}

// ============================================================================
// OpenAI API types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChatChoice {
    message: OpenAIChatMessage,
}
