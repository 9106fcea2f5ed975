//! Gmail REST client (users/me scope).

use base64::engine::general_purpose::URL_SAFE;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use crate::auth::{GoogleAuth, GoogleAuthError};

/// Gmail API root for the authenticated user.
pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// System label Gmail puts on draft messages.
pub const DRAFT_LABEL: &str = "DRAFT";

#[derive(Debug, thiserror::Error)]
pub enum GmailError {
    #[error("auth error: {0}")]
    Auth(#[from] GoogleAuthError),
    #[error("http error: {0}")]
    Http(String),
    #[error("gmail returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// A fetched message reduced to the fields the pipeline consumes.
/// Missing headers and bodies are empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GmailMessage {
    pub id: String,
    pub label_ids: Vec<String>,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// A message reference taken from a `messagesAdded` history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub id: String,
    pub label_ids: Vec<String>,
}

impl HistoryMessage {
    pub fn is_draft(&self) -> bool {
        self.label_ids.iter().any(|label| label == DRAFT_LABEL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GmailLabel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    pub history_id: u64,
    pub expiration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct GmailClient {
    auth: GoogleAuth,
    api_base: String,
}

impl GmailClient {
    pub fn new(auth: GoogleAuth) -> Self {
        Self::with_api_base(auth, DEFAULT_GMAIL_API_BASE)
    }

    pub fn with_api_base(auth: GoogleAuth, api_base: impl Into<String>) -> Self {
        Self {
            auth,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch one message in FULL format.
    pub fn get_message(&self, message_id: &str) -> Result<GmailMessage, GmailError> {
        let url = format!(
            "{}/messages/{}?format=full",
            self.api_base,
            urlencoding::encode(message_id)
        );
        let response = self.execute(Client::new().get(&url), message_id)?;
        let resource: MessageResource = parse_json(response)?;
        Ok(resource.into_message(message_id))
    }

    /// Add labels to a message.
    pub fn modify_labels(&self, message_id: &str, add_label_ids: &[String]) -> Result<(), GmailError> {
        let url = format!(
            "{}/messages/{}/modify",
            self.api_base,
            urlencoding::encode(message_id)
        );
        self.execute(
            Client::new()
                .post(&url)
                .json(&json!({ "addLabelIds": add_label_ids })),
            message_id,
        )?;
        Ok(())
    }

    /// Create a draft from a complete RFC 822 message. Returns the draft id.
    pub fn create_draft(&self, raw_message: &str) -> Result<String, GmailError> {
        let url = format!("{}/drafts", self.api_base);
        let encoded = URL_SAFE.encode(raw_message.as_bytes());
        let response = self.execute(
            Client::new()
                .post(&url)
                .json(&json!({ "message": { "raw": encoded } })),
            "drafts",
        )?;
        let draft: DraftResource = parse_json(response)?;
        debug!("created draft {}", draft.id);
        Ok(draft.id)
    }

    pub fn list_labels(&self) -> Result<Vec<GmailLabel>, GmailError> {
        let url = format!("{}/labels", self.api_base);
        let response = self.execute(Client::new().get(&url), "labels")?;
        let list: LabelsListResponse = parse_json(response)?;
        Ok(list.labels.unwrap_or_default())
    }

    /// Create a user label. A name collision comes back as `GmailError::Conflict`.
    pub fn create_label(&self, name: &str) -> Result<GmailLabel, GmailError> {
        let url = format!("{}/labels", self.api_base);
        let response = self.execute(
            Client::new().post(&url).json(&json!({
                "name": name,
                "labelListVisibility": "labelShow",
                "messageListVisibility": "show",
            })),
            name,
        )?;
        parse_json(response)
    }

    /// List up to `max_results` message ids carrying `label_id`, newest first.
    pub fn list_message_ids(&self, label_id: &str, max_results: u32) -> Result<Vec<String>, GmailError> {
        let url = format!(
            "{}/messages?labelIds={}&maxResults={}",
            self.api_base,
            urlencoding::encode(label_id),
            max_results
        );
        let response = self.execute(Client::new().get(&url), "messages")?;
        let list: MessagesListResponse = parse_json(response)?;
        Ok(list
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|message| message.id)
            .collect())
    }

    /// Messages added since `start_history_id`, across all result pages, in
    /// history order.
    pub fn list_history(&self, start_history_id: u64) -> Result<Vec<HistoryMessage>, GmailError> {
        let mut added = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = format!(
                "{}/history?startHistoryId={}&historyTypes=messageAdded",
                self.api_base, start_history_id
            );
            if let Some(token) = &page_token {
                url.push_str("&pageToken=");
                url.push_str(&urlencoding::encode(token));
            }
            let response = self.execute(Client::new().get(&url), "history")?;
            let page: HistoryListResponse = parse_json(response)?;
            for record in page.history.unwrap_or_default() {
                for entry in record.messages_added.unwrap_or_default() {
                    if let Some(message) = entry.message {
                        added.push(HistoryMessage {
                            id: message.id,
                            label_ids: message.label_ids.unwrap_or_default(),
                        });
                    }
                }
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(added)
    }

    /// Ask Gmail to publish mailbox changes to a Pub/Sub topic.
    pub fn watch(&self, topic_name: &str) -> Result<WatchResponse, GmailError> {
        let url = format!("{}/watch", self.api_base);
        let response = self.execute(
            Client::new()
                .post(&url)
                .json(&json!({ "topicName": topic_name })),
            topic_name,
        )?;
        let raw: RawWatchResponse = parse_json(response)?;
        let history_id = raw
            .history_id
            .trim()
            .parse::<u64>()
            .map_err(|e| GmailError::Parse(format!("watch historyId: {}", e)))?;
        let expiration_ms = raw
            .expiration
            .as_deref()
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or_default();
        Ok(WatchResponse {
            history_id,
            expiration_ms,
        })
    }

    fn execute(&self, request: RequestBuilder, context: &str) -> Result<Response, GmailError> {
        let token = self.auth.get_access_token()?;
        let response = request
            .bearer_auth(token)
            .send()
            .map_err(|e| GmailError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        match status.as_u16() {
            404 => Err(GmailError::NotFound(context.to_string())),
            409 => Err(GmailError::Conflict(context.to_string())),
            code => {
                error!("gmail request for {} failed: {} - {}", context, status, body);
                Err(GmailError::Api { status: code, body })
            }
        }
    }
}

/// Render a minimal plain-text reply. `subject` gets a single `Re: ` prefix.
/// Header values are folded onto one line; only `body` may span lines.
pub fn build_reply_message(recipient: &str, subject: &str, body: &str) -> String {
    let recipient = header_value(recipient);
    let subject = header_value(subject);
    let subject = subject.as_str();
    let already_reply = subject
        .get(..3)
        .map(|prefix| prefix.eq_ignore_ascii_case("re:"))
        .unwrap_or(false);
    let subject = if already_reply {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    };
    format!(
        "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
        recipient,
        subject,
        body
    )
}

/// Control characters (CR and LF included) become spaces, then whitespace
/// runs collapse.
fn header_value(value: &str) -> String {
    value
        .split(|c: char| c.is_control() || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, GmailError> {
    response.json().map_err(|e| GmailError::Parse(e.to_string()))
}

fn decode_body_data(data: &str) -> Option<String> {
    let trimmed = data.trim().trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(trimmed.as_bytes()).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

// ============================================================================
// Gmail API types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResource {
    #[serde(default)]
    label_ids: Option<Vec<String>>,
    #[serde(default)]
    payload: Option<MessagePart>,
}

impl MessageResource {
    fn into_message(self, message_id: &str) -> GmailMessage {
        let (from, subject, body) = match &self.payload {
            Some(payload) => (
                payload.header("From"),
                payload.header("Subject"),
                payload.text_body().unwrap_or_default(),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        GmailMessage {
            id: message_id.to_string(),
            label_ids: self.label_ids.unwrap_or_default(),
            from,
            subject,
            body,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    headers: Option<Vec<MessageHeader>>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Option<Vec<MessagePart>>,
}

impl MessagePart {
    fn header(&self, name: &str) -> String {
        self.headers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.clone())
            .unwrap_or_default()
    }

    fn own_data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|body| body.data.as_deref())
            .filter(|data| !data.is_empty())
    }

    /// Top-level body first, then the first text/plain part depth-first.
    fn text_body(&self) -> Option<String> {
        if let Some(data) = self.own_data() {
            return decode_body_data(data);
        }
        self.first_plain_part()
    }

    fn first_plain_part(&self) -> Option<String> {
        for part in self.parts.as_deref().unwrap_or_default() {
            let is_plain = part
                .mime_type
                .as_deref()
                .map(|mime| mime.eq_ignore_ascii_case("text/plain"))
                .unwrap_or(false);
            if is_plain {
                if let Some(data) = part.own_data() {
                    return decode_body_data(data);
                }
            }
            if let Some(nested) = part.first_plain_part() {
                return Some(nested);
            }
        }
        None
    }
}

#[derive(Debug, Deserialize)]
struct MessageHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DraftResource {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LabelsListResponse {
    #[serde(default)]
    labels: Option<Vec<GmailLabel>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessagesListResponse {
    #[serde(default)]
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListResponse {
    #[serde(default)]
    history: Option<Vec<HistoryRecord>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(default)]
    messages_added: Option<Vec<MessageAdded>>,
}

#[derive(Debug, Deserialize)]
struct MessageAdded {
    #[serde(default)]
    message: Option<HistoryMessageRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryMessageRef {
    id: String,
    #[serde(default)]
    label_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWatchResponse {
    history_id: String,
    #[serde(default)]
    expiration: Option<String>,
}
