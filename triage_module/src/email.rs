//! Domain types shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of triage categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Business,
    Private,
    Payments,
    ActionNeeded,
    Junk,
    Newsletter,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Business,
        Category::Private,
        Category::Payments,
        Category::ActionNeeded,
        Category::Junk,
        Category::Newsletter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Business => "business",
            Category::Private => "private",
            Category::Payments => "payments",
            Category::ActionNeeded => "action_needed",
            Category::Junk => "junk",
            Category::Newsletter => "newsletter",
        }
    }

    /// Mailbox label name used when no override is configured.
    pub fn default_label_name(self) -> &'static str {
        match self {
            Category::Business => "Business",
            Category::Private => "Private",
            Category::Payments => "Payments",
            Category::ActionNeeded => "Action Needed",
            Category::Junk => "Junk",
            Category::Newsletter => "Newsletter",
        }
    }

    pub fn needs_reply(self) -> bool {
        matches!(self, Category::ActionNeeded)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "business" => Ok(Category::Business),
            "private" => Ok(Category::Private),
            "payments" => Ok(Category::Payments),
            "action_needed" => Ok(Category::ActionNeeded),
            "junk" | "spam" => Ok(Category::Junk),
            "newsletter" => Ok(Category::Newsletter),
            _ => Err(UnknownCategory(value.to_string())),
        }
    }
}

/// A fetched message. Missing fields are empty strings, never errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Email {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    pub fn has_body(&self) -> bool {
        !self.body.trim().is_empty()
    }
}

/// Outcome of one classifier call, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub label: Category,
    pub reply: Option<String>,
    pub display_name: String,
}

impl Classification {
    /// Normalizes raw classifier output: an unknown or missing label falls
    /// back to the category, and a reply survives only for categories that
    /// need one.
    pub fn new(
        category: Category,
        label: Option<&str>,
        reply: Option<String>,
        display_name: Option<String>,
    ) -> Self {
        let label = label
            .and_then(|value| value.parse::<Category>().ok())
            .unwrap_or(category);
        let reply = reply
            .map(|text| text.trim().to_string())
            .filter(|text| category.needs_reply() && !text.is_empty());
        Self {
            category,
            label,
            reply,
            display_name: display_name
                .map(|name| name.trim().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Durable proof that a message's effects were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub category: Category,
    pub label: Category,
    pub draft: String,
    pub created_at: DateTime<Utc>,
}

impl ProcessedRecord {
    pub fn from_classification(email: &Email, classification: &Classification) -> Self {
        Self {
            message_id: email.id.clone(),
            sender: email.sender.clone(),
            subject: email.subject.clone(),
            category: classification.category,
            label: classification.label,
            draft: classification.reply.clone().unwrap_or_default(),
            created_at: Utc::now(),
        }
    }
}
