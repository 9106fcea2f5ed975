//! Mailbox side effects: labels and reply drafts.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::email::{Category, Classification, Email};
use crate::mailbox::{Mailbox, MailboxError, MailboxLabel};

#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    #[error("failed to label {message_id}: {reason}")]
    Label { message_id: String, reason: String },
    #[error("failed to draft reply for {message_id}: {reason}")]
    Draft { message_id: String, reason: String },
    #[error("label bootstrap failed: {0}")]
    Bootstrap(String),
    #[error("no mailbox label configured for category {0}")]
    UnmappedCategory(Category),
}

/// Category to backend label id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    ids: HashMap<Category, String>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: Category, label_id: impl Into<String>) {
        self.ids.insert(category, label_id.into());
    }

    pub fn get(&self, category: Category) -> Option<&str> {
        self.ids.get(&category).map(String::as_str)
    }

    /// Every category must resolve to a label id.
    pub fn validate(&self) -> Result<(), EffectError> {
        match Category::ALL
            .iter()
            .find(|category| !self.ids.contains_key(*category))
        {
            Some(missing) => Err(EffectError::UnmappedCategory(*missing)),
            None => Ok(()),
        }
    }
}

/// Ensure a mailbox label exists for every category and return their ids.
/// A creation conflict means the label already exists under that name.
pub fn bootstrap_labels(
    mailbox: &dyn Mailbox,
    label_names: &HashMap<Category, String>,
) -> Result<LabelTable, EffectError> {
    let mut existing = list_labels(mailbox)?;
    let mut table = LabelTable::new();

    for category in Category::ALL {
        let name = label_names
            .get(&category)
            .map(String::as_str)
            .unwrap_or_else(|| category.default_label_name());

        if let Some(label) = find_label(&existing, name) {
            table.insert(category, label.id.clone());
            continue;
        }

        match mailbox.create_label(name) {
            Ok(label) => {
                info!("created mailbox label {} ({})", name, label.id);
                table.insert(category, label.id.clone());
                existing.push(label);
            }
            Err(MailboxError::Conflict(_)) => {
                existing = list_labels(mailbox)?;
                let label = find_label(&existing, name).ok_or_else(|| {
                    EffectError::Bootstrap(format!(
                        "label {} conflicts but is not listed",
                        name
                    ))
                })?;
                table.insert(category, label.id.clone());
            }
            Err(err) => {
                return Err(EffectError::Bootstrap(format!(
                    "create label {}: {}",
                    name, err
                )))
            }
        }
    }

    table.validate()?;
    Ok(table)
}

fn list_labels(mailbox: &dyn Mailbox) -> Result<Vec<MailboxLabel>, EffectError> {
    mailbox
        .list_labels()
        .map_err(|err| EffectError::Bootstrap(format!("list labels: {}", err)))
}

fn find_label<'a>(labels: &'a [MailboxLabel], name: &str) -> Option<&'a MailboxLabel> {
    labels
        .iter()
        .find(|label| label.name.eq_ignore_ascii_case(name))
}

/// What [`EffectApplier::apply`] managed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectReport {
    pub labeled: bool,
    pub drafted: bool,
}

#[derive(Clone)]
pub struct EffectApplier {
    mailbox: Arc<dyn Mailbox>,
    labels: LabelTable,
}

impl EffectApplier {
    pub fn new(mailbox: Arc<dyn Mailbox>, labels: LabelTable) -> Self {
        Self { mailbox, labels }
    }

    pub fn apply_label(&self, message_id: &str, label: Category) -> Result<(), EffectError> {
        let label_id = self
            .labels
            .get(label)
            .ok_or(EffectError::UnmappedCategory(label))?;
        self.mailbox
            .apply_label(message_id, label_id)
            .map_err(|err| EffectError::Label {
                message_id: message_id.to_string(),
                reason: err.to_string(),
            })
    }

    pub fn create_reply_draft(
        &self,
        email: &Email,
        reply: &str,
        display_name: &str,
    ) -> Result<(), EffectError> {
        let recipient = reply_recipient(&email.sender, display_name);
        self.mailbox
            .create_draft(&recipient, &email.subject, reply)
            .map_err(|err| EffectError::Draft {
                message_id: email.id.clone(),
                reason: err.to_string(),
            })
    }

    /// Label and, when there is a reply, draft. Each is attempted regardless
    /// of the other; failures are logged and reported, never returned.
    pub fn apply(&self, email: &Email, classification: &Classification) -> EffectReport {
        let mut report = EffectReport::default();

        match self.apply_label(&email.id, classification.label) {
            Ok(()) => report.labeled = true,
            Err(err) => warn!("{}", err),
        }

        if let Some(reply) = classification.reply.as_deref() {
            match self.create_reply_draft(email, reply, &classification.display_name) {
                Ok(()) => report.drafted = true,
                Err(err) => warn!("{}", err),
            }
        }

        report
    }
}

/// Build the draft's `To:` value. A usable display name replaces whatever
/// name the sender header carried.
///
/// The display name is classifier output, so it is reduced to a single-line
/// phrase: control characters and the `<`, `>` and `"` delimiters are dropped.
pub fn reply_recipient(sender: &str, display_name: &str) -> String {
    let sender = single_line(sender);
    let address = match (sender.rfind('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if start < end => sender[start + 1..end].trim(),
        _ => sender.as_str(),
    };
    let name = single_line(&display_name.replace(['<', '>', '"'], " "));
    if name.is_empty() || address.is_empty() || name.eq_ignore_ascii_case("there") {
        return sender;
    }
    format!("{} <{}>", name, address)
}

fn single_line(value: &str) -> String {
    value
        .split(|c: char| c.is_control() || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
