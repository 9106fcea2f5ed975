//! Blocking clients for the Google APIs the triage service talks to.
//!
//! Nothing in here knows about classification or idempotency; the clients
//! only translate between HTTP and plain Rust types.

pub mod auth;
pub mod gmail;
pub mod pubsub;

pub use auth::{GoogleAuth, GoogleAuthConfig, GoogleAuthError};
pub use gmail::{
    build_reply_message, GmailClient, GmailError, GmailLabel, GmailMessage, HistoryMessage,
    WatchResponse, DEFAULT_GMAIL_API_BASE,
};
pub use pubsub::{PubSubClient, PubSubError, PulledMessage, DEFAULT_PUBSUB_API_BASE};
