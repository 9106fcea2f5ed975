use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use google_module::GoogleAuthConfig;

use crate::backlog::DEFAULT_INITIAL_EMAILS_TO_FETCH;
use crate::classifier::{
    OpenAiConfig, DEFAULT_CLASSIFIER_TIMEOUT, DEFAULT_OPENAI_MODEL, DEFAULT_OPENAI_URL,
};
use crate::email::Category;
use crate::history::{DEFAULT_HISTORY_BACKOFF_STEP, DEFAULT_HISTORY_MAX_ATTEMPTS};
use crate::listener::DEFAULT_CURSOR_CACHE_CAPACITY;
use crate::pubsub_consumer::PullConfig;
use crate::worker_pool::{PoolConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_THROTTLE, DEFAULT_WORKERS};

pub const DEFAULT_DATABASE_PATH: &str = "mailai.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTransport {
    Pull,
    Push,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub openai: OpenAiConfig,
    pub google_auth: GoogleAuthConfig,
    pub project_id: String,
    pub subscription_id: String,
    pub topic_name: String,
    pub database_path: PathBuf,
    pub pool: PoolConfig,
    pub initial_emails_to_fetch: u32,
    pub history_max_attempts: u32,
    pub history_backoff_step: Duration,
    pub cursor_cache_capacity: usize,
    pub transport: NotificationTransport,
    pub pull: PullConfig,
    /// Mailbox label name per category
    pub label_names: HashMap<Category, String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("RUST_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("RUST_SERVICE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(9001);

        let api_key = env_var_non_empty("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        let openai = OpenAiConfig {
            api_key,
            api_url: env_var_non_empty("OPENAI_API_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            model: env_var_non_empty("MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            timeout: env_positive::<u64>("CLASSIFIER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CLASSIFIER_TIMEOUT),
        };

        let project_id = env_var_non_empty("GOOGLE_CLOUD_PROJECT")
            .ok_or(ConfigError::Missing("GOOGLE_CLOUD_PROJECT"))?;
        let subscription_id =
            env_var_non_empty("SUBSCRIPTION_ID").ok_or(ConfigError::Missing("SUBSCRIPTION_ID"))?;
        let topic_name = env_var_non_empty("TOPIC_NAME")
            .unwrap_or_else(|| format!("projects/{}/topics/gmail-topic", project_id));

        let database_path = PathBuf::from(
            env_var_non_empty("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
        );

        let pool = PoolConfig {
            workers: env_positive::<usize>("NUM_WORKERS").unwrap_or(DEFAULT_WORKERS),
            queue_capacity: env_positive::<usize>("JOB_QUEUE_CAPACITY")
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            throttle: env_positive::<u64>("WORKER_THROTTLE_MS")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_THROTTLE),
        };

        let initial_emails_to_fetch = env::var("INITIAL_EMAILS_TO_FETCH")
            .ok()
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_INITIAL_EMAILS_TO_FETCH);
        let history_max_attempts =
            env_positive::<u32>("HISTORY_MAX_ATTEMPTS").unwrap_or(DEFAULT_HISTORY_MAX_ATTEMPTS);
        let history_backoff_step = env_positive::<u64>("HISTORY_BACKOFF_STEP_MS")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_HISTORY_BACKOFF_STEP);
        let cursor_cache_capacity =
            env_positive::<usize>("CURSOR_CACHE_CAPACITY").unwrap_or(DEFAULT_CURSOR_CACHE_CAPACITY);

        let transport = match env_var_non_empty("NOTIFICATION_TRANSPORT")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("pull") => NotificationTransport::Pull,
            Some("push") => NotificationTransport::Push,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "NOTIFICATION_TRANSPORT",
                    value: other.to_string(),
                })
            }
        };
        let pull = PullConfig {
            max_messages: env_positive::<u32>("PUBSUB_PULL_MAX_MESSAGES").unwrap_or(10),
            poll_interval: env_positive::<u64>("PUBSUB_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or_else(|| Duration::from_secs(1)),
        };

        let label_names = Category::ALL
            .iter()
            .map(|category| {
                let key = format!("LABEL_{}", category.as_str().to_ascii_uppercase());
                let name = env_var_non_empty(&key)
                    .unwrap_or_else(|| category.default_label_name().to_string());
                (*category, name)
            })
            .collect();

        Ok(Self {
            host,
            port,
            openai,
            google_auth: GoogleAuthConfig::from_env(),
            project_id,
            subscription_id,
            topic_name,
            database_path,
            pool,
            initial_emails_to_fetch,
            history_max_attempts,
            history_backoff_step,
            cursor_cache_capacity,
            transport,
            pull,
            label_names,
        })
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_positive<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}
