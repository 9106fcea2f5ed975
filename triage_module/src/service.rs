mod config;
mod pipeline;
mod server;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ConfigError, NotificationTransport, ServiceConfig, DEFAULT_DATABASE_PATH};
pub use pipeline::Pipeline;
pub use server::{push_router, run_server, PushState};
