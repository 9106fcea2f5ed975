//! Pull-mode notification intake.

use google_module::{PubSubClient, PulledMessage};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::listener::NotificationListener;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("pull failed: {0}")]
    Pull(String),
    #[error("acknowledge failed: {0}")]
    Ack(String),
}

/// At-least-once delivery with explicit acknowledgement.
pub trait NotificationSource: Send + Sync {
    fn pull(&self, max_messages: u32) -> Result<Vec<PulledMessage>, TransportError>;

    fn acknowledge(&self, ack_ids: &[String]) -> Result<(), TransportError>;
}

impl NotificationSource for PubSubClient {
    fn pull(&self, max_messages: u32) -> Result<Vec<PulledMessage>, TransportError> {
        PubSubClient::pull(self, max_messages).map_err(|err| TransportError::Pull(err.to_string()))
    }

    fn acknowledge(&self, ack_ids: &[String]) -> Result<(), TransportError> {
        PubSubClient::acknowledge(self, ack_ids).map_err(|err| TransportError::Ack(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PullConfig {
    pub max_messages: u32,
    pub poll_interval: Duration,
}

pub struct ListenerControl {
    stop: ShutdownSignal,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerControl {
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_and_join(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the pull loop. Every pulled message is acknowledged after the
/// listener has handled it, whatever the outcome.
pub fn start_pull_consumer(
    source: Arc<dyn NotificationSource>,
    listener: Arc<NotificationListener>,
    config: PullConfig,
) -> Result<ListenerControl, std::io::Error> {
    let stop = ShutdownSignal::new();
    let handle = {
        let stop = stop.clone();
        thread::Builder::new()
            .name("pubsub-consumer".to_string())
            .spawn(move || run_pull_loop(source.as_ref(), &listener, config, &stop))?
    };
    Ok(ListenerControl {
        stop,
        handle: Some(handle),
    })
}

fn run_pull_loop(
    source: &dyn NotificationSource,
    listener: &NotificationListener,
    config: PullConfig,
    stop: &ShutdownSignal,
) {
    info!("pubsub consumer started");
    while !stop.is_cancelled() {
        let messages = match source.pull(config.max_messages) {
            Ok(messages) => messages,
            Err(err) => {
                error!("{}", err);
                stop.sleep(config.poll_interval);
                continue;
            }
        };

        if messages.is_empty() {
            stop.sleep(config.poll_interval);
            continue;
        }

        let mut ack_ids = Vec::with_capacity(messages.len());
        for message in messages {
            let outcome = listener.handle_payload(&message.data);
            debug!("pubsub message {}: {:?}", message.message_id, outcome);
            ack_ids.push(message.ack_id);
        }
        if let Err(err) = source.acknowledge(&ack_ids) {
            warn!("{} ({} message(s) may be redelivered)", err, ack_ids.len());
        }
    }
    info!("pubsub consumer stopped");
}
