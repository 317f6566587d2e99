use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::consumer::{RetryStrategy, ThreadingStrategy};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub consumer: ConsumerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Store backend: "memory" or "redis"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Prefix for every backend key written by this crate
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_consumer_id")]
    pub default_consumer_id: String,
    #[serde(default)]
    pub dequeue: DequeueKind,
    /// How long a dequeue may suspend waiting for a message, in milliseconds
    #[serde(default = "default_dequeue_wait_ms")]
    pub dequeue_wait_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerSettings {
    #[serde(default = "default_consumer_id")]
    pub consumer_id: String,
    #[serde(default)]
    pub submission: SubmissionKind,
    /// Concurrent workers pulling from this consumer's backlog
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum requeues per message; 0 disables retry
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub ordered_processing: bool,
    /// Spawn workers as soon as the consumer is built
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    /// Sequential-lock lease duration in milliseconds
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
    /// How long to keep retrying lock acquisition, in milliseconds
    #[serde(default = "default_lock_acquire_timeout_ms")]
    pub lock_acquire_timeout_ms: u64,
}

/// Dequeue ordering for a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DequeueKind {
    #[default]
    Fifo,
    Random,
}

/// Submission mode for producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionKind {
    #[default]
    Fanout,
    Single,
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "relayq".to_string()
}

fn default_queue_name() -> String {
    "messages".to_string()
}

fn default_consumer_id() -> String {
    "default".to_string()
}

fn default_dequeue_wait_ms() -> u64 {
    1000
}

fn default_workers() -> usize {
    1
}

fn default_auto_start() -> bool {
    true
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}

fn default_lock_acquire_timeout_ms() -> u64 {
    5_000
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("store.backend", "memory")?
            .set_default("store.redis_url", "redis://localhost:6379")?
            .set_default("store.key_prefix", "relayq")?
            .set_default("queue.name", "messages")?
            .set_default("queue.dequeue_wait_ms", 1000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // RELAYQ_STORE__BACKEND, RELAYQ_QUEUE__NAME, etc.
            .add_source(
                Environment::with_prefix("RELAYQ")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl ConsumerSettings {
    pub fn retry_strategy(&self) -> RetryStrategy {
        if self.max_retries == 0 {
            RetryStrategy::NoRetry
        } else {
            RetryStrategy::MaxRetries(self.max_retries)
        }
    }

    pub fn threading_strategy(&self) -> ThreadingStrategy {
        if self.workers <= 1 {
            ThreadingStrategy::SingleWorker
        } else {
            ThreadingStrategy::WorkerPool(self.workers)
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            default_consumer_id: default_consumer_id(),
            dequeue: DequeueKind::default(),
            dequeue_wait_ms: default_dequeue_wait_ms(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            consumer_id: default_consumer_id(),
            submission: SubmissionKind::default(),
            workers: default_workers(),
            max_retries: 0,
            ordered_processing: false,
            auto_start: default_auto_start(),
            lease_ttl_ms: default_lease_ttl_ms(),
            lock_acquire_timeout_ms: default_lock_acquire_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.store.backend, "memory");
        assert_eq!(settings.queue.name, "messages");
        assert_eq!(settings.queue.default_consumer_id, "default");
        assert_eq!(settings.queue.dequeue, DequeueKind::Fifo);
        assert!(settings.consumer.auto_start);
    }

    #[test]
    fn test_retry_strategy_mapping() {
        let mut consumer = ConsumerSettings::default();
        assert_eq!(consumer.retry_strategy(), RetryStrategy::NoRetry);

        consumer.max_retries = 3;
        assert_eq!(consumer.retry_strategy(), RetryStrategy::MaxRetries(3));
    }

    #[test]
    fn test_threading_strategy_mapping() {
        let mut consumer = ConsumerSettings::default();
        assert_eq!(consumer.threading_strategy(), ThreadingStrategy::SingleWorker);

        consumer.workers = 4;
        assert_eq!(consumer.threading_strategy(), ThreadingStrategy::WorkerPool(4));
    }
}
