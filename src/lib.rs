//! relayq: a reliable multi-consumer message queue over a shared
//! key-value store.
//!
//! Multiple independent processes publish typed messages to a named queue;
//! every registered logical consumer receives each message exactly once,
//! in a configurable order, with optional strict per-consumer sequential
//! processing and optional retry-on-failure. The backend (Redis in
//! production, in-memory for tests) only needs to provide atomic push/pop
//! on ordered collections, atomic set add/remove, and a lease primitive;
//! those operations are the sole cross-process synchronization points.
//!
//! ```rust,ignore
//! let store = create_store(&settings.store)?;
//! let queue = MessageQueue::from_settings(&settings, store);
//!
//! let producer = MessageProducer::new(queue.clone(), Arc::new(JsonCodec::new()));
//! producer.submit(&order).await?;
//!
//! let consumer = MessageConsumer::from_settings(&settings, queue, codec, handler);
//! ```

// Value types and codecs
pub mod codec;
pub mod message;

// Store adapters
pub mod store;

// Queue core
pub mod consumer;
pub mod lock;
pub mod producer;
pub mod queue;

// Supporting modules
pub mod config;
pub mod error;
pub mod metrics;

pub use codec::{CodecError, FieldMap, JsonCodec, PayloadCodec};
pub use config::Settings;
pub use consumer::{
    ConsumerBuilder, ConsumerStatsSnapshot, MessageConsumer, MessageHandler, RetryStrategy,
    ThreadingStrategy,
};
pub use error::{HandlerFailure, QueueError};
pub use lock::{Lease, SequentialLock};
pub use message::{Message, MessageRecord};
pub use producer::{MessageProducer, SubmissionStrategy, SubmitReport};
pub use queue::{DequeueStrategy, FifoStrategy, MessageQueue, RandomStrategy};
pub use store::{create_store, MemoryStore, RedisStore, StoreAdapter, StoreError};
