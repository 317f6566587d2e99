//! Message consumer: the per-consumer-id runtime loop.
//!
//! Each worker iteration acquires the sequential lock when ordered
//! processing is on, dequeues one message, invokes the application handler,
//! and finalizes: success removes nothing further (dequeue already removed
//! the message), a recoverable failure consults the retry strategy, and a
//! fatal or exhausted failure is surfaced and dropped. Infrastructure
//! failures abort the iteration and are retried only by the next natural
//! iteration. Message-level failures never stop the loop.

mod retry;

pub use retry::RetryStrategy;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::codec::PayloadCodec;
use crate::config::Settings;
use crate::error::{HandlerFailure, QueueError};
use crate::lock::{Lease, SequentialLock};
use crate::message::{Message, MessageRecord};
use crate::metrics::{HANDLER_DURATION_SECONDS, MESSAGES_DEAD_TOTAL, MESSAGES_RETRIED_TOTAL};
use crate::queue::MessageQueue;

/// Pause after a failed store operation before the next loop iteration.
const STORE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Pause after an empty non-blocking dequeue, so a zero wait window does
/// not spin.
const EMPTY_POLL_DELAY: Duration = Duration::from_millis(10);

/// How many concurrent workers pull from one consumer id's backlog.
///
/// With ordered processing enabled, a pool buys no throughput: the extra
/// workers block on the sequential lock and only provide resilience
/// against a stalled worker. Known trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadingStrategy {
    /// One consumption loop
    #[default]
    SingleWorker,
    /// A pool of n concurrent consumption loops
    WorkerPool(usize),
}

impl ThreadingStrategy {
    pub fn worker_count(&self) -> usize {
        match self {
            Self::SingleWorker => 1,
            Self::WorkerPool(n) => (*n).max(1),
        }
    }
}

/// Application handler invoked with each decoded message.
///
/// Return `Err(HandlerFailure::Recoverable(_))` to request a retry; any
/// other failure is terminal for the message.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, message: &Message<T>) -> Result<(), HandlerFailure>;
}

/// Live counters for one consumer.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    /// Messages handled successfully
    pub processed: AtomicU64,
    /// Messages requeued after a recoverable failure
    pub retried: AtomicU64,
    /// Messages dropped after a terminal failure
    pub dead: AtomicU64,
    /// Lock acquisition timeouts
    pub lock_timeouts: AtomicU64,
    /// Aborted iterations due to store errors
    pub store_errors: AtomicU64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub processed: u64,
    pub retried: u64,
    pub dead: u64,
    pub lock_timeouts: u64,
    pub store_errors: u64,
}

/// One logical consumer of a queue: worker tasks, retry state machine, and
/// graceful shutdown.
pub struct MessageConsumer<T> {
    queue: Arc<MessageQueue>,
    codec: Arc<dyn PayloadCodec<T>>,
    handler: Arc<dyn MessageHandler<T>>,
    consumer_id: String,
    retry: RetryStrategy,
    threading: ThreadingStrategy,
    ordered: bool,
    dequeue_wait: Duration,
    lock_acquire_timeout: Duration,
    lock: SequentialLock,
    stats: ConsumerStats,
    shutdown_tx: broadcast::Sender<()>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<T> MessageConsumer<T>
where
    T: Send + Sync + 'static,
{
    /// Build a consumer from layered settings; spawns its workers
    /// immediately when `consumer.auto_start` is set.
    pub fn from_settings(
        settings: &Settings,
        queue: Arc<MessageQueue>,
        codec: Arc<dyn PayloadCodec<T>>,
        handler: Arc<dyn MessageHandler<T>>,
    ) -> Arc<Self> {
        let c = &settings.consumer;
        let consumer = ConsumerBuilder::new(queue, codec, handler)
            .consumer_id(&c.consumer_id)
            .retry(c.retry_strategy())
            .threading(c.threading_strategy())
            .ordered_processing(c.ordered_processing)
            .dequeue_wait(Duration::from_millis(settings.queue.dequeue_wait_ms))
            .lease_ttl(Duration::from_millis(c.lease_ttl_ms))
            .lock_acquire_timeout(Duration::from_millis(c.lock_acquire_timeout_ms))
            .build();
        if c.auto_start {
            consumer.start();
        }
        consumer
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the configured number of worker tasks.
    pub fn start(self: &Arc<Self>) {
        let count = self.threading.worker_count();
        let mut handles = Vec::with_capacity(count);
        for worker_index in 0..count {
            let consumer = Arc::clone(self);
            let shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(consumer.run_worker(worker_index, shutdown)));
        }

        self.workers
            .lock()
            .expect("worker handle list lock poisoned")
            .extend(handles);

        tracing::info!(
            consumer_id = %self.consumer_id,
            workers = count,
            ordered = self.ordered,
            "consumer started"
        );
    }

    /// Signal all workers to stop pulling new work.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for every worker task to finish its in-flight message and exit.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .expect("worker handle list lock poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn run_worker(
        self: Arc<Self>,
        worker_index: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(
            consumer_id = %self.consumer_id,
            worker_index,
            "consumption worker started"
        );

        loop {
            // Shutdown is only honored between iterations, so an in-flight
            // handler always runs to completion and any held lease is
            // released on the normal path.
            match shutdown.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => break,
            }
            self.iteration().await;
        }

        tracing::info!(
            consumer_id = %self.consumer_id,
            worker_index,
            "consumption worker stopped"
        );
    }

    /// One pull-and-process cycle. Every await in here is time-bounded
    /// except the handler itself.
    async fn iteration(&self) {
        let lease = if self.ordered {
            match self.lock.acquire(self.lock_acquire_timeout).await {
                Ok(lease) => Some(lease),
                Err(QueueError::LockTimeout { .. }) => {
                    self.stats.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    self.on_store_error(&e).await;
                    return;
                }
            }
        } else {
            None
        };

        let record = match self.queue.dequeue(&self.consumer_id, self.dequeue_wait).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.release(lease).await;
                if self.dequeue_wait.is_zero() {
                    tokio::time::sleep(EMPTY_POLL_DELAY).await;
                }
                return;
            }
            Err(e) => {
                self.release(lease).await;
                self.on_store_error(&e).await;
                return;
            }
        };

        self.process(record, lease.as_ref()).await;
        self.release(lease).await;
    }

    async fn process(&self, record: MessageRecord, lease: Option<&Lease>) {
        // A record that cannot be decoded is terminal and non-retryable;
        // it is already out of the backlog.
        let message = match Message::from_record(&record, self.codec.as_ref()) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    consumer_id = %self.consumer_id,
                    error = %e,
                    "dropping undecodable message"
                );
                self.mark_dead();
                return;
            }
        };

        let started = Instant::now();
        let outcome = self.invoke_with_renewal(&message, lease).await;
        HANDLER_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    consumer_id = %self.consumer_id,
                    message_id = %message.id,
                    "message processed"
                );
            }
            Err(failure) => {
                self.handle_failure(record, &message, failure).await;
            }
        }
    }

    /// Run the handler; while it runs under an active lease, keep renewing
    /// on a cadence strictly shorter than the lease duration.
    async fn invoke_with_renewal(
        &self,
        message: &Message<T>,
        lease: Option<&Lease>,
    ) -> Result<(), HandlerFailure> {
        let lease = match lease {
            None => return self.handler.handle(message).await,
            Some(lease) => lease,
        };

        let handler = self.handler.handle(message);
        tokio::pin!(handler);

        let mut renew = tokio::time::interval(self.lock.renew_cadence());
        renew.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                outcome = &mut handler => return outcome,
                _ = renew.tick() => {
                    match self.lock.renew(lease).await {
                        Ok(true) => {}
                        Ok(false) => tracing::warn!(
                            key = %lease.key(),
                            "lease expired before renewal; another worker may proceed"
                        ),
                        Err(e) => tracing::warn!(
                            key = %lease.key(),
                            error = %e,
                            "lease renewal failed"
                        ),
                    }
                }
            }
        }
    }

    async fn handle_failure(
        &self,
        record: MessageRecord,
        message: &Message<T>,
        failure: HandlerFailure,
    ) {
        match failure {
            HandlerFailure::Recoverable(reason) => {
                if self.retry.should_retry(message.retry_count) {
                    let mut requeue = record;
                    requeue.set_retry_count(message.retry_count + 1);

                    match self.queue.enqueue(requeue, &self.consumer_id).await {
                        Ok(()) => {
                            self.stats.retried.fetch_add(1, Ordering::Relaxed);
                            MESSAGES_RETRIED_TOTAL.inc();
                            tracing::info!(
                                consumer_id = %self.consumer_id,
                                message_id = %message.id,
                                retry_count = message.retry_count + 1,
                                reason = %reason,
                                "message requeued for retry"
                            );
                        }
                        Err(e) => {
                            // The message left the backlog at dequeue; a
                            // failed requeue loses it. Surfaced, not
                            // retried at this layer.
                            tracing::error!(
                                consumer_id = %self.consumer_id,
                                message_id = %message.id,
                                error = %e,
                                "requeue failed, message lost"
                            );
                            self.mark_dead();
                        }
                    }
                } else {
                    tracing::error!(
                        consumer_id = %self.consumer_id,
                        message_id = %message.id,
                        retry_count = message.retry_count,
                        reason = %reason,
                        "retries exhausted, dropping message"
                    );
                    self.mark_dead();
                }
            }
            HandlerFailure::Fatal(reason) => {
                tracing::error!(
                    consumer_id = %self.consumer_id,
                    message_id = %message.id,
                    reason = %reason,
                    "non-recoverable handler failure, dropping message"
                );
                self.mark_dead();
            }
        }
    }

    fn mark_dead(&self) {
        self.stats.dead.fetch_add(1, Ordering::Relaxed);
        MESSAGES_DEAD_TOTAL.inc();
    }

    async fn release(&self, lease: Option<Lease>) {
        if let Some(lease) = lease {
            if let Err(e) = self.lock.release(lease).await {
                tracing::warn!(
                    consumer_id = %self.consumer_id,
                    error = %e,
                    "failed to release sequential lock"
                );
            }
        }
    }

    async fn on_store_error(&self, e: &QueueError) {
        self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            consumer_id = %self.consumer_id,
            error = %e,
            "store operation failed, backing off until next iteration"
        );
        tokio::time::sleep(STORE_ERROR_BACKOFF).await;
    }
}

/// Builder for [`MessageConsumer`].
pub struct ConsumerBuilder<T> {
    queue: Arc<MessageQueue>,
    codec: Arc<dyn PayloadCodec<T>>,
    handler: Arc<dyn MessageHandler<T>>,
    consumer_id: String,
    retry: RetryStrategy,
    threading: ThreadingStrategy,
    ordered: bool,
    dequeue_wait: Duration,
    lease_ttl: Duration,
    lock_acquire_timeout: Duration,
}

impl<T> ConsumerBuilder<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        queue: Arc<MessageQueue>,
        codec: Arc<dyn PayloadCodec<T>>,
        handler: Arc<dyn MessageHandler<T>>,
    ) -> Self {
        let consumer_id = queue.default_consumer_id().to_string();
        Self {
            queue,
            codec,
            handler,
            consumer_id,
            retry: RetryStrategy::default(),
            threading: ThreadingStrategy::default(),
            ordered: false,
            dequeue_wait: Duration::from_secs(1),
            lease_ttl: Duration::from_secs(30),
            lock_acquire_timeout: Duration::from_secs(5),
        }
    }

    pub fn consumer_id(mut self, consumer_id: &str) -> Self {
        self.consumer_id = consumer_id.to_string();
        self
    }

    pub fn retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    pub fn threading(mut self, threading: ThreadingStrategy) -> Self {
        self.threading = threading;
        self
    }

    pub fn ordered_processing(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn dequeue_wait(mut self, wait: Duration) -> Self {
        self.dequeue_wait = wait;
        self
    }

    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquire_timeout = timeout;
        self
    }

    pub fn build(self) -> Arc<MessageConsumer<T>> {
        let lock = SequentialLock::new(
            self.queue.store(),
            self.queue.lock_key(&self.consumer_id),
            self.lease_ttl,
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(MessageConsumer {
            queue: self.queue,
            codec: self.codec,
            handler: self.handler,
            consumer_id: self.consumer_id,
            retry: self.retry,
            threading: self.threading,
            ordered: self.ordered,
            dequeue_wait: self.dequeue_wait,
            lock_acquire_timeout: self.lock_acquire_timeout,
            lock,
            stats: ConsumerStats::default(),
            shutdown_tx,
            workers: std::sync::Mutex::new(Vec::new()),
        })
    }
}
