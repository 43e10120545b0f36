//! Common test utilities for herald-events integration tests.
//!
//! Fakes for every collaborator of the delivery pipeline, so the handler,
//! policy and dead-letter paths can be exercised without a broker or a
//! database.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use herald_events::idempotence::{CreateProcessedEvent, ProcessedEvent};
use herald_events::message::{MESSAGE_ID_HEADER, TYPE_ID_HEADER};
use herald_events::{
    DeadLetterPublisher, DeadLetterRecord, DeliveryPipeline, DispatchError, DispatchReceipt,
    Event, EventError, EventHandler, IdempotencyStore, InboundMessage, MemoryIdempotencyStore,
    NotificationDispatcher, PipelineEvent, PipelineObserver, ProductCreated, RetryPolicy,
    StoreError, StoreTransaction,
};
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub const TOPIC: &str = "products-created-events-topic";
pub const DEAD_LETTER_TOPIC: &str = "products-created-events-topic-dlt";

/// A product-created event.
pub fn product(product_id: &str) -> ProductCreated {
    ProductCreated {
        product_id: product_id.to_string(),
        title: format!("Product {product_id}"),
        price: Decimal::new(1999, 2),
        quantity: 3,
    }
}

/// A well-formed inbound message carrying `product(product_id)`.
pub fn product_message(message_id: &str, product_id: &str) -> InboundMessage {
    let payload = serde_json::to_vec(&product(product_id)).unwrap();
    InboundMessage::new(TOPIC, payload)
        .at(0, 42)
        .with_key(product_id)
        .with_header(MESSAGE_ID_HEADER, message_id)
        .with_header(TYPE_ID_HEADER, ProductCreated::EVENT_TYPE)
}

fn receipt() -> DispatchReceipt {
    DispatchReceipt {
        status: 200,
        body: "ok".to_string(),
    }
}

// ---------------------------------------------------------------------------
// ScriptedDispatcher - plays back a list of outcomes
// ---------------------------------------------------------------------------

/// Dispatcher returning scripted outcomes, then success once the script runs
/// out.
#[derive(Clone, Default)]
pub struct ScriptedDispatcher {
    script: Arc<Mutex<VecDeque<Result<DispatchReceipt, DispatchError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl ScriptedDispatcher {
    /// Always succeeds.
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Fails with `error` `times` times, then succeeds.
    pub fn failing(error: DispatchError, times: usize) -> Self {
        let script = (0..times).map(|_| Err(error.clone())).collect();
        Self {
            script: Arc::new(Mutex::new(script)),
            ..Self::default()
        }
    }

    /// Plays back `outcomes` in order, then succeeds.
    pub fn scripted(outcomes: Vec<Result<DispatchReceipt, DispatchError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(outcomes.into())),
            ..Self::default()
        }
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Message ids dispatched, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationDispatcher<ProductCreated> for ScriptedDispatcher {
    async fn dispatch(
        &self,
        message_id: &str,
        _event: &ProductCreated,
    ) -> Result<DispatchReceipt, DispatchError> {
        self.calls.lock().unwrap().push(message_id.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(receipt()))
    }
}

// ---------------------------------------------------------------------------
// RecordingPublisher - captures dead-letter records
// ---------------------------------------------------------------------------

/// Dead-letter publisher that keeps what it was given.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<(String, DeadLetterRecord)>>>,
    failures_left: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every publish fails.
    pub fn broken() -> Self {
        Self::flaky(usize::MAX)
    }

    /// Fails `times` publishes, then succeeds.
    pub fn flaky(times: usize) -> Self {
        Self {
            failures_left: Arc::new(AtomicUsize::new(times)),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(String, DeadLetterRecord)> {
        self.published.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    /// Publish calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeadLetterPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, record: &DeadLetterRecord) -> Result<(), EventError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EventError::PublishFailed {
                topic: topic.to_string(),
                cause: "broker unavailable".to_string(),
            });
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), record.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingObserver - captures pipeline events
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&PipelineEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl PipelineObserver for RecordingObserver {
    fn observe(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ---------------------------------------------------------------------------
// CountingStore - memory store that counts lookups and saves
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StoreCalls {
    pub finds: AtomicUsize,
    pub saves: AtomicUsize,
    pub saved: Mutex<Vec<CreateProcessedEvent>>,
}

/// [`MemoryIdempotencyStore`] wrapper recording every call.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryIdempotencyStore,
    pub calls: Arc<StoreCalls>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finds(&self) -> usize {
        self.calls.finds.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.calls.saves.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Vec<CreateProcessedEvent> {
        self.calls.saved.lock().unwrap().clone()
    }
}

pub struct CountingTransaction {
    inner: <MemoryIdempotencyStore as IdempotencyStore>::Transaction,
    calls: Arc<StoreCalls>,
}

#[async_trait]
impl IdempotencyStore for CountingStore {
    type Transaction = CountingTransaction;

    async fn begin(&self) -> Result<CountingTransaction, StoreError> {
        Ok(CountingTransaction {
            inner: self.inner.begin().await?,
            calls: Arc::clone(&self.calls),
        })
    }
}

#[async_trait]
impl StoreTransaction for CountingTransaction {
    async fn find_by_message_id(
        &mut self,
        message_id: &str,
    ) -> Result<Option<ProcessedEvent>, StoreError> {
        self.calls.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_message_id(message_id).await
    }

    async fn save(&mut self, record: CreateProcessedEvent) -> Result<ProcessedEvent, StoreError> {
        self.calls.saves.fetch_add(1, Ordering::SeqCst);
        self.calls.saved.lock().unwrap().push(record.clone());
        self.inner.save(record).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

// ---------------------------------------------------------------------------
// Pipeline builder
// ---------------------------------------------------------------------------

pub type TestPipeline<S, D> = DeliveryPipeline<ProductCreated, S, D, RecordingPublisher>;

/// Pipeline over the given fakes with a short backoff and three redeliveries.
pub fn pipeline<S, D>(
    store: S,
    dispatcher: D,
    publisher: RecordingPublisher,
    observer: Arc<RecordingObserver>,
) -> TestPipeline<S, D>
where
    S: IdempotencyStore,
    D: NotificationDispatcher<ProductCreated>,
{
    let handler = EventHandler::new(Arc::new(store), Arc::new(dispatcher)).with_observer(observer);
    DeliveryPipeline::new(
        handler,
        Arc::new(publisher),
        RetryPolicy::new(Duration::from_millis(100), 3),
        DEAD_LETTER_TOPIC,
    )
}
