//! In-memory adapters for the `sagafold` decision core
//!
//! This crate provides in-memory implementations of the `EventLog` and
//! `DocumentStore` traits plus a same-process event router, useful for
//! testing and development scenarios where persistence is not required.
//!
//! All adapters are cheaply cloneable handles over shared storage, so a test
//! can hand the same log to a command handler, a process handler, and an
//! assertion at the end.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use sagafold::errors::{DocumentStoreError, DocumentStoreResult, EventLogError, EventLogResult};
use sagafold::event_log::{
    EventLog, EventToWrite, ExpectedVersion, ReadOptions, StoredEvent, StreamData,
};
use sagafold::projection::{DocumentStore, TrackedDocument};
use sagafold::router::EventSubscriber;
use sagafold::types::{CurrentVersion, StreamId, StreamVersion, Timestamp};

/// Thread-safe in-memory event log for testing.
pub struct InMemoryEventLog<E>
where
    E: Send + Sync + Clone + 'static,
{
    // Maps stream IDs to their stored events; the stream version is the
    // version of the last stored event.
    streams: Arc<RwLock<HashMap<StreamId, Vec<StoredEvent<E>>>>>,
}

impl<E> InMemoryEventLog<E>
where
    E: Send + Sync + Clone + 'static,
{
    /// Create a new empty in-memory event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn current(events: &[StoredEvent<E>]) -> CurrentVersion {
        events
            .last()
            .map_or(CurrentVersion::NoStream, |event| {
                CurrentVersion::At(event.version)
            })
    }

    /// All stored events across every stream, ordered by event id (UUIDv7,
    /// so creation order). Useful for feeding a router in tests.
    #[must_use]
    pub fn all_events(&self) -> Vec<StoredEvent<E>> {
        let streams = self.streams.read().expect("RwLock poisoned");
        let mut events: Vec<_> = streams.values().flatten().cloned().collect();
        events.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        events
    }
}

impl<E> Clone for InMemoryEventLog<E>
where
    E: Send + Sync + Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            streams: Arc::clone(&self.streams),
        }
    }
}

impl<E> Default for InMemoryEventLog<E>
where
    E: Send + Sync + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EventLog for InMemoryEventLog<E>
where
    E: Send + Sync + Clone + 'static,
{
    type Event = E;

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        options: &ReadOptions,
    ) -> EventLogResult<StreamData<Self::Event>> {
        let streams = self.streams.read().expect("RwLock poisoned");

        let Some(stream) = streams.get(stream_id) else {
            return Ok(StreamData::absent());
        };

        let mut events = Vec::new();
        for event in stream {
            if let Some(from_version) = options.from_version {
                if event.version < from_version {
                    continue;
                }
            }
            if let Some(to_version) = options.to_version {
                if event.version > to_version {
                    continue;
                }
            }
            events.push(event.clone());
        }

        if let Some(max_events) = options.max_events {
            events.truncate(max_events);
        }

        // The observed version covers the whole stream, not the filtered
        // range, so it stays valid as an append condition.
        Ok(StreamData::new(events, Self::current(stream)))
    }

    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        events: Vec<EventToWrite<Self::Event>>,
    ) -> EventLogResult<StreamVersion> {
        if events.is_empty() {
            return Err(EventLogError::Internal(
                "cannot append an empty event batch".to_string(),
            ));
        }

        let mut streams = self.streams.write().expect("RwLock poisoned");
        let stream = streams.entry(stream_id.clone()).or_default();

        let current = Self::current(stream);
        if !expected.matches(current) {
            return Err(EventLogError::VersionConflict {
                stream: stream_id.clone(),
                expected,
                actual: current,
            });
        }

        let mut version = current.next();
        let mut last = version;
        for event in events {
            last = version;
            stream.push(StoredEvent::new(
                event.event_id,
                stream_id.clone(),
                version,
                Timestamp::now(),
                event.payload,
            ));
            version = version.next();
        }

        Ok(last)
    }

    async fn read_last(
        &self,
        stream_id: &StreamId,
    ) -> EventLogResult<Option<StoredEvent<Self::Event>>> {
        let streams = self.streams.read().expect("RwLock poisoned");
        Ok(streams.get(stream_id).and_then(|events| events.last().cloned()))
    }

    async fn stream_version(&self, stream_id: &StreamId) -> EventLogResult<CurrentVersion> {
        let streams = self.streams.read().expect("RwLock poisoned");
        Ok(streams
            .get(stream_id)
            .map_or(CurrentVersion::NoStream, |events| Self::current(events)))
    }
}

/// Thread-safe in-memory document store for testing.
pub struct InMemoryDocumentStore<M>
where
    M: Send + Sync + Clone + 'static,
{
    documents: Arc<RwLock<HashMap<String, TrackedDocument<M>>>>,
}

impl<M> InMemoryDocumentStore<M>
where
    M: Send + Sync + Clone + 'static,
{
    /// Create a new empty in-memory document store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<M> Clone for InMemoryDocumentStore<M>
where
    M: Send + Sync + Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            documents: Arc::clone(&self.documents),
        }
    }
}

impl<M> Default for InMemoryDocumentStore<M>
where
    M: Send + Sync + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M> DocumentStore for InMemoryDocumentStore<M>
where
    M: Send + Sync + Clone + 'static,
{
    type Document = M;

    async fn get(&self, id: &str) -> DocumentStoreResult<Option<TrackedDocument<M>>> {
        let documents = self.documents.read().expect("RwLock poisoned");
        Ok(documents.get(id).cloned())
    }

    async fn store(
        &self,
        id: &str,
        document: TrackedDocument<M>,
        expected_prior: CurrentVersion,
    ) -> DocumentStoreResult<()> {
        let mut documents = self.documents.write().expect("RwLock poisoned");

        // The checkpoint comparison and the write happen under one lock, so
        // two racing appliers cannot both advance the same document.
        let actual = documents
            .get(id)
            .map_or(CurrentVersion::NoStream, |doc| doc.last_processed);
        if actual != expected_prior {
            return Err(DocumentStoreError::PositionConflict {
                id: id.to_string(),
                expected: expected_prior,
                actual,
            });
        }

        documents.insert(id.to_string(), document);
        Ok(())
    }

    async fn delete(&self, id: &str) -> DocumentStoreResult<bool> {
        let mut documents = self.documents.write().expect("RwLock poisoned");
        Ok(documents.remove(id).is_some())
    }
}

/// Same-process event router delivering stored events to registered
/// subscribers with at-least-once semantics.
///
/// Delivery is sequential and in registration order. A failing subscriber is
/// logged and skipped for that event; it does not block the remaining
/// subscribers, and the caller may redeliver the event later.
pub struct InMemoryRouter<E> {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber<E>>>>,
}

impl<E> InMemoryRouter<E>
where
    E: Send + Sync + 'static,
{
    /// Create a router with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register a subscriber for all future deliveries.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber<E>>) {
        self.subscribers
            .write()
            .expect("RwLock poisoned")
            .push(subscriber);
    }

    /// Deliver one event to every subscriber. Calling this twice with the
    /// same event models redelivery; subscribers must tolerate it.
    pub async fn publish(&self, event: &StoredEvent<E>) {
        // Snapshot the subscriber list so no lock is held across awaits.
        let subscribers: Vec<_> = self
            .subscribers
            .read()
            .expect("RwLock poisoned")
            .iter()
            .map(Arc::clone)
            .collect();

        for subscriber in subscribers {
            if let Err(err) = subscriber.on_event(event).await {
                warn!(
                    stream = %event.stream_id,
                    version = %event.version,
                    error = %err,
                    "subscriber failed to handle event"
                );
            }
        }
    }

    /// Deliver a batch of events in order.
    pub async fn publish_all(&self, events: &[StoredEvent<E>]) {
        for event in events {
            self.publish(event).await;
        }
    }
}

impl<E> Default for InMemoryRouter<E>
where
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagafold::types::{EventId, StreamVersion};
    use std::sync::Mutex;

    fn stream(name: &str) -> StreamId {
        StreamId::try_new(name).unwrap()
    }

    fn write(payload: &str) -> EventToWrite<String> {
        EventToWrite::new(payload.to_string())
    }

    #[tokio::test]
    async fn new_log_reports_absent_streams() {
        let log: InMemoryEventLog<String> = InMemoryEventLog::new();
        let data = log
            .read_stream(&stream("test-stream"), &ReadOptions::all())
            .await
            .unwrap();
        assert!(data.is_empty());
        assert_eq!(data.current, CurrentVersion::NoStream);
        assert_eq!(
            log.stream_version(&stream("test-stream")).await.unwrap(),
            CurrentVersion::NoStream
        );
    }

    #[tokio::test]
    async fn clone_shares_storage() {
        let log1: InMemoryEventLog<String> = InMemoryEventLog::new();
        let log2 = log1.clone();

        log1.append_to_stream(&stream("s"), ExpectedVersion::NoStream, vec![write("e")])
            .await
            .unwrap();

        assert_eq!(
            log2.stream_version(&stream("s")).await.unwrap(),
            CurrentVersion::At(StreamVersion::initial())
        );
    }

    #[tokio::test]
    async fn first_append_lands_at_version_zero() {
        let log: InMemoryEventLog<String> = InMemoryEventLog::new();
        let version = log
            .append_to_stream(&stream("s"), ExpectedVersion::NoStream, vec![write("e")])
            .await
            .unwrap();
        assert_eq!(version, StreamVersion::initial());
    }

    #[tokio::test]
    async fn batch_append_assigns_contiguous_versions() {
        let log: InMemoryEventLog<String> = InMemoryEventLog::new();
        let batch: Vec<_> = (0..5).map(|i| write(&format!("event-{i}"))).collect();
        let version = log
            .append_to_stream(&stream("s"), ExpectedVersion::NoStream, batch)
            .await
            .unwrap();
        assert_eq!(version, StreamVersion::new(4));

        let data = log.read_stream(&stream("s"), &ReadOptions::all()).await.unwrap();
        for (i, event) in data.events.iter().enumerate() {
            assert_eq!(event.version, StreamVersion::new(i as u64));
            assert_eq!(event.payload, format!("event-{i}"));
        }
    }

    #[tokio::test]
    async fn conditional_append_enforces_the_expected_version() {
        let log: InMemoryEventLog<String> = InMemoryEventLog::new();
        log.append_to_stream(&stream("s"), ExpectedVersion::NoStream, vec![write("e1")])
            .await
            .unwrap();

        // Stale condition loses.
        let err = log
            .append_to_stream(&stream("s"), ExpectedVersion::NoStream, vec![write("e2")])
            .await
            .unwrap_err();
        assert!(matches!(err, EventLogError::VersionConflict { .. }));

        let err = log
            .append_to_stream(
                &stream("s"),
                ExpectedVersion::Exact(StreamVersion::new(7)),
                vec![write("e2")],
            )
            .await
            .unwrap_err();
        match err {
            EventLogError::VersionConflict { expected, actual, .. } => {
                assert_eq!(expected, ExpectedVersion::Exact(StreamVersion::new(7)));
                assert_eq!(actual, CurrentVersion::At(StreamVersion::initial()));
            }
            other => panic!("expected VersionConflict, got {other:?}"),
        }

        // Fresh condition wins.
        let version = log
            .append_to_stream(
                &stream("s"),
                ExpectedVersion::Exact(StreamVersion::initial()),
                vec![write("e2")],
            )
            .await
            .unwrap();
        assert_eq!(version, StreamVersion::new(1));
    }

    #[tokio::test]
    async fn losing_append_leaves_the_stream_unchanged() {
        let log: InMemoryEventLog<String> = InMemoryEventLog::new();
        log.append_to_stream(&stream("s"), ExpectedVersion::NoStream, vec![write("e1")])
            .await
            .unwrap();

        let _ = log
            .append_to_stream(
                &stream("s"),
                ExpectedVersion::NoStream,
                vec![write("e2"), write("e3")],
            )
            .await
            .unwrap_err();

        let data = log.read_stream(&stream("s"), &ReadOptions::all()).await.unwrap();
        assert_eq!(data.events.len(), 1);
        assert_eq!(data.current, CurrentVersion::At(StreamVersion::initial()));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let log: InMemoryEventLog<String> = InMemoryEventLog::new();
        let err = log
            .append_to_stream(&stream("s"), ExpectedVersion::NoStream, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, EventLogError::Internal(_)));
    }

    #[tokio::test]
    async fn read_options_filter_by_version_range_and_count() {
        let log: InMemoryEventLog<String> = InMemoryEventLog::new();
        let batch: Vec<_> = (0..6).map(|i| write(&format!("event-{i}"))).collect();
        log.append_to_stream(&stream("s"), ExpectedVersion::NoStream, batch)
            .await
            .unwrap();

        let options = ReadOptions::all()
            .from_version(StreamVersion::new(1))
            .to_version(StreamVersion::new(4))
            .max_events(3);
        let data = log.read_stream(&stream("s"), &options).await.unwrap();

        let versions: Vec<_> = data.events.iter().map(|e| e.version.value()).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        // The observed version still covers the full stream.
        assert_eq!(data.current, CurrentVersion::At(StreamVersion::new(5)));
    }

    #[tokio::test]
    async fn read_last_returns_the_newest_event() {
        let log: InMemoryEventLog<String> = InMemoryEventLog::new();
        assert!(log.read_last(&stream("s")).await.unwrap().is_none());

        log.append_to_stream(
            &stream("s"),
            ExpectedVersion::NoStream,
            vec![write("e1"), write("e2")],
        )
        .await
        .unwrap();

        let last = log.read_last(&stream("s")).await.unwrap().unwrap();
        assert_eq!(last.payload, "e2");
        assert_eq!(last.version, StreamVersion::new(1));
    }

    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct Deposited {
        account: String,
        amount: u64,
    }

    #[tokio::test]
    async fn typed_payloads_keep_their_position_metadata_through_serialization() {
        let log: InMemoryEventLog<Deposited> = InMemoryEventLog::new();
        log.append_to_stream(
            &stream("acct-1"),
            ExpectedVersion::NoStream,
            vec![
                EventToWrite::new(Deposited {
                    account: "acct-1".to_string(),
                    amount: 100,
                }),
                EventToWrite::new(Deposited {
                    account: "acct-1".to_string(),
                    amount: 35,
                }),
            ],
        )
        .await
        .unwrap();

        // Stored events are what a persistent adapter would write out, so
        // the payload and its position metadata must survive serialization
        // together.
        let last = log.read_last(&stream("acct-1")).await.unwrap().unwrap();
        let json = serde_json::to_string(&last).unwrap();
        let restored: StoredEvent<Deposited> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.version, StreamVersion::new(1));
        assert_eq!(restored.payload.amount, 35);
        assert_eq!(restored, last);
    }

    #[tokio::test]
    async fn document_store_gates_writes_on_the_checkpoint() {
        let store: InMemoryDocumentStore<u64> = InMemoryDocumentStore::new();

        store
            .store(
                "doc",
                TrackedDocument::new(10, CurrentVersion::At(StreamVersion::new(0))),
                CurrentVersion::NoStream,
            )
            .await
            .unwrap();

        // A writer that still thinks the document is fresh loses.
        let err = store
            .store(
                "doc",
                TrackedDocument::new(99, CurrentVersion::At(StreamVersion::new(0))),
                CurrentVersion::NoStream,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::PositionConflict { .. }));

        let doc = store.get("doc").await.unwrap().unwrap();
        assert_eq!(doc.body, 10);
    }

    #[tokio::test]
    async fn document_delete_reports_existence() {
        let store: InMemoryDocumentStore<u64> = InMemoryDocumentStore::new();
        store
            .store(
                "doc",
                TrackedDocument::new(1, CurrentVersion::At(StreamVersion::new(0))),
                CurrentVersion::NoStream,
            )
            .await
            .unwrap();

        assert!(store.delete("doc").await.unwrap());
        assert!(!store.delete("doc").await.unwrap());
        assert!(store.get("doc").await.unwrap().is_none());
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl EventSubscriber<String> for Recorder {
        async fn on_event(
            &self,
            event: &StoredEvent<String>,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if self.fail {
                return Err("subscriber down".into());
            }
            self.seen.lock().unwrap().push(event.payload.clone());
            Ok(())
        }
    }

    fn stored(payload: &str, version: u64) -> StoredEvent<String> {
        StoredEvent::new(
            EventId::new(),
            stream("s"),
            StreamVersion::new(version),
            Timestamp::now(),
            payload.to_string(),
        )
    }

    #[tokio::test]
    async fn router_delivers_to_every_subscriber_in_order() {
        let router: InMemoryRouter<String> = InMemoryRouter::new();
        let first = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let second = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        router.subscribe(first.clone());
        router.subscribe(second.clone());

        router
            .publish_all(&[stored("e1", 0), stored("e2", 1)])
            .await;

        assert_eq!(*first.seen.lock().unwrap(), vec!["e1", "e2"]);
        assert_eq!(*second.seen.lock().unwrap(), vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_the_others() {
        let router: InMemoryRouter<String> = InMemoryRouter::new();
        let broken = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let healthy = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        router.subscribe(broken);
        router.subscribe(healthy.clone());

        router.publish(&stored("e1", 0)).await;

        assert_eq!(*healthy.seen.lock().unwrap(), vec!["e1"]);
    }
}
