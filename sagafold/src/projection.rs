//! Version-gated projection of events into read-model documents.
//!
//! Each document remembers the stream position it last processed. An incoming
//! event is applied only when its version is exactly the next position;
//! anything at or below the checkpoint is a recorded duplicate and skipped,
//! and anything further ahead is a gap that is retried on a bounded schedule
//! until an earlier delivery closes it or the budget runs out. Exhaustion is
//! reported as [`ProjectionError::Stalled`] with the document untouched,
//! never a silent skip and never a corrupting out-of-order apply.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{DocumentStoreError, DocumentStoreResult, ProjectionError, ProjectionResult};
use crate::event_log::StoredEvent;
use crate::retry::RetryConfig;
use crate::router::EventSubscriber;
use crate::types::CurrentVersion;

/// A read-model document together with its processing checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedDocument<M> {
    /// The document body.
    pub body: M,
    /// The position of the last event folded into the body.
    /// [`CurrentVersion::NoStream`] means no event has been applied yet.
    pub last_processed: CurrentVersion,
}

impl<M> TrackedDocument<M> {
    /// Wraps a body with its checkpoint.
    pub const fn new(body: M, last_processed: CurrentVersion) -> Self {
        Self {
            body,
            last_processed,
        }
    }
}

impl<M: Default> TrackedDocument<M> {
    /// A document that has processed nothing.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            body: M::default(),
            last_processed: CurrentVersion::NoStream,
        }
    }
}

impl<M: Default> Default for TrackedDocument<M> {
    fn default() -> Self {
        Self::zero()
    }
}

/// Maps events of one stream family onto one read-model document type.
///
/// Implementations are stateless type-level descriptions, like deciders. The
/// `apply` function is pure over `(document, event)`; all ordering and
/// duplicate concerns are handled by the [`ProjectionApplier`] around it.
pub trait Projection {
    /// The event payload this projection consumes.
    type Event;
    /// The document body this projection maintains.
    type Document: Default + Clone + Send + Sync;

    /// Which document an event belongs to, or `None` when the projection
    /// does not care about this event.
    fn document_id(event: &StoredEvent<Self::Event>) -> Option<String>;

    /// Folds one event into the document body.
    fn apply(document: &mut Self::Document, event: &StoredEvent<Self::Event>);
}

/// Storage for tracked documents with conditional, checkpoint-gated writes.
///
/// The conditional `store` is what makes concurrent appliers safe: two
/// workers applying the same event race on the checkpoint, one wins, the
/// other observes [`DocumentStoreError::PositionConflict`], re-reads, and
/// finds the event already recorded.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// The document body type this store holds.
    type Document: Send + Sync;

    /// Reads a document, or `None` when it has never been written.
    async fn get(&self, id: &str) -> DocumentStoreResult<Option<TrackedDocument<Self::Document>>>;

    /// Writes a document if its stored checkpoint still equals
    /// `expected_prior`. An absent document matches
    /// [`CurrentVersion::NoStream`].
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::PositionConflict`] when the checkpoint
    /// moved since the caller read it.
    async fn store(
        &self,
        id: &str,
        document: TrackedDocument<Self::Document>,
        expected_prior: CurrentVersion,
    ) -> DocumentStoreResult<()>;

    /// Removes a document. Returns whether it existed.
    async fn delete(&self, id: &str) -> DocumentStoreResult<bool>;
}

/// Drives one [`Projection`] against one [`DocumentStore`], enforcing the
/// version gate.
pub struct ProjectionApplier<S, P> {
    store: Arc<S>,
    retry: RetryConfig,
    _projection: PhantomData<P>,
}

impl<S, P> Clone for ProjectionApplier<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry.clone(),
            _projection: PhantomData,
        }
    }
}

impl<S, P> ProjectionApplier<S, P>
where
    S: DocumentStore<Document = P::Document>,
    P: Projection,
    P::Event: Send + Sync,
{
    /// Creates an applier with the default retry budget.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_retry(store, RetryConfig::default())
    }

    /// Creates an applier with an explicit retry budget for gap waits.
    pub fn with_retry(store: Arc<S>, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            _projection: PhantomData,
        }
    }

    /// Applies one event to its document.
    ///
    /// Duplicates (event version at or below the checkpoint) are skipped and
    /// succeed. A gap (event version more than one ahead) waits on the retry
    /// schedule for earlier deliveries to close it.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Stalled`] when the gap never closed within the
    ///   retry budget. The document is left exactly as it was.
    /// - [`ProjectionError::DocumentStore`] on storage faults other than
    ///   checkpoint races, which are absorbed by re-reading.
    pub async fn apply_event(&self, event: &StoredEvent<P::Event>) -> ProjectionResult<()> {
        let Some(id) = P::document_id(event) else {
            return Ok(());
        };

        let mut attempts = 0;
        for (attempt, delay) in self.retry.schedule() {
            attempts = attempt + 1;

            let tracked = self
                .store
                .get(&id)
                .await?
                .unwrap_or_else(TrackedDocument::zero);

            if tracked.last_processed.has_seen(event.version) {
                debug!(
                    document = %id,
                    position = %event.version,
                    "event already processed, skipping"
                );
                return Ok(());
            }

            if tracked.last_processed.next() == event.version {
                let prior = tracked.last_processed;
                let mut body = tracked.body;
                P::apply(&mut body, event);
                let updated = TrackedDocument::new(body, CurrentVersion::At(event.version));

                match self.store.store(&id, updated, prior).await {
                    Ok(()) => {
                        debug!(document = %id, position = %event.version, "document advanced");
                        return Ok(());
                    }
                    // A concurrent applier moved the checkpoint between our
                    // read and write; re-read and re-evaluate the gate.
                    Err(DocumentStoreError::PositionConflict { .. }) => {}
                    Err(other) => return Err(other.into()),
                }
            } else if let Some(delay) = delay {
                debug!(
                    document = %id,
                    position = %event.version,
                    checkpoint = %tracked.last_processed,
                    "event ahead of checkpoint, waiting for the gap to close"
                );
                tokio::time::sleep(delay).await;
            }
        }

        warn!(
            document = %id,
            position = %event.version,
            attempts,
            "projection stalled, document left untouched"
        );
        Err(ProjectionError::Stalled {
            document: id,
            position: event.version,
            attempts,
        })
    }
}

#[async_trait]
impl<S, P> EventSubscriber<P::Event> for ProjectionApplier<S, P>
where
    S: DocumentStore<Document = P::Document>,
    P: Projection + Send + Sync,
    P::Event: Send + Sync,
{
    async fn on_event(
        &self,
        event: &StoredEvent<P::Event>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.apply_event(event).await.map_err(Into::into)
    }
}
