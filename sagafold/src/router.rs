//! The subscription seam between the event log and everything that reacts to
//! recorded events.
//!
//! Subscribers receive stored events with at-least-once semantics; every
//! implementation must therefore be idempotent with respect to redelivery.
//! Projection appliers and process-manager feeds both sit behind this trait,
//! which lets an in-process router, a polling catch-up reader, or a broker
//! bridge fan events out without the subscribers knowing the difference.

use crate::event_log::StoredEvent;
use async_trait::async_trait;

/// Receives recorded events, at least once each, in per-stream order.
///
/// Generic over the event payload rather than using an associated type so a
/// router can hold a heterogeneous `Vec<Arc<dyn EventSubscriber<E>>>` for one
/// payload type.
#[async_trait]
pub trait EventSubscriber<E>: Send + Sync {
    /// Handles one delivered event.
    ///
    /// # Errors
    ///
    /// A subscriber error signals that this delivery failed and may be
    /// retried; it must not poison the subscriber for later deliveries.
    async fn on_event(
        &self,
        event: &StoredEvent<E>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
