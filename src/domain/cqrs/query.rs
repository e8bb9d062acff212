//! CQRS query handlers for the case aggregate.
//!
//! The CaseQuery applies events to the CaseView projection and broadcasts
//! them to subscribers via tokio channels. The TimerQuery forwards timer
//! intents to a timer substrate, and the DebugLogQuery copies committed
//! events into the structured debug log.

use super::{CaseAggregate, CaseEvent};
use crate::domain::timer::TimerSubstrate;
use crate::domain::types::CaseId;
use crate::domain::view::{CaseEventEnvelope, CaseView};
use crate::structured_logger::StructuredLogger;
use async_trait::async_trait;
use cqrs_es::{EventEnvelope, Query};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};

/// CQRS query handler that maintains the CaseView projection.
pub struct CaseQuery {
    /// In-memory projection of the case state.
    pub projection: Arc<RwLock<CaseView>>,
    /// Watch channel for snapshot updates (latest view).
    pub snapshot_tx: watch::Sender<CaseView>,
    /// Broadcast channel for event streaming.
    pub event_tx: broadcast::Sender<CaseEventEnvelope>,
}

impl CaseQuery {
    pub fn new(
        projection: Arc<RwLock<CaseView>>,
        snapshot_tx: watch::Sender<CaseView>,
        event_tx: broadcast::Sender<CaseEventEnvelope>,
    ) -> Self {
        Self {
            projection,
            snapshot_tx,
            event_tx,
        }
    }
}

#[async_trait]
impl Query<CaseAggregate> for CaseQuery {
    async fn dispatch(&self, aggregate_id: &str, events: &[EventEnvelope<CaseAggregate>]) {
        let mut view = self.projection.write().await;

        for event in events {
            view.apply_event(aggregate_id, &event.payload, event.sequence as u64);

            // No receivers is normal when nobody subscribed.
            if self.event_tx.receiver_count() > 0 {
                if let Err(e) = self.event_tx.send(CaseEventEnvelope::from(event)) {
                    tracing::warn!("Failed to broadcast event: {:?}", e);
                }
            }
        }

        let _ = self.snapshot_tx.send(view.clone());
    }
}

/// Forwards `TimerSet` and `TimerCanceled` to the substrate once committed.
pub struct TimerQuery {
    substrate: Arc<dyn TimerSubstrate>,
}

impl TimerQuery {
    pub fn new(substrate: Arc<dyn TimerSubstrate>) -> Self {
        Self { substrate }
    }
}

#[async_trait]
impl Query<CaseAggregate> for TimerQuery {
    async fn dispatch(&self, aggregate_id: &str, events: &[EventEnvelope<CaseAggregate>]) {
        let case_id = CaseId::from(aggregate_id);
        for event in events {
            match &event.payload {
                CaseEvent::TimerSet {
                    plan_item_id,
                    moment,
                } => self.substrate.schedule(&case_id, plan_item_id, *moment),
                CaseEvent::TimerCanceled { plan_item_id } => {
                    self.substrate.cancel(&case_id, plan_item_id)
                }
                _ => {}
            }
        }
    }
}

pub struct DebugLogQuery {
    logger: Arc<StructuredLogger>,
}

impl DebugLogQuery {
    pub fn new(logger: Arc<StructuredLogger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Query<CaseAggregate> for DebugLogQuery {
    async fn dispatch(&self, _aggregate_id: &str, events: &[EventEnvelope<CaseAggregate>]) {
        for event in events {
            self.logger.log_event(event.sequence as u64, &event.payload);
        }
    }
}

#[cfg(test)]
#[path = "../tests/query_tests.rs"]
mod tests;
