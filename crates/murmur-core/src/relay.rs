//! Delivery of queued envelopes.
//!
//! Each cycle picks a random sample of the queue, keeps at most one event per
//! destination and hands each to its own task. A destination is held by at
//! most one task at a time, and its backoff state decides whether this cycle
//! may attempt it at all.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use murmur_shared::Endpoint;
use murmur_store::{Database, QueuedEvent};

use crate::backoff;
use crate::error::Result;
use crate::registry::{LockRegistry, Spawned};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Accepted by the destination and removed from the queue.
    Delivered,
    /// The destination is backing off; the event stays queued.
    Deferred,
    /// The destination can never be reached; the event was discarded.
    Dropped,
    /// The attempt failed; the event stays queued.
    Failed,
}

#[derive(Clone)]
pub struct RelayEngine {
    db: Arc<Database>,
    transport: Arc<dyn Transport>,
    locks: LockRegistry,
    batch_size: u32,
    interval: Duration,
}

impl RelayEngine {
    pub fn new(
        db: Arc<Database>,
        transport: Arc<dyn Transport>,
        batch_size: u32,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            transport,
            locks: LockRegistry::new(),
            batch_size,
            interval,
        }
    }

    /// Queue an already sealed payload.
    pub fn enqueue(&self, body: &[u8], endpoint: &Endpoint) -> Result<QueuedEvent> {
        Ok(self.db.enqueue_event(body, endpoint)?)
    }

    /// Run one relay cycle. Returns the spawned delivery tasks; the caller
    /// may await them or let them finish in the background.
    pub fn drain_once(&self) -> Result<Spawned<RelayOutcome>> {
        let events = self.db.random_queued_events(self.batch_size)?;
        let mut seen = HashSet::new();
        let mut handles = Vec::new();

        for event in events {
            let key = event.endpoint.as_str().to_string();
            if !seen.insert(key.clone()) {
                continue;
            }
            let Some(guard) = self.locks.try_acquire(&key) else {
                tracing::trace!(endpoint = %key, "Destination busy, skipping");
                continue;
            };

            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                let queue_id = event.id;
                match engine.relay(event).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(queue_id, error = %e, "Relay attempt failed");
                        RelayOutcome::Failed
                    }
                }
            }));
        }

        Ok(Spawned::new(handles))
    }

    /// Attempt one queued event. Callers must hold the destination lock.
    pub async fn relay(&self, mut event: QueuedEvent) -> Result<RelayOutcome> {
        self.db.record_relay_attempt(&mut event, Utc::now())?;

        let mut stats = self.db.endpoint_stats_or_default(event.endpoint.as_str())?;
        let before = stats.clone();
        let proceed = backoff::should_relay_now(&mut stats);
        if stats != before {
            self.db.save_endpoint_stats(&stats)?;
        }
        if !proceed {
            return Ok(RelayOutcome::Deferred);
        }

        if !event.endpoint.is_deliverable() {
            tracing::warn!(
                queue_id = event.id,
                endpoint = %event.endpoint,
                "Dropping event for undeliverable endpoint"
            );
            self.db.delete_queued_event(event.id)?;
            return Ok(RelayOutcome::Dropped);
        }

        match self.transport.post(&event.endpoint, event.body.clone()).await {
            Ok(()) => {
                backoff::record_success(&mut stats);
                self.db.save_endpoint_stats(&stats)?;
                self.db.delete_queued_event(event.id)?;
                tracing::debug!(
                    queue_id = event.id,
                    endpoint = %event.endpoint,
                    tries = event.relay_tries,
                    "Event delivered"
                );
                Ok(RelayOutcome::Delivered)
            }
            Err(e) => {
                backoff::record_failure(&mut stats);
                self.db.save_endpoint_stats(&stats)?;
                tracing::info!(
                    endpoint = %event.endpoint,
                    fail_streak = stats.fail_streak,
                    "Delivery failed"
                );
                Err(e.into())
            }
        }
    }

    /// Relay loop; never returns.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        let mut ticks: u64 = 0;
        loop {
            interval.tick().await;
            if let Err(e) = self.drain_once() {
                tracing::error!(error = %e, "Relay cycle failed");
            }
            ticks += 1;
            if ticks % 300 == 0 {
                self.locks.purge_idle();
            }
        }
    }
}
