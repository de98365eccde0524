//! Persistent mutation queue with sequential FIFO replay.

use super::mutation::{
    DiscardReason, MutationSender, QueueConfig, QueueEvent, QueuedMutation, ReplayReport,
    SendVerdict,
};
use crate::clock::DynClock;
use crate::error::Result;
use crate::network::Method;
use crate::store::{DynStore, QUEUE_NAMESPACE};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Durable queue of writes awaiting delivery.
///
/// Every read-modify-write on a record happens under a short synchronous
/// lock, so an `enqueue` racing a replay pass can neither be lost nor
/// duplicated. Replay passes are serialized by an async lock held for the
/// whole pass.
pub struct MutationQueue {
    store: DynStore,
    clock: DynClock,
    config: QueueConfig,
    write_lock: Mutex<()>,
    replay_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<QueueEvent>,
}

impl MutationQueue {
    pub fn new(store: DynStore, clock: DynClock, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            clock,
            config,
            write_lock: Mutex::new(()),
            replay_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Receive queue events (enqueued, delivered, discarded, retained).
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Persist a mutation.
    ///
    /// Enqueuing an id that is already pending replaces its request but
    /// keeps its place in line.
    pub fn enqueue(
        &self,
        id: impl Into<String>,
        method: Method,
        url: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<QueuedMutation> {
        let id = id.into();
        let mutation = {
            let _guard = self.write_guard();

            let enqueued_at = match self.read(&id)? {
                Some((existing, _)) => existing.enqueued_at,
                None => self.clock.now(),
            };
            let mutation = QueuedMutation {
                id: id.clone(),
                method,
                url: url.into(),
                payload,
                enqueued_at,
                retry_count: 0,
            };
            self.store
                .put(QUEUE_NAMESPACE, &id, &serde_json::to_vec(&mutation)?)?;
            mutation
        };

        debug!("Queued {} {} as {}", mutation.method, mutation.url, id);
        self.emit(QueueEvent::Enqueued { id });
        Ok(mutation)
    }

    /// Pending mutations in replay order: oldest first, ties by id.
    pub fn list_pending(&self) -> Result<Vec<QueuedMutation>> {
        let (pending, _) = self.load()?;
        Ok(pending)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.list_all(QUEUE_NAMESPACE)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<QueuedMutation>> {
        Ok(self.read(id)?.map(|(mutation, _)| mutation))
    }

    /// Delete a pending mutation. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.write_guard();
        self.store.delete(QUEUE_NAMESPACE, id)
    }

    /// Deliver pending mutations in FIFO order, one at a time.
    ///
    /// The pass stops at the first mutation that cannot be delivered right
    /// now, so a later mutation never reaches the server before an earlier
    /// one.
    pub async fn replay(&self, sender: &dyn MutationSender) -> Result<ReplayReport> {
        let _pass = self.replay_lock.lock().await;
        let mut report = ReplayReport::default();

        let (pending, unreadable) = self.load()?;
        for id in unreadable {
            if self.remove(&id)? {
                warn!("Discarding unreadable queued mutation {}", id);
                report.discarded += 1;
                self.emit(QueueEvent::Discarded {
                    id,
                    reason: DiscardReason::Unreadable,
                });
            }
        }

        if !pending.is_empty() {
            info!("Replaying {} queued mutations", pending.len());
        }

        for listed in pending {
            // Pick up removals and replacements made since listing
            let Some((mutation, raw)) = self.read(&listed.id)? else {
                continue;
            };

            match sender.send(&mutation).await {
                SendVerdict::Delivered => {
                    self.settle(&mutation.id, &raw, None)?;
                    debug!("Replayed mutation {}", mutation.id);
                    report.delivered += 1;
                    self.emit(QueueEvent::Delivered {
                        id: mutation.id.clone(),
                    });
                }
                SendVerdict::Rejected { status } => {
                    self.settle(&mutation.id, &raw, None)?;
                    warn!(
                        "Discarding mutation {}: server rejected it with {}",
                        mutation.id, status
                    );
                    report.discarded += 1;
                    self.emit(QueueEvent::Discarded {
                        id: mutation.id.clone(),
                        reason: DiscardReason::Rejected { status },
                    });
                }
                SendVerdict::Failed { reason } => {
                    let retry_count = mutation.retry_count + 1;
                    if retry_count >= self.config.max_retries {
                        self.settle(&mutation.id, &raw, None)?;
                        warn!(
                            "Discarding mutation {} after {} failed replays: {}",
                            mutation.id, retry_count, reason
                        );
                        report.discarded += 1;
                        self.emit(QueueEvent::Discarded {
                            id: mutation.id.clone(),
                            reason: DiscardReason::RetriesExhausted { retry_count },
                        });
                    } else {
                        let updated = QueuedMutation {
                            retry_count,
                            ..mutation.clone()
                        };
                        self.settle(&mutation.id, &raw, Some(serde_json::to_vec(&updated)?))?;
                        debug!(
                            "Mutation {} failed replay ({}/{}): {}",
                            mutation.id, retry_count, self.config.max_retries, reason
                        );
                        report.retained += 1;
                        self.emit(QueueEvent::Retained {
                            id: mutation.id.clone(),
                            retry_count,
                        });
                    }
                    break;
                }
                SendVerdict::Deferred { reason } => {
                    debug!("Replay paused at {}: {}", mutation.id, reason);
                    report.deferred = true;
                    break;
                }
            }
        }

        report.remaining = self.len()?;
        Ok(report)
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: QueueEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn read(&self, id: &str) -> Result<Option<(QueuedMutation, Vec<u8>)>> {
        let Some(raw) = self.store.get(QUEUE_NAMESPACE, id)? else {
            return Ok(None);
        };
        Ok(Self::decode(id, &raw).map(|mutation| (mutation, raw)))
    }

    /// Apply a replay outcome unless the record changed while it was in
    /// flight. `update: None` deletes.
    fn settle(&self, id: &str, sent: &[u8], update: Option<Vec<u8>>) -> Result<bool> {
        let _guard = self.write_guard();

        let current = self.store.get(QUEUE_NAMESPACE, id)?;
        if current.as_deref() != Some(sent) {
            debug!("Mutation {} changed during replay, keeping newer version", id);
            return Ok(false);
        }

        match update {
            Some(bytes) => self.store.put(QUEUE_NAMESPACE, id, &bytes)?,
            None => {
                self.store.delete(QUEUE_NAMESPACE, id)?;
            }
        }
        Ok(true)
    }

    fn load(&self) -> Result<(Vec<QueuedMutation>, Vec<String>)> {
        let mut pending = Vec::new();
        let mut unreadable = Vec::new();

        for (id, raw) in self.store.list_all(QUEUE_NAMESPACE)? {
            match Self::decode(&id, &raw) {
                Some(mutation) => pending.push(mutation),
                None => unreadable.push(id),
            }
        }

        pending.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok((pending, unreadable))
    }

    fn decode(id: &str, raw: &[u8]) -> Option<QueuedMutation> {
        match serde_json::from_slice::<QueuedMutation>(raw) {
            Ok(mut mutation) => {
                mutation.id = id.to_string();
                Some(mutation)
            }
            Err(e) => {
                warn!("Unreadable queued mutation {}: {}", id, e);
                None
            }
        }
    }
}
