//! The mempool state machine.
//!
//! A [`Tracker`] fuses the three notification streams and the RPC snapshot
//! into one consistent view. All mutation happens under a single write
//! guard, so each operation runs to completion before the next one starts;
//! in particular a block application is atomic with respect to inserts and
//! removals, which is what keeps confirmed transactions from being promoted
//! back to live by late raw-transaction arrivals.
//!
//! The state machine itself never performs I/O. Decoding, RPC, and transport
//! all happen in the dispatcher and reconciler before an operation is
//! invoked.

use std::sync::Arc;

use bitcoin::{OutPoint, Txid};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::publish::{count_payload, Publisher};
use crate::rpc::MempoolSnapshot;
use crate::types::{Profile, SpendRef, TrackedTx, TxStatus};

use super::index::{Indices, MempoolEntry};

// ==============================================================================
// Internal State
// ==============================================================================

/// Sequence-stream event deferred because the snapshot is not loaded yet.
#[derive(Debug, Clone, Copy)]
enum QueuedEvent {
    Add { txid: Txid, sequence: Option<u64> },
    Remove { txid: Txid },
}

/// Outcome of one state-machine operation, used to decide publication.
#[derive(Debug, Clone, Copy, Default)]
struct Effect {
    count_changed: bool,
    went_live: bool,
}

impl Effect {
    fn none() -> Self {
        Self::default()
    }

    fn publish_worthy(self) -> bool {
        self.count_changed || self.went_live
    }
}

struct TrackerInner {
    idx: Indices,
    /// Number of tracked transactions. Anticipatory during backfill: the
    /// snapshot size is credited up front and corrected by drops, so it can
    /// exceed the number of live entries until `done`.
    count: u64,
    /// Last sequence number anchored by the snapshot; `None` until the first
    /// snapshot loads.
    cursor: Option<u64>,
    queue: Vec<QueuedEvent>,
    done: bool,
}

impl TrackerInner {
    fn new() -> Self {
        Self {
            idx: Indices::default(),
            count: 0,
            cursor: None,
            queue: Vec::new(),
            done: false,
        }
    }

    /// Sequence-stream announcement (`A`), or a backfill registration when
    /// `sequence` is `None`.
    fn register(
        &mut self,
        profile: Profile,
        txid: Txid,
        sequence: Option<u64>,
        count_it: bool,
    ) -> Effect {
        let Some(cursor) = self.cursor else {
            self.queue.push(QueuedEvent::Add { txid, sequence });
            return Effect::none();
        };
        if let Some(sequence) = sequence {
            // The snapshot already accounts for anything before its anchor.
            if sequence < cursor {
                return Effect::none();
            }
        }
        if self.idx.block.contains(&txid) {
            return Effect::none();
        }

        match self.idx.entries.get(&txid) {
            None => {
                self.idx.entries.insert(txid, MempoolEntry::Announced);
                self.idx.sync.remove(&txid);
                if count_it {
                    self.count += 1;
                }
                Effect {
                    count_changed: count_it,
                    went_live: false,
                }
            }
            Some(MempoolEntry::Bodied(_)) => {
                let Some(MempoolEntry::Bodied(tx)) = self.idx.entries.remove(&txid) else {
                    return Effect::none();
                };
                self.promote(profile, txid, tx);
                self.idx.sync.remove(&txid);
                if count_it {
                    self.count += 1;
                }
                Effect {
                    count_changed: count_it,
                    went_live: true,
                }
            }
            // Announced, Live, Dropped: announcement adds nothing.
            Some(_) => Effect::none(),
        }
    }

    /// Decoded body arrival from the raw-transaction stream or backfill.
    fn insert(&mut self, profile: Profile, tx: TrackedTx) -> Effect {
        let txid = tx.txid;
        match self.idx.entries.get(&txid) {
            None => {
                if self.idx.block.contains(&txid) {
                    // Late body for a transaction the last block confirmed.
                    return Effect::none();
                }
                self.idx.entries.insert(txid, MempoolEntry::Bodied(tx));
                Effect::none()
            }
            Some(MempoolEntry::Announced) => {
                if self.idx.block.contains(&txid) {
                    return Effect::none();
                }
                self.idx.sync.remove(&txid);
                self.promote(profile, txid, tx);
                Effect {
                    count_changed: false,
                    went_live: true,
                }
            }
            Some(MempoolEntry::Dropped) => {
                // The removal beat the body; the tombstone has done its job.
                self.idx.entries.remove(&txid);
                Effect::none()
            }
            // Live or Bodied: duplicate body.
            Some(_) => Effect::none(),
        }
    }

    /// Sequence-stream removal (`R`), also invoked per-txid during block
    /// application.
    fn remove(&mut self, txid: Txid) -> Effect {
        if self.cursor.is_none() {
            self.queue.push(QueuedEvent::Remove { txid });
            return Effect::none();
        }

        match self.idx.entries.get(&txid) {
            None => {
                if self.idx.sync.remove(&txid) {
                    // Counted by the snapshot but never backfilled; the
                    // tombstone keeps the in-flight body out.
                    self.idx.entries.insert(txid, MempoolEntry::Dropped);
                    self.count = self.count.saturating_sub(1);
                    Effect {
                        count_changed: true,
                        went_live: false,
                    }
                } else {
                    Effect::none()
                }
            }
            Some(MempoolEntry::Announced) => {
                self.idx.entries.insert(txid, MempoolEntry::Dropped);
                self.count = self.count.saturating_sub(1);
                Effect {
                    count_changed: true,
                    went_live: false,
                }
            }
            Some(MempoolEntry::Bodied(_)) => {
                // Never entered the counted set.
                self.idx.entries.remove(&txid);
                Effect::none()
            }
            Some(MempoolEntry::Live(_)) => {
                let Some(MempoolEntry::Live(live)) = self.idx.entries.remove(&txid) else {
                    return Effect::none();
                };
                self.idx.uncache_spends(&live.inputs);
                self.count = self.count.saturating_sub(1);
                Effect {
                    count_changed: true,
                    went_live: false,
                }
            }
            Some(MempoolEntry::Dropped) => Effect::none(),
        }
    }

    /// Drain every transaction confirmed by a new block.
    fn apply_block(&mut self, txids: &[Txid]) {
        self.idx.block.clear();
        self.idx.block.extend(txids.iter().copied());

        for txid in txids {
            let effect = self.remove(*txid);
            if !effect.count_changed && self.idx.sync.remove(txid) {
                // Still pending backfill; the snapshot counted it, so its
                // confirmation is a removal for counting purposes.
                self.count = self.count.saturating_sub(1);
            }
        }
    }

    /// Install an authoritative snapshot, replay deferred events, and return
    /// the txids that still need a body backfill.
    ///
    /// Also serves resync: tracked entries that vanished from the pool
    /// without a removal event are purged (tombstones are kept, since their
    /// body may still be in flight).
    fn load_snapshot(&mut self, profile: Profile, snapshot: MempoolSnapshot) -> Vec<Txid> {
        self.cursor = Some(snapshot.sequence);

        let in_snapshot: std::collections::HashSet<Txid> =
            snapshot.txids.iter().copied().collect();
        let stale: Vec<Txid> = self
            .idx
            .entries
            .iter()
            .filter(|(txid, entry)| {
                !matches!(entry, MempoolEntry::Dropped) && !in_snapshot.contains(*txid)
            })
            .map(|(txid, _)| *txid)
            .collect();
        if !stale.is_empty() {
            debug!(purged = stale.len(), "purging entries absent from snapshot");
        }
        for txid in stale {
            if let Some(MempoolEntry::Live(live)) = self.idx.entries.remove(&txid) {
                self.idx.uncache_spends(&live.inputs);
            }
        }

        self.count = snapshot.txids.len() as u64;
        self.idx.sync = snapshot
            .txids
            .iter()
            .filter(|txid| !self.idx.entries.contains_key(*txid))
            .copied()
            .collect();

        let queued = std::mem::take(&mut self.queue);
        for event in queued {
            match event {
                QueuedEvent::Add { txid, sequence } => {
                    self.register(profile, txid, sequence, true);
                }
                QueuedEvent::Remove { txid } => {
                    self.remove(txid);
                }
            }
        }

        snapshot
            .txids
            .iter()
            .filter(|txid| {
                !matches!(
                    self.idx.entries.get(*txid),
                    Some(MempoolEntry::Live(_)) | Some(MempoolEntry::Dropped)
                )
            })
            .copied()
            .collect()
    }

    fn promote(&mut self, profile: Profile, txid: Txid, tx: TrackedTx) {
        if profile.spend_index_enabled() {
            self.idx.cache_spends(txid, &tx.inputs);
        }
        self.idx.entries.insert(txid, MempoolEntry::Live(tx.into()));
    }
}

// ==============================================================================
// Tracker
// ==============================================================================

/// Live view of a Bitcoin node's mempool.
///
/// Cheap to share: clone the `Arc` wrapping it. Mutators serialize on an
/// internal write lock; queries take the read lock and observe committed
/// state only.
pub struct Tracker {
    inner: RwLock<TrackerInner>,
    publisher: Arc<dyn Publisher>,
    profile: Profile,
}

impl Tracker {
    pub fn new(profile: Profile, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            inner: RwLock::new(TrackerInner::new()),
            publisher,
            profile,
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Process a sequence-stream announcement. `sequence` is `None` for
    /// backfill registrations, which also pass `count_it = false` because
    /// the snapshot already counted them.
    pub async fn register(&self, txid: Txid, sequence: Option<u64>, count_it: bool) {
        let (effect, count) = {
            let mut inner = self.inner.write().await;
            let effect = inner.register(self.profile, txid, sequence, count_it);
            (effect, inner.count)
        };
        self.publish_if(effect, count);
    }

    /// Process a decoded transaction body.
    pub async fn insert(&self, tx: TrackedTx) {
        let (effect, count) = {
            let mut inner = self.inner.write().await;
            let effect = inner.insert(self.profile, tx);
            (effect, inner.count)
        };
        self.publish_if(effect, count);
    }

    /// Process a sequence-stream removal.
    pub async fn remove(&self, txid: Txid) {
        let (effect, count) = {
            let mut inner = self.inner.write().await;
            let effect = inner.remove(txid);
            (effect, inner.count)
        };
        self.publish_if(effect, count);
    }

    /// Atomically drain every transaction confirmed by a new block, then
    /// publish the new count.
    pub async fn apply_block(&self, txids: Vec<Txid>) {
        let count = {
            let mut inner = self.inner.write().await;
            inner.apply_block(&txids);
            inner.count
        };
        self.publisher.publish(&count_payload(count));
    }

    /// Install an authoritative snapshot and return the backfill list.
    pub async fn load_snapshot(&self, snapshot: MempoolSnapshot) -> Vec<Txid> {
        let (pending, count) = {
            let mut inner = self.inner.write().await;
            let pending = inner.load_snapshot(self.profile, snapshot);
            (pending, inner.count)
        };
        self.publisher.publish(&count_payload(count));
        pending
    }

    /// Mark the snapshot-plus-backfill reconciliation complete.
    pub async fn mark_done(&self) {
        let mut inner = self.inner.write().await;
        if !inner.done {
            inner.done = true;
            let live = inner
                .idx
                .entries
                .values()
                .filter(|e| matches!(e, MempoolEntry::Live(_)))
                .count() as u64;
            if live != inner.count {
                // Expected only when backfill items failed; the periodic
                // resync converges the two.
                warn!(count = inner.count, live, "count diverges from live set");
            }
        }
    }

    pub async fn is_done(&self) -> bool {
        self.inner.read().await.done
    }

    /// Number of tracked transactions.
    pub async fn count(&self) -> u64 {
        self.inner.read().await.count
    }

    /// Lifecycle status for a txid.
    pub async fn status(&self, txid: &Txid) -> TxStatus {
        self.inner.read().await.idx.status(txid)
    }

    /// Which live transaction spends `outpoint`, if any. Always `None` under
    /// the personal profile.
    pub async fn lookup_spend(&self, outpoint: &OutPoint) -> Option<SpendRef> {
        if !self.profile.spend_index_enabled() {
            return None;
        }
        self.inner.read().await.idx.spends.get(outpoint).copied()
    }

    /// Push the current count to the publication registry.
    pub async fn publish_count(&self) {
        let count = self.inner.read().await.count;
        self.publisher.publish(&count_payload(count));
    }

    fn publish_if(&self, effect: Effect, count: u64) {
        if effect.publish_worthy() {
            self.publisher.publish(&count_payload(count));
        }
    }
}
