//! Snapshot reconciliation and body backfill.
//!
//! On startup the tracker knows nothing; the reconciler fetches the
//! authoritative mempool snapshot, anchors the sequence cursor, and then
//! backfills transaction bodies in rate-capped batches. Afterwards it keeps
//! re-running the same procedure on an interval, which is how events lost on
//! the wire are eventually recovered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::decode::TxDecoder;
use crate::error::CoreError;
use crate::rpc::NodeRpc;

use super::state::Tracker;

/// Delay before retrying a failed snapshot fetch.
const SNAPSHOT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// How many bodies to request per backfill batch.
const BACKFILL_BATCH_SIZE: usize = 50;

/// Pause between backfill batches, capping RPC pressure on the node.
const BACKFILL_BATCH_DELAY: Duration = Duration::from_millis(250);

/// Reconciles the tracker against the node's authoritative mempool.
pub struct Reconciler {
    tracker: Arc<Tracker>,
    rpc: Arc<dyn NodeRpc>,
    decoder: Arc<dyn TxDecoder>,
    shutdown: watch::Receiver<bool>,
    /// Interval between resyncs after the initial load; zero disables them.
    resync_interval: Duration,
}

impl Reconciler {
    pub fn new(
        tracker: Arc<Tracker>,
        rpc: Arc<dyn NodeRpc>,
        decoder: Arc<dyn TxDecoder>,
        shutdown: watch::Receiver<bool>,
        resync_interval: Duration,
    ) -> Self {
        Self {
            tracker,
            rpc,
            decoder,
            shutdown,
            resync_interval,
        }
    }

    /// Drive reconciliation until shutdown: the initial load retries
    /// indefinitely, then periodic resyncs run on the configured interval.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                return;
            }
            match self.reconcile_once().await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "mempool snapshot failed; retrying");
                    if !self.pause(SNAPSHOT_RETRY_DELAY).await {
                        return;
                    }
                }
            }
        }

        if self.resync_interval.is_zero() {
            return;
        }
        loop {
            if !self.pause(self.resync_interval).await {
                return;
            }
            if let Err(e) = self.reconcile_once().await {
                warn!(error = %e, "resync failed; will retry next interval");
            }
        }
    }

    /// One full reconciliation: snapshot, replay, backfill, done.
    pub async fn reconcile_once(&mut self) -> Result<(), CoreError> {
        let snapshot = self.rpc.mempool_snapshot().await?;
        info!(
            sequence = snapshot.sequence,
            txids = snapshot.txids.len(),
            "loaded mempool snapshot"
        );

        let pending = self.tracker.load_snapshot(snapshot).await;
        self.backfill(pending).await;
        self.tracker.mark_done().await;
        Ok(())
    }

    /// Fetch bodies for every pending txid, in batches. Failures leave the
    /// entry announced; the next resync picks it up again.
    async fn backfill(&mut self, pending: Vec<bitcoin::Txid>) {
        if pending.is_empty() {
            return;
        }
        let total = pending.len();
        let mut failed = 0usize;

        for (batch_index, batch) in pending.chunks(BACKFILL_BATCH_SIZE).enumerate() {
            if batch_index > 0 && !self.pause(BACKFILL_BATCH_DELAY).await {
                warn!("backfill cancelled by shutdown");
                return;
            }

            // Register the whole batch first so a fetch failure still leaves
            // each entry announced rather than untracked.
            for txid in batch {
                self.tracker.register(*txid, None, false).await;
            }

            let results = match self.rpc.raw_transactions(batch).await {
                Ok(results) => results,
                Err(e) => {
                    failed += batch.len();
                    warn!(batch = batch_index, error = %e, "backfill batch failed; skipping");
                    continue;
                }
            };

            for (txid, result) in batch.iter().zip(results) {
                let bytes = match result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        failed += 1;
                        warn!(%txid, error = %e, "backfill item failed");
                        continue;
                    }
                };
                match self.decoder.decode(&bytes).await {
                    Ok(tx) => {
                        self.tracker.register(tx.txid, None, false).await;
                        self.tracker.insert(tx).await;
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(%txid, error = %e, "backfill body undecodable");
                    }
                }
            }
        }

        if failed > 0 {
            warn!(
                failed,
                total, "backfill incomplete; entries stay announced until the next resync"
            );
        } else {
            info!(total, "backfill complete");
        }
    }

    /// Sleep for `duration`, returning `false` if shutdown fired first.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.changed() => false,
        }
    }
}
