//! Demultiplexes the node's notification streams onto tracker operations.
//!
//! One consuming loop per stream. The loops never apply backpressure toward
//! the transport; a slow decoder means the driver drops payloads at its
//! boundary and the periodic resync repairs the gap.

use std::sync::Arc;

use bitcoin::{consensus, Block, Txid};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::decode::TxDecoder;
use crate::stream::{parse_sequence, SequenceEvent};

use super::state::Tracker;

/// Feeds framed stream payloads into the state machine.
pub struct Dispatcher {
    tracker: Arc<Tracker>,
    decoder: Arc<dyn TxDecoder>,
}

impl Dispatcher {
    pub fn new(tracker: Arc<Tracker>, decoder: Arc<dyn TxDecoder>) -> Self {
        Self { tracker, decoder }
    }

    /// Consume the `sequence` stream: strictly ordered announce/remove
    /// events, plus block labels the tracker does not act on.
    pub async fn run_sequence(&self, mut rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(payload) = rx.recv().await {
            match parse_sequence(&payload) {
                Ok(SequenceEvent::MempoolAdded { txid, sequence }) => {
                    self.tracker.register(txid, Some(sequence), true).await;
                }
                Ok(SequenceEvent::MempoolRemoved { txid, .. }) => {
                    self.tracker.remove(txid).await;
                }
                Ok(SequenceEvent::BlockConnected(hash))
                | Ok(SequenceEvent::BlockDisconnected(hash)) => {
                    // Blocks are applied from the rawblock stream.
                    debug!(block = %hash, "ignoring block label on sequence stream");
                }
                Err(e) => warn!(error = %e, "malformed sequence payload"),
            }
        }
        info!("sequence stream closed");
    }

    /// Consume the `rawtx` stream: decode each body and hand it to the
    /// state machine.
    pub async fn run_rawtx(&self, mut rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(payload) = rx.recv().await {
            match self.decoder.decode(&payload).await {
                Ok(tx) => self.tracker.insert(tx).await,
                Err(e) => warn!(error = %e, "discarding undecodable rawtx payload"),
            }
        }
        info!("rawtx stream closed");
    }

    /// Consume the `rawblock` stream: decode the block and drain its
    /// transactions from the pool.
    pub async fn run_rawblock(&self, mut rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(payload) = rx.recv().await {
            match consensus::deserialize::<Block>(&payload) {
                Ok(block) => {
                    let txids: Vec<Txid> =
                        block.txdata.iter().map(|tx| tx.compute_txid()).collect();
                    info!(block = %block.block_hash(), txs = txids.len(), "applying block");
                    self.tracker.apply_block(txids).await;
                }
                Err(e) => warn!(error = %e, "discarding undecodable rawblock payload"),
            }
        }
        info!("rawblock stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::ConsensusDecoder;
    use crate::publish::NullPublisher;
    use crate::test_util::{raw_block, raw_tx, sequence_payload, spending, txid_from_byte};
    use crate::types::{Profile, TxStatus};

    use bitcoin::Transaction;

    fn harness() -> (Arc<Tracker>, Dispatcher) {
        let tracker = Arc::new(Tracker::new(Profile::Personal, Arc::new(NullPublisher)));
        let dispatcher = Dispatcher::new(tracker.clone(), Arc::new(ConsensusDecoder::new(None)));
        (tracker, dispatcher)
    }

    #[tokio::test]
    async fn sequence_stream_drives_register_and_remove() {
        let (tracker, dispatcher) = harness();
        tracker
            .load_snapshot(crate::test_util::snapshot(100, &[]))
            .await;

        let (tx, rx) = mpsc::channel(8);
        let a = txid_from_byte(0x0a);
        tx.send(sequence_payload(a, b'A', 101)).await.unwrap();
        tx.send(vec![0x00; 3]).await.unwrap(); // malformed, skipped
        tx.send(sequence_payload(a, b'R', 102)).await.unwrap();
        drop(tx);

        dispatcher.run_sequence(rx).await;
        assert_eq!(tracker.status(&a).await, TxStatus::Dropped);
        assert_eq!(tracker.count().await, 0);
    }

    #[tokio::test]
    async fn rawtx_stream_decodes_and_inserts_bodies() {
        let (tracker, dispatcher) = harness();
        tracker
            .load_snapshot(crate::test_util::snapshot(100, &[]))
            .await;

        let bytes = raw_tx(&[spending(txid_from_byte(1), 0)], &[5_000]);
        let txid = bitcoin::consensus::deserialize::<Transaction>(&bytes)
            .unwrap()
            .compute_txid();

        let (tx, rx) = mpsc::channel(8);
        tx.send(vec![0xde, 0xad]).await.unwrap(); // undecodable, skipped
        tx.send(bytes).await.unwrap();
        drop(tx);

        dispatcher.run_rawtx(rx).await;
        assert_eq!(tracker.status(&txid).await, TxStatus::Bodied);
    }

    #[tokio::test]
    async fn rawblock_stream_applies_confirmations() {
        let (tracker, dispatcher) = harness();
        tracker
            .load_snapshot(crate::test_util::snapshot(100, &[]))
            .await;

        let body = raw_tx(&[spending(txid_from_byte(2), 1)], &[7_000]);
        let tx: Transaction = bitcoin::consensus::deserialize(&body).unwrap();
        let txid = tx.compute_txid();

        tracker.register(txid, Some(101), true).await;
        tracker
            .insert(crate::test_util::make_tracked(&tx))
            .await;
        assert_eq!(tracker.count().await, 1);

        let (sender, rx) = mpsc::channel(2);
        sender.send(raw_block(vec![tx])).await.unwrap();
        drop(sender);

        dispatcher.run_rawblock(rx).await;
        assert_eq!(tracker.count().await, 0);
        assert_eq!(tracker.status(&txid).await, TxStatus::Block);
    }
}
