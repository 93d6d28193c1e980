//! Mock [`NodeRpc`] implementation for tests.
//!
//! Uses a builder pattern (`MockRpc::builder()`) to register a canned
//! snapshot and raw transaction bodies before the mock is consumed. Individual
//! txids can be marked as failing to exercise partial-batch error paths.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};

use crate::error::{CoreError, RpcError};

use super::types::{ChainInfo, MempoolSnapshot};
use super::NodeRpc;

/// A mock Bitcoin RPC backend for testing. Returns canned data from maps
/// populated via the builder pattern.
pub struct MockRpc {
    snapshot: MempoolSnapshot,
    raw_txs: HashMap<Txid, Vec<u8>>,
    failing: HashSet<Txid>,
    chain_info: ChainInfo,
}

impl MockRpc {
    pub fn builder() -> MockRpcBuilder {
        MockRpcBuilder {
            snapshot: MempoolSnapshot {
                txids: Vec::new(),
                sequence: 0,
            },
            raw_txs: HashMap::new(),
            failing: HashSet::new(),
            chain_info: ChainInfo {
                chain: "regtest".into(),
                blocks: 100,
                best_block_hash: BlockHash::all_zeros(),
                pruned: false,
            },
        }
    }
}

/// Builder for configuring a [`MockRpc`] with canned data.
pub struct MockRpcBuilder {
    snapshot: MempoolSnapshot,
    raw_txs: HashMap<Txid, Vec<u8>>,
    failing: HashSet<Txid>,
    chain_info: ChainInfo,
}

impl MockRpcBuilder {
    /// Set the snapshot returned by `mempool_snapshot`.
    pub fn with_snapshot(mut self, sequence: u64, txids: Vec<Txid>) -> Self {
        self.snapshot = MempoolSnapshot { txids, sequence };
        self
    }

    /// Register raw transaction bytes, keyed by txid.
    pub fn with_raw_tx(mut self, txid: Txid, bytes: Vec<u8>) -> Self {
        self.raw_txs.insert(txid, bytes);
        self
    }

    /// Mark a txid as failing: `raw_transactions` returns a per-item server
    /// error for it even if bytes were registered.
    pub fn with_failing(mut self, txid: Txid) -> Self {
        self.failing.insert(txid);
        self
    }

    /// Override the default chain info (regtest, 100 blocks).
    pub fn with_chain_info(mut self, info: ChainInfo) -> Self {
        self.chain_info = info;
        self
    }

    /// Consume the builder and produce a [`MockRpc`].
    pub fn build(self) -> MockRpc {
        MockRpc {
            snapshot: self.snapshot,
            raw_txs: self.raw_txs,
            failing: self.failing,
            chain_info: self.chain_info,
        }
    }
}

fn not_found(txid: &Txid) -> RpcError {
    RpcError::ServerError {
        code: -5,
        message: format!("No such mempool or blockchain transaction: {txid}"),
    }
}

#[async_trait]
impl NodeRpc for MockRpc {
    async fn mempool_snapshot(&self) -> Result<MempoolSnapshot, CoreError> {
        Ok(self.snapshot.clone())
    }

    async fn raw_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<Result<Vec<u8>, RpcError>>, CoreError> {
        Ok(txids
            .iter()
            .map(|txid| {
                if self.failing.contains(txid) {
                    return Err(not_found(txid));
                }
                self.raw_txs
                    .get(txid)
                    .cloned()
                    .ok_or_else(|| not_found(txid))
            })
            .collect())
    }

    async fn blockchain_info(&self) -> Result<ChainInfo, CoreError> {
        Ok(self.chain_info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(b: u8) -> Txid {
        Txid::from_byte_array([b; 32])
    }

    #[tokio::test]
    async fn raw_transactions_reports_per_item_outcomes() {
        let rpc = MockRpc::builder()
            .with_raw_tx(txid(1), vec![0xaa])
            .with_raw_tx(txid(2), vec![0xbb])
            .with_failing(txid(2))
            .build();

        let results = rpc
            .raw_transactions(&[txid(1), txid(2), txid(3)])
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &vec![0xaa]);
        assert!(results[1].is_err(), "failing txid must error");
        assert!(results[2].is_err(), "unregistered txid must error");
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let rpc = MockRpc::builder()
            .with_snapshot(77, vec![txid(9)])
            .build();
        let snap = rpc.mempool_snapshot().await.unwrap();
        assert_eq!(snap.sequence, 77);
        assert_eq!(snap.txids, vec![txid(9)]);
    }
}
