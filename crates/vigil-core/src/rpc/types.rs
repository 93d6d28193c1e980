//! Wire-format types returned by the Bitcoin Core JSON-RPC layer.

use bitcoin::{BlockHash, Txid};
use serde::Deserialize;

/// Authoritative mempool snapshot from `getrawmempool` with
/// `mempool_sequence=true`.
///
/// `sequence` is the node's monotonic mempool sequence number at the moment
/// the snapshot was taken; it anchors every subsequent sequence-stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct MempoolSnapshot {
    pub txids: Vec<Txid>,
    #[serde(rename = "mempool_sequence")]
    pub sequence: u64,
}

/// Basic chain information from `getblockchaininfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
    pub pruned: bool,
}
