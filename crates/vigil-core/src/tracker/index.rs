//! Keyed indices owned by the tracker state machine.
//!
//! All four containers are mutated exclusively by the state machine in
//! `state.rs`; every other component reads them through the tracker's query
//! methods. Entries carry their lifecycle variant so a single lookup
//! distinguishes every state.

use std::collections::{HashMap, HashSet};

use bitcoin::{Amount, OutPoint, Txid};

use crate::types::{SpendRef, TrackedTx, TxStatus};

// ==============================================================================
// Mempool Entry
// ==============================================================================

/// Per-txid lifecycle entry.
#[derive(Debug, Clone)]
pub enum MempoolEntry {
    /// Seen on the sequence stream; body not yet decoded.
    Announced,
    /// Body arrived before (or without) an announcement.
    Bodied(TrackedTx),
    /// Announced and bodied; counted in the tracked total.
    Live(LiveTx),
    /// A removal arrived before the body could be processed. The tombstone
    /// suppresses late admission and is erased when the stale body arrives.
    Dropped,
}

/// The slice of a transaction retained once it goes live.
#[derive(Debug, Clone)]
pub struct LiveTx {
    pub inputs: Vec<OutPoint>,
    pub total_in: Amount,
    pub inflated: serde_json::Value,
}

impl From<TrackedTx> for LiveTx {
    fn from(tx: TrackedTx) -> Self {
        Self {
            total_in: tx.total_in(),
            inputs: tx.inputs,
            inflated: tx.inflated,
        }
    }
}

// ==============================================================================
// Indices
// ==============================================================================

/// The four keyed containers backing the tracker.
#[derive(Default)]
pub(crate) struct Indices {
    /// Mempool index: txid to lifecycle entry.
    pub entries: HashMap<Txid, MempoolEntry>,
    /// Txids from the authoritative snapshot still awaiting backfill.
    pub sync: HashSet<Txid>,
    /// Txids confirmed by the most recently applied block.
    pub block: HashSet<Txid>,
    /// Reverse spend index, populated only for live entries and only under
    /// the public profile.
    pub spends: HashMap<OutPoint, SpendRef>,
}

impl Indices {
    /// Status of a txid across all containers. The block set wins: a
    /// confirmed txid reports `Block` even if a tombstone lingers.
    pub fn status(&self, txid: &Txid) -> TxStatus {
        if self.block.contains(txid) {
            return TxStatus::Block;
        }
        match self.entries.get(txid) {
            None => TxStatus::New,
            Some(MempoolEntry::Announced) => TxStatus::Announced,
            Some(MempoolEntry::Bodied(_)) => TxStatus::Bodied,
            Some(MempoolEntry::Live(_)) => TxStatus::Live,
            Some(MempoolEntry::Dropped) => TxStatus::Dropped,
        }
    }

    /// Record every input of a newly live transaction in the spend index.
    pub fn cache_spends(&mut self, spender: Txid, inputs: &[OutPoint]) {
        for (input_index, outpoint) in inputs.iter().enumerate() {
            self.spends.insert(
                *outpoint,
                SpendRef {
                    spender,
                    input_index: input_index as u32,
                },
            );
        }
    }

    /// Remove every spend-index row owned by a departing live transaction.
    pub fn uncache_spends(&mut self, inputs: &[OutPoint]) {
        for outpoint in inputs {
            self.spends.remove(outpoint);
        }
    }

    /// Number of live entries; the count scalar must converge to this.
    #[cfg(test)]
    pub fn live_len(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, MempoolEntry::Live(_)))
            .count()
    }
}
