//! Domain types for Vigil's mempool-tracking model.
//!
//! Contains the decoded transaction record (`TrackedTx`), the query-facing
//! lifecycle status (`TxStatus`), the spend-index value (`SpendRef`), and the
//! deployment profile switch (`Profile`).

use bitcoin::{Amount, OutPoint, Txid};
use serde::{Deserialize, Serialize};

// ==============================================================================
// Deployment Profile
// ==============================================================================

/// Target deployment profile.
///
/// `Personal` tracks the pool and publishes counts only. `Public` additionally
/// maintains the reverse spend index, which costs one map entry per input of
/// every live transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Personal,
    Public,
}

impl Profile {
    /// Whether this profile maintains the reverse spend index.
    pub fn spend_index_enabled(self) -> bool {
        matches!(self, Profile::Public)
    }
}

// ==============================================================================
// Tracked Transaction
// ==============================================================================

/// A decoded unconfirmed transaction as consumed by the tracker.
///
/// Produced by a [`TxDecoder`](crate::decode::TxDecoder) from raw consensus
/// bytes. `value` is the sum of outputs and `fee` the miner fee (zero when
/// prevout resolution was unavailable); `inflated` is the enriched payload
/// kept verbatim for downstream publication.
#[derive(Debug, Clone)]
pub struct TrackedTx {
    pub txid: Txid,
    /// Outpoints spent by this transaction. Null outpoints are excluded.
    pub inputs: Vec<OutPoint>,
    pub value: Amount,
    pub fee: Amount,
    pub inflated: serde_json::Value,
}

impl TrackedTx {
    /// Total input value: sum of outputs plus the miner fee.
    pub fn total_in(&self) -> Amount {
        self.value + self.fee
    }
}

// ==============================================================================
// Query Types
// ==============================================================================

/// Lifecycle status reported for a txid by the tracker's query API.
///
/// `New` means the tracker has never seen the txid; `Block` means it was
/// confirmed by the most recently applied block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    New,
    Announced,
    Bodied,
    Live,
    Dropped,
    Block,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Announced => write!(f, "announced"),
            Self::Bodied => write!(f, "bodied"),
            Self::Live => write!(f, "live"),
            Self::Dropped => write!(f, "dropped"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// Spend-index value: which in-pool transaction spends a given outpoint,
/// and at which input position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRef {
    pub spender: Txid,
    pub input_index: u32,
}
