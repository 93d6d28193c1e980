//! Shared test helpers for `vigil-core` unit tests.
//!
//! Consolidates builders for deterministic txids, tracked transactions,
//! consensus-serialized transactions and blocks, and notification payloads
//! so tests across modules share a single source of dummy-data truth.

use std::sync::Mutex;

use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    consensus, Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxMerkleNode, TxOut, Txid, Witness,
};

use crate::publish::Publisher;
use crate::rpc::MempoolSnapshot;
use crate::types::TrackedTx;

// ==============================================================================
// Deterministic Identifiers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

/// An outpoint funding from `txid_from_byte(b)` at the given index.
pub fn outpoint(b: u8, vout: u32) -> OutPoint {
    OutPoint::new(txid_from_byte(b), vout)
}

// ==============================================================================
// Tracked Transaction Builders
// ==============================================================================

/// Build a `TrackedTx` with a txid derived from `byte`. Values in satoshis.
pub fn make_tx(byte: u8, inputs: &[OutPoint], value_sats: u64, fee_sats: u64) -> TrackedTx {
    let txid = txid_from_byte(byte);
    TrackedTx {
        txid,
        inputs: inputs.to_vec(),
        value: Amount::from_sat(value_sats),
        fee: Amount::from_sat(fee_sats),
        inflated: serde_json::json!({ "txid": txid.to_string() }),
    }
}

/// Build a `TrackedTx` from a real consensus transaction, the way the
/// decoder would without prevout resolution (zero fee).
pub fn make_tracked(tx: &Transaction) -> TrackedTx {
    let txid = tx.compute_txid();
    TrackedTx {
        txid,
        inputs: tx
            .input
            .iter()
            .map(|input| input.previous_output)
            .filter(|outpoint| !outpoint.is_null())
            .collect(),
        value: tx
            .output
            .iter()
            .map(|output| output.value)
            .fold(Amount::ZERO, |acc, v| acc + v),
        fee: Amount::ZERO,
        inflated: serde_json::json!({ "txid": txid.to_string() }),
    }
}

pub fn snapshot(sequence: u64, txids: &[Txid]) -> MempoolSnapshot {
    MempoolSnapshot {
        txids: txids.to_vec(),
        sequence,
    }
}

// ==============================================================================
// Consensus Builders
// ==============================================================================

/// An input spending `funding_txid:vout`.
pub fn spending(funding_txid: Txid, vout: u32) -> TxIn {
    TxIn {
        previous_output: OutPoint::new(funding_txid, vout),
        script_sig: ScriptBuf::new(),
        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        witness: Witness::new(),
    }
}

/// Consensus-serialize a minimal transaction with the given inputs and
/// output values in satoshis.
pub fn raw_tx(inputs: &[TxIn], output_sats: &[u64]) -> Vec<u8> {
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs.to_vec(),
        output: output_sats
            .iter()
            .map(|sats| TxOut {
                value: Amount::from_sat(*sats),
                script_pubkey: ScriptBuf::new(),
            })
            .collect(),
    };
    consensus::serialize(&tx)
}

/// Consensus-serialize a block carrying the given transactions. The header
/// is not validated by the dispatcher, so placeholder fields suffice.
pub fn raw_block(txdata: Vec<Transaction>) -> Vec<u8> {
    let header = Header {
        version: BlockVersion::ONE,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: TxMerkleNode::all_zeros(),
        time: 0,
        bits: CompactTarget::from_consensus(0x1d00_ffff),
        nonce: 0,
    };
    consensus::serialize(&Block { header, txdata })
}

/// Build a raw `sequence` topic payload for a mempool event.
pub fn sequence_payload(txid: Txid, label: u8, sequence: u64) -> Vec<u8> {
    let mut buf = txid.to_byte_array().to_vec();
    buf.push(label);
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf
}

// ==============================================================================
// Recording Publisher
// ==============================================================================

/// A [`Publisher`] that records every payload for assertion.
#[derive(Default)]
pub struct CountingPublisher {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl CountingPublisher {
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().expect("publisher mutex poisoned").clone()
    }
}

impl Publisher for CountingPublisher {
    fn publish(&self, payload: &[u8]) {
        self.payloads
            .lock()
            .expect("publisher mutex poisoned")
            .push(payload.to_vec());
    }
}
