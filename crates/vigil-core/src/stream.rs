//! Notification stream interfaces and the node's sequence payload format.
//!
//! Transport drivers live outside this crate; they deliver each stream as a
//! channel of framed byte payloads via [`NotificationSource`]. This module
//! also knows how to parse the `sequence` topic payload that Bitcoin Core
//! publishes: a 32-byte hash, a one-byte label, and for mempool events an
//! 8-byte little-endian sequence number.

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};
use tokio::sync::mpsc;

use crate::error::CoreError;

// ==============================================================================
// Stream Kinds
// ==============================================================================

/// The three notification channels the tracker consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Sequence,
    RawTx,
    RawBlock,
}

impl StreamKind {
    /// Topic string Bitcoin Core publishes this stream under.
    pub fn topic(self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::RawTx => "rawtx",
            Self::RawBlock => "rawblock",
        }
    }
}

/// Subscription to the node's notification channels.
///
/// A driver returns a bounded channel per stream kind. Drivers apply no
/// backpressure: when the consumer falls behind, payloads are dropped at the
/// transport boundary and recovered by the next resync.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn subscribe(&self, kind: StreamKind) -> Result<mpsc::Receiver<Vec<u8>>, CoreError>;
}

// ==============================================================================
// Sequence Payload
// ==============================================================================

/// One parsed `sequence` stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEvent {
    /// Label `A`: txid entered the node's mempool.
    MempoolAdded { txid: Txid, sequence: u64 },
    /// Label `R`: txid left the node's mempool without being mined.
    MempoolRemoved { txid: Txid, sequence: u64 },
    /// Label `C`: block connected. Blocks are applied from the rawblock
    /// stream, so the tracker ignores these.
    BlockConnected(BlockHash),
    /// Label `D`: block disconnected (reorg).
    BlockDisconnected(BlockHash),
}

const HASH_LEN: usize = 32;
const MEMPOOL_PAYLOAD_LEN: usize = HASH_LEN + 1 + 8;
const BLOCK_PAYLOAD_LEN: usize = HASH_LEN + 1;

/// Parse a raw `sequence` topic payload.
pub fn parse_sequence(payload: &[u8]) -> Result<SequenceEvent, CoreError> {
    if payload.len() < BLOCK_PAYLOAD_LEN {
        return Err(CoreError::BadNotification(format!(
            "sequence payload too short: {} bytes",
            payload.len()
        )));
    }
    let label = payload[HASH_LEN];

    let mempool_sequence = |payload: &[u8]| -> Result<u64, CoreError> {
        if payload.len() != MEMPOOL_PAYLOAD_LEN {
            return Err(CoreError::BadNotification(format!(
                "mempool sequence payload must be {MEMPOOL_PAYLOAD_LEN} bytes, got {}",
                payload.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&payload[HASH_LEN + 1..]);
        Ok(u64::from_le_bytes(buf))
    };

    match label {
        b'A' => Ok(SequenceEvent::MempoolAdded {
            txid: parse_txid(payload)?,
            sequence: mempool_sequence(payload)?,
        }),
        b'R' => Ok(SequenceEvent::MempoolRemoved {
            txid: parse_txid(payload)?,
            sequence: mempool_sequence(payload)?,
        }),
        b'C' => Ok(SequenceEvent::BlockConnected(parse_block_hash(payload)?)),
        b'D' => Ok(SequenceEvent::BlockDisconnected(parse_block_hash(payload)?)),
        other => Err(CoreError::BadNotification(format!(
            "unknown sequence label: 0x{other:02x}"
        ))),
    }
}

fn parse_txid(payload: &[u8]) -> Result<Txid, CoreError> {
    Txid::from_slice(&payload[..HASH_LEN])
        .map_err(|e| CoreError::BadNotification(format!("bad txid in sequence payload: {e}")))
}

fn parse_block_hash(payload: &[u8]) -> Result<BlockHash, CoreError> {
    BlockHash::from_slice(&payload[..HASH_LEN])
        .map_err(|e| CoreError::BadNotification(format!("bad block hash in sequence payload: {e}")))
}
