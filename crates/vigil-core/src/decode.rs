//! Raw transaction decoding and fee inflation.
//!
//! The tracker consumes transactions through the [`TxDecoder`] trait so the
//! state machine never touches wire bytes. [`ConsensusDecoder`] is the
//! production implementation: consensus deserialization via the `bitcoin`
//! crate, plus optional prevout resolution over RPC to compute the miner fee
//! and build the enriched publication payload.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{consensus, Amount, OutPoint, Transaction, Txid};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CoreError;
use crate::rpc::NodeRpc;
use crate::types::TrackedTx;

/// Maximum number of parent transactions whose output values are cached.
/// Busy mempools re-spend outputs of the same recent parents frequently, so
/// the cache avoids refetching them on every child.
const PARENT_CACHE_CAP: usize = 20_000;

// ==============================================================================
// Decoder Trait
// ==============================================================================

/// Converts raw transaction bytes into the tracker's canonical record.
///
/// Decoding may suspend (prevout resolution is an RPC round trip), which is
/// why the event dispatcher, not the state machine, invokes it.
#[async_trait]
pub trait TxDecoder: Send + Sync {
    async fn decode(&self, bytes: &[u8]) -> Result<TrackedTx, CoreError>;
}

// ==============================================================================
// Consensus Decoder
// ==============================================================================

/// [`TxDecoder`] backed by `bitcoin` consensus deserialization.
///
/// With an RPC handle the decoder resolves each input's funding output to
/// compute the fee; failures there degrade to a zero fee rather than an
/// error, since the transaction itself decoded fine. Without RPC the fee is
/// always zero.
pub struct ConsensusDecoder {
    rpc: Option<Arc<dyn NodeRpc>>,
    /// Parent txid to output values, shared across decode calls.
    /// Mutex and not RwLock because LRU reads update recency tracking.
    parent_outputs: Mutex<LruCache<Txid, Vec<Amount>>>,
}

impl ConsensusDecoder {
    pub fn new(rpc: Option<Arc<dyn NodeRpc>>) -> Self {
        Self {
            rpc,
            parent_outputs: Mutex::new(LruCache::new(
                NonZeroUsize::new(PARENT_CACHE_CAP).expect("PARENT_CACHE_CAP is non-zero"),
            )),
        }
    }

    /// Look up output values for `parents`, fetching uncached ones over RPC.
    /// Parents that cannot be fetched or decoded are simply absent from the
    /// returned map.
    async fn parent_output_values(
        &self,
        rpc: &dyn NodeRpc,
        parents: &[Txid],
    ) -> HashMap<Txid, Vec<Amount>> {
        let mut resolved = HashMap::with_capacity(parents.len());
        let mut missing = Vec::new();
        {
            let mut cache = self.parent_outputs.lock().await;
            for parent in parents {
                match cache.get(parent) {
                    Some(values) => {
                        resolved.insert(*parent, values.clone());
                    }
                    None => missing.push(*parent),
                }
            }
        }

        if missing.is_empty() {
            return resolved;
        }

        let results = match rpc.raw_transactions(&missing).await {
            Ok(results) => results,
            Err(e) => {
                debug!(parents = missing.len(), error = %e, "prevout batch fetch failed");
                return resolved;
            }
        };

        let mut cache = self.parent_outputs.lock().await;
        for (parent, result) in missing.iter().zip(results) {
            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(%parent, error = %e, "prevout fetch failed");
                    continue;
                }
            };
            match consensus::deserialize::<Transaction>(&bytes) {
                Ok(tx) => {
                    let values: Vec<Amount> = tx.output.iter().map(|o| o.value).collect();
                    cache.put(*parent, values.clone());
                    resolved.insert(*parent, values);
                }
                Err(e) => debug!(%parent, error = %e, "prevout decode failed"),
            }
        }
        resolved
    }

    /// Compute the miner fee as sum(funding outputs) - sum(outputs).
    /// Returns zero when any prevout is unresolvable.
    async fn resolve_fee(&self, txid: &Txid, inputs: &[OutPoint], value: Amount) -> Amount {
        let Some(rpc) = &self.rpc else {
            return Amount::ZERO;
        };
        if inputs.is_empty() {
            return Amount::ZERO;
        }

        let mut seen = HashSet::new();
        let parents: Vec<Txid> = inputs
            .iter()
            .map(|op| op.txid)
            .filter(|txid| seen.insert(*txid))
            .collect();
        let values = self.parent_output_values(rpc.as_ref(), &parents).await;

        let total_in = inputs.iter().try_fold(Amount::ZERO, |acc, op| {
            let funding = values.get(&op.txid)?.get(op.vout as usize)?;
            acc.checked_add(*funding)
        });

        match total_in.and_then(|total| total.checked_sub(value)) {
            Some(fee) => fee,
            None => {
                debug!(%txid, "prevout resolution incomplete; reporting zero fee");
                Amount::ZERO
            }
        }
    }
}

#[async_trait]
impl TxDecoder for ConsensusDecoder {
    async fn decode(&self, bytes: &[u8]) -> Result<TrackedTx, CoreError> {
        let tx: Transaction =
            consensus::deserialize(bytes).map_err(|e| CoreError::Decode(e.to_string()))?;
        let txid = tx.compute_txid();

        let inputs: Vec<OutPoint> = tx
            .input
            .iter()
            .map(|input| input.previous_output)
            .filter(|outpoint| !outpoint.is_null())
            .collect();

        let value = tx
            .output
            .iter()
            .try_fold(Amount::ZERO, |acc, output| acc.checked_add(output.value))
            .ok_or_else(|| CoreError::Decode(format!("output value overflow in {txid}")))?;

        let fee = self.resolve_fee(&txid, &inputs, value).await;

        let inflated = serde_json::json!({
            "txid": txid.to_string(),
            "version": tx.version.0,
            "vsize": tx.vsize(),
            "value": value.to_sat(),
            "fee": fee.to_sat(),
            "inputs": inputs.len(),
            "outputs": tx.output.len(),
        });

        Ok(TrackedTx {
            txid,
            inputs,
            value,
            fee,
            inflated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockRpc;
    use crate::test_util::{raw_tx, spending, txid_from_byte};

    #[tokio::test]
    async fn decode_without_rpc_reports_zero_fee() {
        let decoder = ConsensusDecoder::new(None);
        let funding = txid_from_byte(7);
        let bytes = raw_tx(&[spending(funding, 0)], &[4_000, 1_000]);

        let tx = decoder.decode(&bytes).await.expect("tx must decode");
        assert_eq!(tx.value, Amount::from_sat(5_000));
        assert_eq!(tx.fee, Amount::ZERO);
        assert_eq!(tx.inputs, vec![OutPoint::new(funding, 0)]);
        assert_eq!(tx.inflated["value"], 5_000);
    }

    #[tokio::test]
    async fn decode_resolves_fee_over_rpc() {
        let parent_bytes = raw_tx(&[spending(txid_from_byte(1), 0)], &[5_000, 3_000]);
        let parent: Transaction = consensus::deserialize(&parent_bytes).unwrap();
        let parent_txid = parent.compute_txid();

        let child_bytes = raw_tx(&[spending(parent_txid, 1)], &[2_500]);

        let rpc = Arc::new(
            MockRpc::builder()
                .with_raw_tx(parent_txid, parent_bytes)
                .build(),
        );
        let decoder = ConsensusDecoder::new(Some(rpc));

        let tx = decoder.decode(&child_bytes).await.expect("tx must decode");
        assert_eq!(tx.value, Amount::from_sat(2_500));
        assert_eq!(tx.fee, Amount::from_sat(500));

        // Second decode hits the parent cache; same result.
        let again = decoder.decode(&child_bytes).await.unwrap();
        assert_eq!(again.fee, Amount::from_sat(500));
    }

    #[tokio::test]
    async fn decode_degrades_to_zero_fee_on_missing_parent() {
        let rpc = Arc::new(MockRpc::builder().build());
        let decoder = ConsensusDecoder::new(Some(rpc));
        let bytes = raw_tx(&[spending(txid_from_byte(9), 0)], &[1_000]);

        let tx = decoder.decode(&bytes).await.expect("tx must decode");
        assert_eq!(tx.fee, Amount::ZERO);
    }

    #[tokio::test]
    async fn decode_rejects_garbage() {
        let decoder = ConsensusDecoder::new(None);
        let err = decoder.decode(&[0x00, 0x01, 0x02]).await;
        assert!(matches!(err, Err(CoreError::Decode(_))));
    }
}
