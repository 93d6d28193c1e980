//! End-to-end tracker scenarios: arrival-order races, startup queuing, and
//! backfill degradation, driven through the public API with a mock RPC.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    consensus, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use tokio::sync::watch;

use vigil_core::decode::ConsensusDecoder;
use vigil_core::publish::Publisher;
use vigil_core::rpc::mock::MockRpc;
use vigil_core::rpc::MempoolSnapshot;
use vigil_core::tracker::{Reconciler, Tracker};
use vigil_core::types::{Profile, SpendRef, TrackedTx, TxStatus};

// ==============================================================================
// Helpers
// ==============================================================================

fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

fn outpoint(b: u8, vout: u32) -> OutPoint {
    OutPoint::new(txid_from_byte(b), vout)
}

fn make_tx(byte: u8, inputs: &[OutPoint], value_sats: u64, fee_sats: u64) -> TrackedTx {
    let txid = txid_from_byte(byte);
    TrackedTx {
        txid,
        inputs: inputs.to_vec(),
        value: Amount::from_sat(value_sats),
        fee: Amount::from_sat(fee_sats),
        inflated: serde_json::json!({ "txid": txid.to_string() }),
    }
}

/// A consensus transaction whose txid is unique per `salt`.
fn consensus_tx(salt: u64) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(txid_from_byte(0x7f), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(1_000 + salt),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

#[derive(Default)]
struct RecordingPublisher {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl RecordingPublisher {
    fn last_count(&self) -> Option<u64> {
        let payloads = self.payloads.lock().unwrap();
        let last = payloads.last()?;
        let value: serde_json::Value = serde_json::from_slice(last).ok()?;
        value["count"].as_u64()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, payload: &[u8]) {
        self.payloads.lock().unwrap().push(payload.to_vec());
    }
}

fn tracker(profile: Profile) -> (Arc<Tracker>, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::default());
    (
        Arc::new(Tracker::new(profile, publisher.clone())),
        publisher,
    )
}

async fn loaded(profile: Profile) -> (Arc<Tracker>, Arc<RecordingPublisher>) {
    let (t, p) = tracker(profile);
    t.load_snapshot(MempoolSnapshot {
        txids: Vec::new(),
        sequence: 100,
    })
    .await;
    (t, p)
}

// ==============================================================================
// Scenarios
// ==============================================================================

#[tokio::test]
async fn normal_path_announce_then_body() {
    let (t, p) = loaded(Profile::Public).await;
    let aa = txid_from_byte(0xaa);

    t.register(aa, Some(101), true).await;
    t.insert(make_tx(0xaa, &[outpoint(0x99, 0)], 90, 10)).await;

    assert_eq!(t.count().await, 1);
    assert_eq!(t.status(&aa).await, TxStatus::Live);
    assert_eq!(
        t.lookup_spend(&outpoint(0x99, 0)).await,
        Some(SpendRef {
            spender: aa,
            input_index: 0
        })
    );
    assert_eq!(p.last_count(), Some(1));
}

#[tokio::test]
async fn out_of_order_body_before_announce() {
    let (t, _) = loaded(Profile::Public).await;
    let bb = txid_from_byte(0xbb);

    t.insert(make_tx(0xbb, &[outpoint(0x98, 1)], 80, 5)).await;
    assert_eq!(t.count().await, 0);

    t.register(bb, Some(102), true).await;
    assert_eq!(t.count().await, 1);
    assert_eq!(t.status(&bb).await, TxStatus::Live);
}

#[tokio::test]
async fn drop_before_body_tombstones_then_clears() {
    let (t, _) = loaded(Profile::Public).await;
    let cc = txid_from_byte(0xcc);

    t.register(cc, Some(103), true).await;
    t.remove(cc).await;
    assert_eq!(t.count().await, 0);
    assert_eq!(t.status(&cc).await, TxStatus::Dropped);

    // The late body clears the tombstone without admitting the tx.
    t.insert(make_tx(0xcc, &[outpoint(0x97, 0)], 60, 2)).await;
    assert_eq!(t.count().await, 0);
    assert_eq!(t.status(&cc).await, TxStatus::New);

    // A fresh announce sequence starts a new lifecycle.
    t.register(cc, Some(105), true).await;
    assert_eq!(t.status(&cc).await, TxStatus::Announced);
}

#[tokio::test]
async fn block_confirmation_beats_late_body() {
    let (t, p) = loaded(Profile::Public).await;
    let dd = txid_from_byte(0xdd);
    let ee = txid_from_byte(0xee);

    t.register(dd, Some(106), true).await;
    t.insert(make_tx(0xdd, &[outpoint(0x96, 0)], 40, 1)).await;
    assert_eq!(t.count().await, 1);

    t.apply_block(vec![dd, ee]).await;
    assert_eq!(t.count().await, 0);
    assert_eq!(p.last_count(), Some(0));

    // ee's body was in flight while the block landed.
    t.insert(make_tx(0xee, &[outpoint(0x95, 0)], 30, 1)).await;
    assert_eq!(t.count().await, 0);
    assert_eq!(t.status(&ee).await, TxStatus::Block);
    assert_eq!(t.status(&dd).await, TxStatus::Block);
}

#[tokio::test]
async fn startup_queuing_defers_until_snapshot() {
    let (t, _) = tracker(Profile::Personal);
    let ff = txid_from_byte(0xf0);
    let gg = txid_from_byte(0x60);

    t.register(ff, Some(50), true).await;
    t.remove(gg).await;
    assert_eq!(t.count().await, 0);

    t.load_snapshot(MempoolSnapshot {
        txids: vec![gg],
        sequence: 100,
    })
    .await;

    // ff predates the snapshot anchor; gg was counted and then dropped.
    assert_eq!(t.status(&ff).await, TxStatus::New);
    assert_eq!(t.status(&gg).await, TxStatus::Dropped);
    assert_eq!(t.count().await, 0);
}

#[tokio::test]
async fn repeated_events_are_idempotent() {
    let (t, _) = loaded(Profile::Personal).await;
    let x = txid_from_byte(0x42);

    t.register(x, Some(110), true).await;
    t.register(x, Some(111), true).await;
    assert_eq!(t.count().await, 1);

    t.remove(x).await;
    t.remove(x).await;
    assert_eq!(t.count().await, 0);

    t.apply_block(vec![x]).await;
    let after_first = t.count().await;
    t.apply_block(vec![x]).await;
    assert_eq!(t.count().await, after_first);
}

#[tokio::test]
async fn backfill_with_partial_failures_keeps_snapshot_count() {
    // 120 pool entries; three bodies in the second batch fail to fetch.
    let txs: Vec<Transaction> = (0..120).map(consensus_tx).collect();
    let txids: Vec<Txid> = txs.iter().map(|tx| tx.compute_txid()).collect();

    let mut builder = MockRpc::builder().with_snapshot(5_000, txids.clone());
    for tx in &txs {
        builder = builder.with_raw_tx(tx.compute_txid(), consensus::serialize(tx));
    }
    for txid in &txids[60..63] {
        builder = builder.with_failing(*txid);
    }

    let (t, p) = tracker(Profile::Personal);
    let (_shutdown, shutdown_rx) = watch::channel(false);
    let mut reconciler = Reconciler::new(
        t.clone(),
        Arc::new(builder.build()),
        Arc::new(ConsensusDecoder::new(None)),
        shutdown_rx,
        Duration::ZERO,
    );

    reconciler.reconcile_once().await.expect("must reconcile");

    assert_eq!(t.count().await, 120, "count reflects the snapshot");
    assert!(t.is_done().await);
    assert_eq!(p.last_count(), Some(120));

    let mut live = 0;
    let mut announced = 0;
    for txid in &txids {
        match t.status(txid).await {
            TxStatus::Live => live += 1,
            TxStatus::Announced => announced += 1,
            other => panic!("unexpected status {other} for {txid}"),
        }
    }
    assert_eq!(live, 117);
    assert_eq!(announced, 3);
}
