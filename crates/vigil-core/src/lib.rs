//! Core library for **Vigil** — a live Bitcoin mempool tracker.
//!
//! Vigil consumes a node's three notification streams (sequence, rawtx,
//! rawblock), reconciles them against the authoritative RPC snapshot, and
//! maintains a per-txid lifecycle state machine that tolerates any arrival
//! order of announcements, bodies, removals, and confirmations. Downstream
//! consumers read counts, statuses, and spend provenance through the
//! [`tracker::Tracker`] query API and receive count notifications through a
//! [`publish::Publisher`] registry.
//!
//! The crate is intentionally transport-agnostic: notification drivers
//! implement [`stream::NotificationSource`], and the RPC layer sits behind
//! the [`rpc::NodeRpc`] trait, which can be backed by HTTP JSON-RPC, a mock,
//! or any future transport.

pub mod decode;
pub mod error;
pub mod publish;
pub mod rpc;
pub mod stream;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{CoreError, RpcError};
pub use tracker::{Dispatcher, Reconciler, Tracker};
pub use types::{Profile, SpendRef, TrackedTx, TxStatus};
