//! Bitcoin Core RPC abstraction layer.
//!
//! Defines the [`NodeRpc`] trait and provides an HTTP JSON-RPC
//! implementation ([`HttpRpcClient`]) plus a test mock (`mock::MockRpc`).

mod http;
pub mod mock;
pub mod types;

pub use http::HttpRpcClient;
pub use types::{ChainInfo, MempoolSnapshot};

use async_trait::async_trait;
use bitcoin::Txid;

use crate::error::{CoreError, RpcError};

/// Minimal trait covering the Bitcoin Core RPC methods that Vigil needs.
///
/// Implementations are expected to handle authentication, connection
/// management, and response deserialization internally.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Fetch the authoritative mempool snapshot: the full set of unconfirmed
    /// txids paired with the node's current mempool sequence number.
    async fn mempool_snapshot(&self) -> Result<MempoolSnapshot, CoreError>;

    /// Fetch raw transaction bytes for many txids, batched into one or more
    /// JSON-RPC batch calls.
    ///
    /// The outer error covers transport or whole-batch failures. Each inner
    /// result carries the per-item outcome, in the same order as `txids`, so
    /// a single missing transaction does not poison the rest of the batch.
    async fn raw_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<Result<Vec<u8>, RpcError>>, CoreError>;

    /// Fetch basic chain info (network, block count, pruning status).
    async fn blockchain_info(&self) -> Result<ChainInfo, CoreError>;
}
