//! Native JSON-RPC client for Bitcoin Core compatible endpoints.
//!
//! Implements [`NodeRpc`] over HTTP JSON-RPC using `reqwest`, with basic or
//! cookie-file authentication, optional request rate limiting, a small
//! round-robin connection pool, and batched calls whose per-item errors are
//! surfaced individually.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bitcoin::hex::FromHex;
use bitcoin::Txid;
use futures::future::join_all;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header;
use tracing::{debug, trace};

use crate::error::{CoreError, RpcError};

use super::types::{ChainInfo, MempoolSnapshot};
use super::NodeRpc;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// ==============================================================================
// Wire Structs
// ==============================================================================

#[derive(serde::Serialize)]
struct WireRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<serde_json::Value>,
}

#[derive(serde::Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

/// Parse a JSON-RPC error value into a structured [`RpcError`].
fn parse_jsonrpc_error(err: &serde_json::Value) -> RpcError {
    #[derive(serde::Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(parsed) => RpcError::ServerError {
            code: parsed.code,
            message: parsed.message,
        },
        Err(_) => RpcError::InvalidResponse(format!("non-standard JSON-RPC error: {err}")),
    }
}

fn parse_batch_id(id: &serde_json::Value) -> Result<u64, RpcError> {
    if let Some(n) = id.as_u64() {
        return Ok(n);
    }
    if let Some(s) = id.as_str() {
        return s
            .parse::<u64>()
            .map_err(|e| RpcError::InvalidResponse(format!("invalid batch response id: {e}")));
    }
    Err(RpcError::InvalidResponse(format!(
        "invalid batch response id: {id}"
    )))
}

// ==============================================================================
// Authentication
// ==============================================================================

/// Resolve RPC credentials: explicit user+pass wins, then a Bitcoin Core
/// cookie file (`username:password` on the first line), then no auth.
fn resolve_auth(
    user: Option<&str>,
    pass: Option<&str>,
    cookie_file: Option<&Path>,
) -> Result<Option<(String, String)>, CoreError> {
    match (user, pass) {
        (Some(u), Some(p)) => return Ok(Some((u.to_owned(), p.to_owned()))),
        (Some(_), None) | (None, Some(_)) => {
            return Err(CoreError::Config(
                "both rpc user and rpc pass must be set together".to_owned(),
            ));
        }
        (None, None) => {}
    }

    let Some(cookie_file) = cookie_file else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(cookie_file).map_err(|e| {
        CoreError::Config(format!(
            "failed to read rpc cookie file {}: {e}",
            cookie_file.display()
        ))
    })?;
    let pair = content
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .and_then(|line| line.split_once(':'))
        .filter(|(u, p)| !u.is_empty() && !p.is_empty())
        .ok_or_else(|| {
            CoreError::Config(format!(
                "rpc cookie file {} must contain `username:password`",
                cookie_file.display()
            ))
        })?;

    Ok(Some((pair.0.to_owned(), pair.1.to_owned())))
}

fn parse_endpoint(connection: &str) -> Result<String, CoreError> {
    let parsed = reqwest::Url::parse(connection).map_err(|e| {
        CoreError::Config(format!(
            "invalid rpc endpoint `{connection}`: expected HTTP(S) URL ({e})"
        ))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(connection.to_owned()),
        other => Err(CoreError::Config(format!(
            "unsupported rpc endpoint scheme `{other}`; expected http or https"
        ))),
    }
}

// ==============================================================================
// Client
// ==============================================================================

/// Bitcoin Core JSON-RPC client over HTTP(S).
///
/// Holds a fixed pool of `reqwest` clients and assigns each outbound request
/// to one of them round-robin by request id, so sustained snapshot and
/// backfill traffic spreads across distinct connection pools.
#[derive(Debug)]
pub struct HttpRpcClient {
    clients: Vec<reqwest::Client>,
    url: String,
    auth: Option<(String, String)>,
    limiter: Option<DirectRateLimiter>,
    batch_chunk_size: usize,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create a new client for an HTTP(S) endpoint.
    ///
    /// `pool_count` is the number of independent HTTP clients to rotate
    /// through; `pool_size` caps idle connections per client. If
    /// `requests_per_second` is set, calls are rate-limited per outbound
    /// HTTP request (a batched call counts as one request).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection: &str,
        user: Option<&str>,
        pass: Option<&str>,
        cookie_file: Option<&Path>,
        pool_count: usize,
        pool_size: usize,
        requests_per_second: Option<u32>,
        batch_chunk_size: usize,
    ) -> Result<Self, CoreError> {
        if batch_chunk_size == 0 {
            return Err(CoreError::Config(
                "rpc batch chunk size must be at least 1".to_owned(),
            ));
        }
        if pool_count == 0 || pool_size == 0 {
            return Err(CoreError::Config(
                "rpc pool count and pool size must be at least 1".to_owned(),
            ));
        }
        let auth = resolve_auth(user, pass, cookie_file)?;
        let url = parse_endpoint(connection)?;

        let clients = (0..pool_count)
            .map(|_| {
                reqwest::Client::builder()
                    .connect_timeout(Duration::from_secs(10))
                    .timeout(Duration::from_secs(30))
                    .pool_max_idle_per_host(pool_size)
                    .tcp_nodelay(true)
                    .build()
                    .expect("reqwest client builder uses valid static config")
            })
            .collect();

        let limiter = match requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::Config("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            clients,
            url,
            auth,
            limiter,
            batch_chunk_size,
            next_id: AtomicU64::new(initial_request_id()),
        })
    }

    /// Atomically reserve `count` consecutive request IDs.
    fn reserve_request_ids(&self, count: u64) -> u64 {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    fn client_for(&self, id: u64) -> &reqwest::Client {
        &self.clients[(id % self.clients.len() as u64) as usize]
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.wait_for_rate_limit().await;
        let id = self.reserve_request_ids(1);
        debug!(rpc.id = id, rpc.method = method, "rpc call");
        let req = WireRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let mut builder = self
            .client_for(id)
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&req);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(RpcError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(RpcError::Transport)?;
        trace!(rpc.id = id, rpc.method = method, %status, body = %body, "rpc response");

        let decoded: WireResponse = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC response: {e}; body={body}"))
        })?;

        if let Some(err) = decoded.error {
            return Err(parse_jsonrpc_error(&err).into());
        }
        Ok(decoded.result.unwrap_or(serde_json::Value::Null))
    }

    /// Issue one JSON-RPC batch request. The response array is re-ordered by
    /// id; each slot carries its own result or error.
    async fn batch(
        &self,
        calls: &[(&str, Vec<serde_json::Value>)],
    ) -> Result<Vec<Result<serde_json::Value, RpcError>>, CoreError> {
        self.wait_for_rate_limit().await;
        let start_id = self.reserve_request_ids(calls.len() as u64);
        debug!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = calls.len(),
            "rpc batch call"
        );
        let requests: Vec<WireRequest> = calls
            .iter()
            .enumerate()
            .map(|(offset, (method, params))| WireRequest {
                jsonrpc: "2.0",
                id: start_id + offset as u64,
                method: *method,
                params: params.clone(),
            })
            .collect();

        let mut builder = self
            .client_for(start_id)
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&requests);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(RpcError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(RpcError::Transport)?;
        trace!(
            rpc.batch_start_id = start_id,
            %status,
            body_len = body.len(),
            "rpc batch response"
        );

        let decoded: Vec<WireResponse> = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC batch response: {e}; body={body}"))
        })?;

        let mut by_id: HashMap<u64, WireResponse> = HashMap::with_capacity(decoded.len());
        for item in decoded {
            by_id.insert(parse_batch_id(&item.id)?, item);
        }

        let ordered = (start_id..start_id + calls.len() as u64)
            .map(|id| match by_id.remove(&id) {
                None => Err(RpcError::MissingBatchItem { id }),
                Some(item) => match item.error {
                    Some(err) => Err(parse_jsonrpc_error(&err)),
                    None => Ok(item.result.unwrap_or(serde_json::Value::Null)),
                },
            })
            .collect();
        Ok(ordered)
    }

    /// Split a large batch into chunks sized for node/proxy payload limits,
    /// issued concurrently to avoid serial round-trip latency. A transport
    /// failure on any chunk fails the whole call (the reconciler skips the
    /// batch and moves on).
    async fn batch_chunked(
        &self,
        calls: &[(&str, Vec<serde_json::Value>)],
    ) -> Result<Vec<Result<serde_json::Value, RpcError>>, CoreError> {
        let chunk_futures: Vec<_> = calls
            .chunks(self.batch_chunk_size)
            .map(|chunk| self.batch(chunk))
            .collect();
        let mut results = Vec::with_capacity(calls.len());
        for chunk in join_all(chunk_futures).await {
            results.extend(chunk?);
        }
        Ok(results)
    }
}

#[async_trait]
impl NodeRpc for HttpRpcClient {
    async fn mempool_snapshot(&self) -> Result<MempoolSnapshot, CoreError> {
        // verbose=false, mempool_sequence=true
        let raw = self
            .call(
                "getrawmempool",
                vec![serde_json::json!(false), serde_json::json!(true)],
            )
            .await?;
        let snapshot: MempoolSnapshot = serde_json::from_value(raw).map_err(|e| {
            RpcError::InvalidResponse(format!("invalid getrawmempool result: {e}"))
        })?;
        Ok(snapshot)
    }

    async fn raw_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<Result<Vec<u8>, RpcError>>, CoreError> {
        if txids.is_empty() {
            return Ok(Vec::new());
        }

        let calls: Vec<(&str, Vec<serde_json::Value>)> = txids
            .iter()
            .map(|txid| {
                (
                    "getrawtransaction",
                    vec![
                        serde_json::json!(txid.to_string()),
                        serde_json::json!(false),
                    ],
                )
            })
            .collect();

        let raw_results = self.batch_chunked(&calls).await?;
        let decoded = raw_results
            .into_iter()
            .map(|item| {
                item.and_then(|value| {
                    let hex = value.as_str().ok_or_else(|| {
                        RpcError::InvalidResponse(format!(
                            "getrawtransaction returned non-string result: {value}"
                        ))
                    })?;
                    Vec::<u8>::from_hex(hex).map_err(|e| {
                        RpcError::InvalidResponse(format!("invalid raw transaction hex: {e}"))
                    })
                })
            })
            .collect();
        Ok(decoded)
    }

    async fn blockchain_info(&self) -> Result<ChainInfo, CoreError> {
        let raw = self.call("getblockchaininfo", Vec::new()).await?;
        let info: ChainInfo = serde_json::from_value(raw).map_err(|e| {
            RpcError::InvalidResponse(format!("invalid getblockchaininfo result: {e}"))
        })?;
        Ok(info)
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    #[test]
    fn parse_batch_id_accepts_u64_and_string() {
        assert_eq!(parse_batch_id(&serde_json::json!(42)).unwrap(), 42);
        assert_eq!(parse_batch_id(&serde_json::json!("123")).unwrap(), 123);
        assert!(parse_batch_id(&serde_json::json!(true)).is_err());
    }

    #[test]
    fn parse_jsonrpc_error_standard_shape() {
        let err = parse_jsonrpc_error(&serde_json::json!({"code": -5, "message": "not found"}));
        assert!(matches!(err, RpcError::ServerError { code: -5, .. }));
    }

    #[test]
    fn parse_jsonrpc_error_non_standard_shape() {
        let err = parse_jsonrpc_error(&serde_json::json!("boom"));
        assert!(matches!(err, RpcError::InvalidResponse(_)));
    }

    #[test]
    fn parse_endpoint_rejects_non_http_scheme() {
        let err = parse_endpoint("ftp://example.com").expect_err("must reject ftp");
        assert!(err.to_string().contains("unsupported rpc endpoint scheme"));
    }

    #[test]
    fn resolve_auth_rejects_partial_credentials() {
        let err = resolve_auth(Some("user"), None, None).expect_err("must reject partial auth");
        assert!(err.to_string().contains("must be set together"));
    }

    #[test]
    fn resolve_auth_reads_cookie_file() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time must be after unix epoch")
            .as_nanos();
        let cookie_path = std::env::temp_dir().join(format!("vigil-core-cookie-{unique}.txt"));
        fs::write(&cookie_path, "__cookie__:token\n").expect("cookie file must be writable");

        let auth = resolve_auth(None, None, Some(&cookie_path)).expect("cookie must parse");
        assert_eq!(auth, Some(("__cookie__".to_owned(), "token".to_owned())));

        let _ = fs::remove_file(cookie_path);
    }

    #[test]
    fn client_rejects_zero_pool() {
        let err = HttpRpcClient::new("http://127.0.0.1:8332", None, None, None, 0, 8, None, 25)
            .expect_err("must reject zero pool count");
        assert!(err.to_string().contains("pool count"));
    }
}
