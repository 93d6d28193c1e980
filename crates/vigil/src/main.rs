mod cli;
mod server;
mod zmq_source;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, WrapErr};
use tokio::sync::{broadcast, watch};

use vigil_core::decode::ConsensusDecoder;
use vigil_core::rpc::{HttpRpcClient, NodeRpc};
use vigil_core::stream::{NotificationSource, StreamKind};
use vigil_core::tracker::{Dispatcher, Reconciler, Tracker};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    // Connect to Bitcoin Core RPC and verify the connection succeeds before
    // subscribing to anything.
    let rpc: Arc<dyn NodeRpc> = Arc::new(HttpRpcClient::new(
        &args.connection,
        args.rpc_user.as_deref(),
        args.rpc_pass.as_deref(),
        args.rpc_cookie_file.as_deref(),
        args.rpc_pool_count,
        args.rpc_pool_size,
        args.rpc_requests_per_second,
        args.rpc_batch_chunk_size,
    )?);

    let chain_info = rpc.blockchain_info().await.map_err(|err| {
        eyre!(rpc_connect_hint(&args.connection, &err.to_string()))
            .wrap_err("while attempting to connect to Bitcoin Core RPC")
    })?;
    tracing::info!(
        chain = %chain_info.chain,
        blocks = chain_info.blocks,
        "connected to Bitcoin Core"
    );
    if chain_info.pruned {
        tracing::warn!("node is pruned — prevout resolution for old parents may fail");
    }

    // The tracker publishes into the broadcast feed; WebSocket sessions
    // subscribe to it in the server.
    let (feed, _) = broadcast::channel(256);
    let publisher = Arc::new(server::BroadcastPublisher::new(feed.clone()));
    let tracker = Arc::new(Tracker::new(args.profile.into(), publisher));
    let decoder = Arc::new(ConsensusDecoder::new(Some(rpc.clone())));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One dispatcher loop per notification stream.
    let source = zmq_source::ZmqSource::new(
        args.zmq_sequence.clone(),
        args.zmq_rawtx.clone(),
        args.zmq_rawblock.clone(),
    );
    let sequence_rx = source.subscribe(StreamKind::Sequence).await?;
    let rawtx_rx = source.subscribe(StreamKind::RawTx).await?;
    let rawblock_rx = source.subscribe(StreamKind::RawBlock).await?;

    let dispatcher = Arc::new(Dispatcher::new(tracker.clone(), decoder.clone()));
    {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run_sequence(sequence_rx).await });
    }
    {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run_rawtx(rawtx_rx).await });
    }
    {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run_rawblock(rawblock_rx).await });
    }

    // Snapshot load, backfill, and periodic resync.
    let reconciler = Reconciler::new(
        tracker.clone(),
        rpc,
        decoder,
        shutdown_rx,
        Duration::from_secs(args.resync_interval_secs),
    );
    tokio::spawn(reconciler.run());

    let state = server::AppState { tracker, feed };
    let router = server::build_router(state);

    let bind_addr = format!("{}:{}", args.bind, args.port);
    if args.bind == "0.0.0.0" {
        tracing::warn!("server is bound to 0.0.0.0 — it is accessible from the network");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("bind TCP listener")?;

    tracing::info!("listening on {bind_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("run HTTP server")?;

    Ok(())
}

/// Turn a failed startup probe into an actionable error.
///
/// Only the RPC endpoint is probed eagerly; the ZMQ stream endpoints are
/// connected lazily with retry, so a bad `--zmq-*` flag surfaces as repeated
/// `zmq connect failed` warnings rather than a startup error. The trailing
/// note points users there when RPC itself was fine but they got here by
/// fixing the wrong flag.
fn rpc_connect_hint(connection: &str, source_error: &str) -> String {
    let hint = if source_error.contains("Connection refused") {
        Some("is bitcoind running, and does --connection point at its rpcport (8332 on mainnet)?")
    } else if source_error.contains("Could not resolve host") || source_error.contains("dns error")
    {
        Some("the endpoint hostname does not resolve; check --connection and your DNS")
    } else if source_error.contains("401") || source_error.contains("403") {
        Some(
            "the node rejected the credentials; pass --rpc-cookie-file pointing at the node's \
             .cookie, or --rpc-user/--rpc-pass matching rpcuser/rpcpassword in bitcoin.conf",
        )
    } else if source_error.contains("timed out") {
        Some(
            "the endpoint accepted the connection but never answered; check rpcallowip/rpcbind \
             on the node and any firewall in between",
        )
    } else {
        None
    };

    let mut message =
        format!("mempool tracking needs a reachable node; probing `{connection}` failed: {source_error}");
    if let Some(hint) = hint {
        message.push_str("\nhint: ");
        message.push_str(hint);
    }
    message.push_str(
        "\nnote: ZMQ endpoints are not probed at startup — if RPC works but no transactions \
         arrive, check the zmqpubsequence/zmqpubrawtx/zmqpubrawblock lines in bitcoin.conf \
         against the --zmq-* flags",
    );
    message
}
