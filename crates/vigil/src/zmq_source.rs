//! ZMQ driver for Bitcoin Core's notification channels.
//!
//! Each subscription spawns a pump task that connects to the configured
//! endpoint, forwards body frames into a bounded channel, and reconnects
//! with a delay after any transport error. The pump never blocks on the
//! consumer: when the channel is full the payload is dropped, and the
//! tracker's periodic resync repairs the gap.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket, ZmqError};

use vigil_core::error::CoreError;
use vigil_core::stream::{NotificationSource, StreamKind};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CHANNEL_DEPTH: usize = 1024;

/// Bitcoin Core ZMQ notification source, one endpoint per stream kind.
pub struct ZmqSource {
    endpoints: HashMap<StreamKind, String>,
}

impl ZmqSource {
    pub fn new(sequence: String, rawtx: String, rawblock: String) -> Self {
        let endpoints = HashMap::from([
            (StreamKind::Sequence, sequence),
            (StreamKind::RawTx, rawtx),
            (StreamKind::RawBlock, rawblock),
        ]);
        Self { endpoints }
    }
}

#[async_trait]
impl NotificationSource for ZmqSource {
    async fn subscribe(&self, kind: StreamKind) -> Result<mpsc::Receiver<Vec<u8>>, CoreError> {
        let endpoint = self.endpoints.get(&kind).cloned().ok_or_else(|| {
            CoreError::Config(format!(
                "no endpoint configured for the {} stream",
                kind.topic()
            ))
        })?;
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::spawn(pump(endpoint, kind.topic(), tx));
        Ok(rx)
    }
}

/// Connect-read-reconnect loop for one stream. Ends when the receiver side
/// of the channel is gone.
async fn pump(endpoint: String, topic: &'static str, tx: mpsc::Sender<Vec<u8>>) {
    loop {
        match subscribe_socket(&endpoint, topic).await {
            Ok(mut socket) => {
                info!(%endpoint, topic, "subscribed to notification stream");
                read_until_error(&mut socket, topic, &tx).await;
            }
            Err(e) => warn!(%endpoint, topic, error = %e, "zmq connect failed"),
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn subscribe_socket(endpoint: &str, topic: &str) -> Result<SubSocket, ZmqError> {
    let mut socket = SubSocket::new();
    socket.connect(endpoint).await?;
    socket.subscribe(topic).await?;
    Ok(socket)
}

async fn read_until_error(socket: &mut SubSocket, topic: &str, tx: &mpsc::Sender<Vec<u8>>) {
    loop {
        match socket.recv().await {
            Ok(message) => {
                // Bitcoin Core frames: [topic, body, publisher sequence].
                let Some(body) = message.get(1) else {
                    warn!(topic, "notification missing body frame");
                    continue;
                };
                match tx.try_send(body.to_vec()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(topic, "consumer lagging; dropping payload")
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
            Err(e) => {
                warn!(topic, error = %e, "zmq read failed; reconnecting");
                return;
            }
        }
    }
}
