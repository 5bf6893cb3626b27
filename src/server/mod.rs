//! Line-delimited JSON transport
//!
//! Each line is one frame `{"event": ..., "payload": ...}`. Requests are
//! answered on `<event>:result`; broadcasts are forwarded under their own
//! event name. Every connection gets its own handler registry and metrics
//! subscription, which stops when the connection closes.

use crate::app::ControlPlane;
use crate::logging::Broadcaster;
use crate::protocol::HandlerRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound lines queued per connection
const OUTBOUND_CAPACITY: usize = 64;

/// Inbound frame
#[derive(Debug, Clone, Deserialize)]
pub struct RequestFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Serialize)]
struct OutboundFrame<'a, T: Serialize> {
    event: &'a str,
    payload: &'a T,
}

/// Serialize one frame as a newline-terminated line
pub fn encode_frame<T: Serialize>(event: &str, payload: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(&OutboundFrame { event, payload })?;
    line.push('\n');
    Ok(line)
}

/// Frames addressed to a single connection
struct ConnectionSink {
    id: Uuid,
    tx: mpsc::Sender<String>,
}

impl Broadcaster for ConnectionSink {
    fn emit(&self, event: &str, payload: Value) {
        match encode_frame(event, &payload) {
            Ok(line) => {
                // A slow client skips pushes rather than stalling them
                if let Err(e) = self.tx.try_send(line) {
                    tracing::debug!("Dropped {} for {}: {}", event, self.id, e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode {} frame: {}", event, e),
        }
    }
}

/// Accept connections until the listener fails
pub async fn serve(listener: TcpListener, plane: Arc<ControlPlane>) -> io::Result<()> {
    tracing::info!("Listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let plane = plane.clone();
        tokio::spawn(async move {
            let id = Uuid::new_v4();
            tracing::info!("Client connected: {} ({})", id, peer);
            handle_connection(stream, plane, id).await;
            tracing::info!("Client disconnected: {}", id);
        });
    }
}

async fn handle_connection(stream: TcpStream, plane: Arc<ControlPlane>, id: Uuid) {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let subscription = plane.metrics_subscription(Arc::new(ConnectionSink { id, tx: tx.clone() }));
    let registry = Arc::new(plane.build_registry(subscription.clone()));

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::debug!("Write to {} failed: {}", id, e);
                break;
            }
        }
    });

    let mut events = plane.broadcaster.subscribe();
    let broadcast_tx = tx.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(frame) => match encode_frame(&frame.event, &frame.payload) {
                    Ok(line) => {
                        if broadcast_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Failed to encode {} frame: {}", frame.event, e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Client {} missed {} broadcast frames", id, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RequestFrame>(&line) {
                    Ok(frame) => spawn_request(registry.clone(), frame, tx.clone()),
                    Err(e) => tracing::warn!("Ignoring invalid frame from {}: {}", id, e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Read from {} failed: {}", id, e);
                break;
            }
        }
    }

    if subscription.stop() {
        tracing::info!("Metrics subscription of {} cleaned up", id);
    }
    forward_task.abort();
    // The subscription's sink holds a sender too
    drop(registry);
    drop(subscription);
    drop(tx);
    // Drains responses still in flight
    let _ = writer_task.await;
}

fn spawn_request(registry: Arc<HandlerRegistry>, frame: RequestFrame, tx: mpsc::Sender<String>) {
    tokio::spawn(async move {
        let envelope = registry.dispatch(&frame.event, frame.payload).await;
        let event = format!("{}:result", frame.event);
        match encode_frame(&event, &envelope) {
            Ok(line) => {
                // Receiver gone means the client went away
                let _ = tx.send(line).await;
            }
            Err(e) => tracing::warn!("Failed to encode {} frame: {}", event, e),
        }
    });
}
