//! WebSocket connection tasks.
//!
//! Each connection runs on its own tokio task and only forwards frames: inbound
//! text frames are decoded into [`ServerMsg`] at this boundary and posted to
//! the client's event channel tagged with the connection generation. The task
//! never touches client state.

use anyhow::Context;
use dragonfield_shared::net::{decode_server, encode_client, ClientMsg, ServerMsg};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::session::ConnectRequest;

/// Everything that reaches the client core from outside the tick.
#[derive(Debug)]
pub enum TransportEvent {
    Opened { generation: u64 },
    Message { generation: u64, msg: ServerMsg },
    Closed { generation: u64 },
    VersionFetched { result: anyhow::Result<String> },
    ProfileSynced { result: anyhow::Result<()> },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Handle to one live or connecting socket.
pub struct Connection {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl Connection {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues one message. Fails only if the task already ended.
    pub fn send(&self, msg: &ClientMsg) -> anyhow::Result<()> {
        let text = encode_client(msg)?;
        self.outbound
            .send(text)
            .map_err(|_| anyhow::anyhow!("connection {} is closed", self.generation))
    }

    /// Deliberate close: dropping the outbound sender makes the task send a
    /// close frame and exit.
    pub fn close(self) {
        debug!(generation = self.generation, "Close requested");
        drop(self.outbound);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns a connection task. Always ends with exactly one `Closed` event for
/// its generation, whether the connect failed, the peer went away or the
/// connection was closed on purpose.
pub fn spawn_connection(req: ConnectRequest, events: EventSender) -> Connection {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let generation = req.generation;
    let task = tokio::spawn(async move {
        if let Err(e) = run_connection(&req, outbound_rx, &events).await {
            warn!(generation, error = %e, "Connection ended with error");
        }
        let _ = events.send(TransportEvent::Closed { generation });
    });
    Connection {
        generation,
        outbound: outbound_tx,
        task,
    }
}

async fn run_connection(
    req: &ConnectRequest,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: &EventSender,
) -> anyhow::Result<()> {
    let generation = req.generation;
    let (ws, _response) = connect_async(req.url.as_str())
        .await
        .with_context(|| format!("websocket connect {}", req.url))?;
    if events.send(TransportEvent::Opened { generation }).is_err() {
        return Ok(());
    }

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => sink.send(Message::text(text)).await.context("websocket send")?,
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_server(text.as_str()) {
                    Ok(msg) => {
                        if events.send(TransportEvent::Message { generation, msg }).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(generation, error = %e, "Dropping undecodable frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("websocket read"),
            },
        }
    }
    Ok(())
}
