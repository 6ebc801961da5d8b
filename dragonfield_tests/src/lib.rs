//! Test support: an in-process WebSocket server speaking the game's JSON
//! protocol, a scripted HTTP backend, and helpers to drive a client core.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use dragonfield_client::{
    http::Backend, input::InputState, mode::Mode, session::SessionAction, transport::TransportEvent,
    view::Frame, ClientCore, Effect, GameClient,
};
use dragonfield_shared::{
    config::ClientConfig,
    net::{decode_server, ProfileUpdate},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    handshake::server::{ErrorResponse, Request, Response},
    Message,
};
use tracing::debug;

pub const FRAME: Duration = Duration::from_millis(16);

/// Installs a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Default config for tests, with a known client version.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        client_version: "test-1".into(),
        ..ClientConfig::default()
    }
}

/// One accepted client connection, seen from the server side.
pub struct MockConn {
    pub query: Vec<(String, String)>,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockConn {
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn send_json(&self, value: Value) -> anyhow::Result<()> {
        self.to_client
            .send(value.to_string())
            .map_err(|_| anyhow::anyhow!("client connection gone"))
    }

    pub async fn recv_json(&mut self, timeout: Duration) -> anyhow::Result<Value> {
        let text = tokio::time::timeout(timeout, self.from_client.recv())
            .await
            .context("timed out waiting for client message")?
            .context("client connection gone")?;
        serde_json::from_str(&text).context("client sent invalid json")
    }

    /// Waits for the next message of the given `type`, skipping others.
    pub async fn recv_type(&mut self, ty: &str, timeout: Duration) -> anyhow::Result<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let value = self.recv_json(left).await?;
            if value["type"] == ty {
                return Ok(value);
            }
        }
    }

    /// Server-side close.
    pub fn close(self) {
        drop(self.to_client);
    }
}

/// WebSocket server on an ephemeral local port.
pub struct MockServer {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<MockConn>,
}

impl MockServer {
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock server")?;
        let addr = listener.local_addr().context("local_addr")?;
        let (conns_tx, conns) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let conns_tx = conns_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, conns_tx).await {
                        debug!(%peer, error = %e, "Mock connection ended");
                    }
                });
            }
        });
        Ok(Self { addr, conns })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn accept(&mut self, timeout: Duration) -> anyhow::Result<MockConn> {
        tokio::time::timeout(timeout, self.conns.recv())
            .await
            .context("timed out waiting for a connection")?
            .context("mock server stopped")
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    conns: mpsc::UnboundedSender<MockConn>,
) -> anyhow::Result<()> {
    let mut uri = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        uri = req.uri().to_string();
        Ok::<_, ErrorResponse>(resp)
    })
    .await
    .context("websocket handshake")?;

    let parsed = reqwest::Url::parse(&format!("ws://mock{uri}")).context("request uri")?;
    let query = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let (to_client, mut outbound) = mpsc::unbounded_channel::<String>();
    let (inbound, from_client) = mpsc::unbounded_channel::<String>();
    conns
        .send(MockConn {
            query,
            to_client,
            from_client,
        })
        .map_err(|_| anyhow::anyhow!("test dropped the server"))?;

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => sink.send(Message::text(text)).await?,
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound.send(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
    Ok(())
}

/// Backend with a fixed version that records profile syncs.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    pub version: Arc<Mutex<String>>,
    pub profiles: Arc<Mutex<Vec<ProfileUpdate>>>,
}

impl ScriptedBackend {
    pub fn new(version: &str) -> Self {
        Self {
            version: Arc::new(Mutex::new(version.to_string())),
            profiles: Arc::default(),
        }
    }

    pub fn set_version(&self, version: &str) {
        if let Ok(mut v) = self.version.lock() {
            *v = version.to_string();
        }
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn fetch_version(&self) -> anyhow::Result<String> {
        let v = self
            .version
            .lock()
            .map_err(|_| anyhow::anyhow!("version lock poisoned"))?;
        Ok(v.clone())
    }

    async fn sync_profile(&self, profile: &ProfileUpdate) -> anyhow::Result<()> {
        self.profiles
            .lock()
            .map_err(|_| anyhow::anyhow!("profile lock poisoned"))?
            .push(profile.clone());
        Ok(())
    }
}

/// Runs the client until `done` holds, or fails after `timeout`.
pub async fn drive_until<B, F>(
    client: &mut GameClient<B>,
    timeout: Duration,
    mut done: F,
) -> anyhow::Result<()>
where
    B: Backend,
    F: FnMut(&GameClient<B>) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !done(client) {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not reached within {timeout:?}");
        }
        let _ = tokio::time::timeout(Duration::from_millis(50), client.run_frame()).await;
    }
    Ok(())
}

/// Runs the client for a fixed wall-clock time and returns the frames seen.
pub async fn drive_for<B: Backend>(client: &mut GameClient<B>, duration: Duration) -> Vec<Frame> {
    let deadline = tokio::time::Instant::now() + duration;
    let mut frames = Vec::new();
    while tokio::time::Instant::now() < deadline {
        if let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_millis(50), client.run_frame()).await
        {
            frames.push(frame);
        }
    }
    frames
}

/// A synchronous core in Playing mode with an open connection. Returns the
/// core and the connection generation.
pub fn connected_core(cfg: ClientConfig) -> anyhow::Result<(ClientCore, u64)> {
    let mut core = ClientCore::new(cfg)?;
    core.set_mode(Mode::Playing);
    let generation = core
        .drain_effects()
        .into_iter()
        .find_map(|e| match e {
            Effect::Session(SessionAction::Open(req)) => Some(req.generation),
            _ => None,
        })
        .context("no connection was opened")?;
    core.handle(TransportEvent::Opened { generation });
    core.drain_effects();
    Ok((core, generation))
}

/// Delivers one JSON message on `generation`.
pub fn feed(core: &mut ClientCore, generation: u64, value: Value) -> anyhow::Result<()> {
    let msg = decode_server(&value.to_string())?;
    core.handle(TransportEvent::Message { generation, msg });
    Ok(())
}

/// Ticks `n` frames of `dt` with the same input and returns the last frame.
pub fn tick_n(core: &mut ClientCore, n: usize, dt: Duration, input: &InputState) -> Option<Frame> {
    let mut last = None;
    for _ in 0..n {
        last = Some(core.tick(dt, input));
    }
    last
}

/// Outbound messages queued by the core, as JSON.
pub fn sent_messages(core: &mut ClientCore) -> Vec<Value> {
    core.drain_effects()
        .into_iter()
        .filter_map(|e| match e {
            Effect::Send(msg) => serde_json::to_value(&msg).ok(),
            _ => None,
        })
        .collect()
}
