//! Transport session state machine.
//!
//! Pure and timer-free: callers feed it transport events and the current time
//! and execute the [`SessionAction`]s it returns. Each connection attempt gets
//! a new generation; events from any other generation are dropped, which is
//! how a superseded attempt is discarded without reporting an error.

use std::time::Duration;

use anyhow::Context;
use dragonfield_shared::{config::ClientConfig, net::Gender};
use reqwest::Url;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Fixed delay, unlimited attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn next_attempt(&self, now: Duration) -> Duration {
        now + self.delay
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Identity and cosmetic hints carried on the connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub first_name: String,
    pub gender: Gender,
    pub face_index: u32,
}

impl From<&ClientConfig> for Identity {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            username: cfg.username.clone(),
            first_name: cfg.first_name.clone(),
            gender: cfg.gender,
            face_index: cfg.face_index,
        }
    }
}

/// Builds the WebSocket URL with the identity query parameters.
pub fn connect_url(base: &str, identity: &Identity) -> anyhow::Result<Url> {
    let face = identity.face_index.to_string();
    Url::parse_with_params(
        base,
        &[
            ("username", identity.username.as_str()),
            ("firstName", identity.first_name.as_str()),
            ("gender", identity.gender.as_str()),
            ("faceIndex", face.as_str()),
        ],
    )
    .with_context(|| format!("parse server url {base}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub generation: u64,
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Open(ConnectRequest),
    Close { generation: u64 },
    CheckVersion,
}

pub struct Session {
    base_url: String,
    identity: Identity,
    client_version: String,
    policy: ReconnectPolicy,
    version_interval: Duration,

    state: ConnState,
    generation: u64,
    /// Generation of a deliberate close still in flight.
    closing: Option<u64>,
    want_connected: bool,
    reconnect_at: Option<Duration>,
    next_version_check: Option<Duration>,
    reconnecting: bool,
    frozen: bool,
}

impl Session {
    pub fn new(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let identity = Identity::from(cfg);
        // Fail early on a bad base URL.
        connect_url(&cfg.server_url, &identity)?;
        Ok(Self {
            base_url: cfg.server_url.clone(),
            identity,
            client_version: cfg.client_version.clone(),
            policy: ReconnectPolicy::new(cfg.reconnect_delay()),
            version_interval: cfg.version_check_interval(),
            state: ConnState::Disconnected,
            generation: 0,
            closing: None,
            want_connected: false,
            reconnect_at: None,
            next_version_check: None,
            reconnecting: false,
            frozen: false,
        })
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    /// A reconnect is pending or in progress after an unplanned close.
    pub fn reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// Version mismatch seen; the session will never connect again.
    pub fn frozen(&self) -> bool {
        self.frozen
    }

    pub fn reconnect_at(&self) -> Option<Duration> {
        self.reconnect_at
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Takes effect on the next connection.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = identity;
    }

    fn open(&mut self) -> Vec<SessionAction> {
        let url = match connect_url(&self.base_url, &self.identity) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build connection url");
                return Vec::new();
            }
        };
        self.generation += 1;
        self.state = ConnState::Connecting;
        self.reconnect_at = None;
        info!(generation = self.generation, url = %url, "Connecting");
        vec![SessionAction::Open(ConnectRequest {
            generation: self.generation,
            url,
        })]
    }

    /// No-op while a connection is open or connecting.
    pub fn connect(&mut self) -> Vec<SessionAction> {
        if self.frozen {
            return Vec::new();
        }
        self.want_connected = true;
        match self.state {
            ConnState::Connecting | ConnState::Open => Vec::new(),
            ConnState::Disconnected | ConnState::Closing => self.open(),
        }
    }

    /// Deliberate close. The generation is bumped first so the old
    /// connection's close can never schedule a reconnect.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        self.want_connected = false;
        self.reconnect_at = None;
        self.reconnecting = false;
        self.next_version_check = None;
        match self.state {
            ConnState::Disconnected | ConnState::Closing => {
                self.generation += 1;
                Vec::new()
            }
            ConnState::Connecting | ConnState::Open => {
                let old = self.generation;
                self.generation += 1;
                self.closing = Some(old);
                self.state = ConnState::Closing;
                info!(generation = old, "Closing");
                vec![SessionAction::Close { generation: old }]
            }
        }
    }

    /// Closes and reopens with a fresh generation.
    pub fn reconnect(&mut self) -> Vec<SessionAction> {
        let mut actions = self.disconnect();
        actions.extend(self.connect());
        actions
    }

    pub fn on_open(&mut self, generation: u64, now: Duration) -> Vec<SessionAction> {
        if !self.is_current(generation) || self.state != ConnState::Connecting {
            debug!(generation, "Stale open");
            return vec![SessionAction::Close { generation }];
        }
        self.state = ConnState::Open;
        self.reconnecting = false;
        self.next_version_check = Some(now + self.version_interval);
        info!(generation, "Connected");
        vec![SessionAction::CheckVersion]
    }

    pub fn on_closed(&mut self, generation: u64, now: Duration) -> Vec<SessionAction> {
        if self.closing == Some(generation) {
            self.closing = None;
            if self.state == ConnState::Closing {
                self.state = ConnState::Disconnected;
            }
            return Vec::new();
        }
        if !self.is_current(generation) {
            debug!(generation, "Stale close");
            return Vec::new();
        }
        self.state = ConnState::Disconnected;
        if self.want_connected && !self.frozen {
            let at = self.policy.next_attempt(now);
            self.reconnect_at = Some(at);
            self.reconnecting = true;
            warn!(generation, delay_ms = self.policy.delay.as_millis() as u64, "Connection lost; reconnecting");
        }
        Vec::new()
    }

    /// Fires due timers.
    pub fn poll(&mut self, now: Duration) -> Vec<SessionAction> {
        if self.frozen {
            return Vec::new();
        }
        let mut actions = Vec::new();
        if self.reconnect_at.is_some_and(|at| now >= at) {
            self.reconnect_at = None;
            if self.want_connected && self.state == ConnState::Disconnected {
                actions.extend(self.open());
            }
        }
        // Armed by the first open; keeps running through reconnects until the
        // mode goes offline.
        if self.want_connected && self.next_version_check.is_some_and(|at| now >= at) {
            self.next_version_check = Some(now + self.version_interval);
            actions.push(SessionAction::CheckVersion);
        }
        actions
    }

    /// Compares the server's version with ours. Returns true on mismatch, after
    /// which the session is frozen for good.
    pub fn on_version(&mut self, remote: &str) -> bool {
        let remote = remote.trim();
        if remote.is_empty() || self.frozen {
            return self.frozen;
        }
        if remote == self.client_version {
            return false;
        }
        warn!(local = %self.client_version, remote, "Version mismatch; update required");
        self.frozen = true;
        self.want_connected = false;
        self.reconnect_at = None;
        self.next_version_check = None;
        self.reconnecting = false;
        true
    }
}
