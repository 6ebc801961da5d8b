//! Client implementation.
//!
//! [`ClientCore`] is the whole client as a plain synchronous state machine:
//! transport events go in through [`ClientCore::handle`], time and input go
//! in through [`ClientCore::tick`], and side effects come out as [`Effect`]s.
//! [`GameClient`] owns a core on one task and turns effects into sockets and
//! HTTP calls, so messages are only ever applied whole between ticks.

use std::sync::Arc;
use std::time::Duration;

use dragonfield_shared::{
    config::ClientConfig,
    net::{ClientMsg, ProfileUpdate},
};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    http::Backend,
    input::InputState,
    interp::{self, Clock},
    mode::{Mode, ModeAction, ModeMachine},
    predict::Controller,
    reconcile::{Reconciler, World},
    session::{Identity, Session, SessionAction},
    transport::{spawn_connection, Connection, TransportEvent},
    view::{build_frame, Frame, FrameContext, RenderEvent},
};

/// Discrete user requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetMode(Mode),
    Shoot,
    /// Plant, water or harvest the plot in reach, whichever its stage invites.
    Farm,
    Buy(String),
    SummonBoss,
    RequestScores,
}

/// Work the driver must perform for the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Session(SessionAction),
    Send(ClientMsg),
    SyncProfile(ProfileUpdate),
}

pub struct ClientCore {
    cfg: ClientConfig,
    reconciler: Reconciler,
    world: World,
    controller: Controller,
    modes: ModeMachine,
    session: Session,
    clock: Clock,
    update_required: bool,
    events: Vec<RenderEvent>,
    effects: Vec<Effect>,
    /// Server epoch milliseconds at clock zero.
    epoch_offset_ms: i64,
}

impl ClientCore {
    pub fn new(cfg: ClientConfig) -> anyhow::Result<Self> {
        let session = Session::new(&cfg)?;
        Ok(Self {
            reconciler: Reconciler::new(&cfg.world),
            controller: Controller::new(&cfg.world),
            world: World::default(),
            modes: ModeMachine::default(),
            session,
            clock: Clock::new(),
            update_required: false,
            events: Vec::new(),
            effects: Vec::new(),
            epoch_offset_ms: chrono::Utc::now().timestamp_millis(),
            cfg,
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn update_required(&self) -> bool {
        self.update_required
    }

    pub fn set_epoch_offset(&mut self, epoch_ms: i64) {
        self.epoch_offset_ms = epoch_ms;
    }

    fn epoch_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.clock.now().as_millis()).unwrap_or(i64::MAX);
        self.epoch_offset_ms.saturating_add(elapsed)
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    fn push_session(&mut self, actions: Vec<SessionAction>) {
        self.effects.extend(actions.into_iter().map(Effect::Session));
    }

    fn send(&mut self, msg: ClientMsg) {
        if self.update_required || !self.session.is_open() {
            debug!(?msg, "Not connected; dropping intent");
            return;
        }
        self.effects.push(Effect::Send(msg));
    }

    /// Changes identity hints for future connections and profile syncs.
    pub fn set_identity(&mut self, identity: Identity) {
        self.session.set_identity(identity);
    }

    pub fn set_mode(&mut self, to: Mode) {
        if self.update_required {
            return;
        }
        for action in self.modes.switch(to) {
            match action {
                ModeAction::Disconnect => {
                    let actions = self.session.disconnect();
                    self.push_session(actions);
                }
                ModeAction::Connect => {
                    let actions = self.session.connect();
                    self.push_session(actions);
                }
                ModeAction::SyncProfile => {
                    let id = self.session.identity();
                    let profile = ProfileUpdate {
                        username: id.username.clone(),
                        gender: id.gender,
                        face_index: id.face_index,
                    };
                    self.effects.push(Effect::SyncProfile(profile));
                }
            }
        }
    }

    /// Applies one event from outside the tick.
    pub fn handle(&mut self, event: TransportEvent) {
        let now = self.clock.now();
        match event {
            TransportEvent::Opened { generation } => {
                let actions = self.session.on_open(generation, now);
                if self.session.is_current(generation) && self.session.is_open() {
                    self.world.connection_opened();
                    self.controller.reset();
                }
                self.push_session(actions);
            }
            TransportEvent::Message { generation, msg } => {
                if !self.session.is_current(generation) || !self.session.is_open() {
                    debug!(generation, kind = msg.kind(), "Stale message dropped");
                    return;
                }
                let events = self.reconciler.apply(&mut self.world, msg, now);
                self.events.extend(events);
            }
            TransportEvent::Closed { generation } => {
                let actions = self.session.on_closed(generation, now);
                self.push_session(actions);
            }
            TransportEvent::VersionFetched { result } => match result {
                Ok(version) => {
                    if self.session.on_version(&version) && !self.update_required {
                        self.update_required = true;
                        warn!(version = %version, "Client out of date; reload required");
                    }
                }
                Err(e) => debug!(error = %e, "Version check failed"),
            },
            TransportEvent::ProfileSynced { result } => {
                if let Err(e) = result {
                    warn!(error = %e, "Profile sync failed");
                }
            }
        }
    }

    pub fn command(&mut self, cmd: Command) {
        let now = self.clock.now();
        let mode = self.modes.mode();
        match cmd {
            Command::SetMode(to) => self.set_mode(to),
            Command::Shoot => {
                if let Some(msg) = self.controller.try_shoot(&self.world, mode, now) {
                    self.send(msg);
                }
            }
            Command::Farm => {
                if !self.session.is_open() || self.update_required {
                    return;
                }
                if let Some((msg, event)) =
                    self.controller.start_farm_action(&mut self.world, mode, now)
                {
                    self.events.push(event);
                    self.send(msg);
                }
            }
            Command::Buy(item) => {
                if let Some(msg) = self.controller.buy(&self.world, mode, &item) {
                    self.send(msg);
                }
            }
            Command::SummonBoss => {
                if let Some(msg) = self.controller.summon(&self.world, mode) {
                    self.send(msg);
                }
            }
            Command::RequestScores => self.send(ClientMsg::GetScores),
        }
    }

    /// One display tick: timers, prediction, interpolation, then the frame.
    pub fn tick(&mut self, dt: Duration, input: &InputState) -> Frame {
        let step = self.clock.advance(dt);
        let now = self.clock.now();

        let actions = self.session.poll(now);
        self.push_session(actions);

        let mode = self.modes.mode();
        if !self.update_required {
            for msg in self.controller.step(&mut self.world, mode, input, now) {
                self.send(msg);
            }
        }

        // Customization leaves the last connection's entities frozen and hidden.
        let timings = *self.reconciler.timings();
        if mode.wants_connection() {
            let advanced = interp::advance(&mut self.world, now, step, &self.cfg.world, &timings);
            self.events.extend(advanced);
        }

        let affordances = if self.update_required {
            Default::default()
        } else {
            self.controller.affordances(&self.world, mode)
        };
        let ctx = FrameContext {
            now,
            epoch_ms: self.epoch_ms(),
            cfg: &self.cfg.world,
            timings: &timings,
            mode,
            reconnecting: self.session.reconnecting(),
            update_required: self.update_required,
            affordances,
            shoot_ready: mode.accepts_player_input() && self.controller.shoot_ready(now),
            orbit_angle: self.controller.orbit_angle(),
            events: std::mem::take(&mut self.events),
        };
        build_frame(&self.world, ctx)
    }

    /// Human-readable state for the console.
    pub fn status_lines(&self) -> Vec<String> {
        let reg = &self.world.registry;
        let mut out = vec![
            format!("Mode: {}", self.mode().as_str()),
            format!(
                "Connection: {:?} (generation {})",
                self.session.state(),
                self.session.generation()
            ),
        ];
        if self.update_required {
            out.push("Update required: reload the client".to_string());
        } else if self.session.reconnecting() {
            out.push("Reconnecting...".to_string());
        }
        if let Some(me) = reg.local.as_ref() {
            let p = me.player.position.current;
            out.push(format!(
                "You: {} at ({:.2}, {:.2}){}",
                me.player.display_name(),
                p.x,
                p.z,
                if me.player.is_alive() { "" } else { " [dead]" }
            ));
        }
        out.push(format!("Players: {}", reg.players.len()));
        match reg.boss.as_ref() {
            Some(b) => out.push(format!("Dragon: {:?} {}/{}", b.phase, b.health, b.max_health)),
            None => out.push("Dragon: none".to_string()),
        }
        out.push(format!(
            "Coins: {}  Inventory: {}",
            self.world.economy.coins,
            self.world.economy.inventory.join(", ")
        ));
        out
    }
}

/// Async driver: one task, one event channel, one frame timer.
pub struct GameClient<B: Backend> {
    core: ClientCore,
    backend: Arc<B>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    connection: Option<Connection>,
    ticker: tokio::time::Interval,
    last_tick: Instant,
    input: InputState,
}

impl<B: Backend> GameClient<B> {
    pub fn new(cfg: ClientConfig, backend: B) -> anyhow::Result<Self> {
        let hz = cfg.frame_hz.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(1) / hz);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            core: ClientCore::new(cfg)?,
            backend: Arc::new(backend),
            events_tx,
            events_rx,
            connection: None,
            ticker,
            last_tick: Instant::now(),
            input: InputState::default(),
        })
    }

    pub fn core(&self) -> &ClientCore {
        &self.core
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.command(Command::SetMode(mode));
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.core.set_identity(identity);
    }

    pub fn command(&mut self, cmd: Command) {
        self.core.command(cmd);
        self.execute();
    }

    /// Input for the next tick. Edge-triggered fields reset after it.
    pub fn set_input(&mut self, input: InputState) {
        self.input = input;
    }

    /// Waits for the next event or frame. Returns a frame on ticks.
    pub async fn run_frame(&mut self) -> Option<Frame> {
        tokio::select! {
            Some(event) = self.events_rx.recv() => {
                self.core.handle(event);
                self.execute();
                None
            }
            at = self.ticker.tick() => {
                let dt = at.saturating_duration_since(self.last_tick);
                self.last_tick = at;
                let frame = self.core.tick(dt, &self.input);
                self.input.shoot = false;
                self.input.look_dx = 0.0;
                self.execute();
                Some(frame)
            }
        }
    }

    fn execute(&mut self) {
        for effect in self.core.drain_effects() {
            match effect {
                Effect::Session(SessionAction::Open(req)) => {
                    if let Some(old) = self.connection.take() {
                        old.close();
                    }
                    info!(generation = req.generation, "Opening connection");
                    self.connection = Some(spawn_connection(req, self.events_tx.clone()));
                }
                Effect::Session(SessionAction::Close { generation }) => {
                    if self
                        .connection
                        .as_ref()
                        .is_some_and(|c| c.generation() == generation)
                    {
                        if let Some(conn) = self.connection.take() {
                            conn.close();
                        }
                    }
                }
                Effect::Session(SessionAction::CheckVersion) => {
                    let backend = Arc::clone(&self.backend);
                    let tx = self.events_tx.clone();
                    tokio::spawn(async move {
                        let result = backend.fetch_version().await;
                        let _ = tx.send(TransportEvent::VersionFetched { result });
                    });
                }
                Effect::Send(msg) => {
                    if let Some(conn) = self.connection.as_ref().filter(|c| !c.is_finished()) {
                        if let Err(e) = conn.send(&msg) {
                            debug!(error = %e, "Send failed");
                        }
                    }
                }
                Effect::SyncProfile(profile) => {
                    let backend = Arc::clone(&self.backend);
                    let tx = self.events_tx.clone();
                    tokio::spawn(async move {
                        let result = backend.sync_profile(&profile).await;
                        let _ = tx.send(TransportEvent::ProfileSynced { result });
                    });
                }
            }
        }
    }
}
