//! Reconciliation engine.
//!
//! Applies decoded server messages to the registry, strictly one whole message
//! at a time in arrival order. Every rule returns the [`RenderEvent`]s it
//! caused so the renderer can rebuild or swap models without diffing.

use std::collections::HashSet;
use std::time::Duration;

use dragonfield_shared::{
    config::WorldConfig,
    math::Vec3,
    net::{
        BulletState, FarmPlotState, Gender, PickupState, PlayerDeath, PlayerRespawn, PlayerState,
        ServerMsg, SheepState, Welcome, WireId,
    },
};
use tracing::{debug, info};

use crate::{
    boss::{self, BossTimings},
    registry::{
        ActionKind, Cosmetics, Economy, GrowthStage, Life, LocalPlayer, Pickup, Player,
        PlayerAction, PlayerSpawn, Projectile, ProjectileClass, Registry, Sheep, Smoothed,
        PLOT_COUNT,
    },
    view::{RenderEvent, Toast},
};

/// Face variant assumed when the server omits `faceIndex` on creation.
pub const DEFAULT_FACE_INDEX: u32 = 0;

/// Client-side world: entities plus the economic and message state the UI
/// shows.
#[derive(Debug, Clone, Default)]
pub struct World {
    pub registry: Registry,
    pub economy: Economy,
    pub toast: Option<Toast>,
    /// A `welcome` was applied on the current connection.
    welcomed: bool,
}

impl World {
    /// Called whenever a new connection opens; the next `welcome` is accepted.
    pub fn connection_opened(&mut self) {
        self.welcomed = false;
    }

    pub fn show_toast(&mut self, message: impl Into<String>, now: Duration, ttl: Duration) {
        self.toast = Some(Toast {
            message: message.into(),
            expires_at: now + ttl,
        });
    }
}

fn finite(v: Option<f32>) -> Option<f32> {
    v.filter(|v| v.is_finite())
}

fn cosmetics(gender: Option<Gender>, face_index: Option<u32>) -> Cosmetics {
    Cosmetics {
        gender: gender.unwrap_or_default(),
        face_index: face_index.unwrap_or(DEFAULT_FACE_INDEX),
    }
}

fn action_of(state: &PlayerState) -> Option<Option<PlayerAction>> {
    match state.is_acting? {
        false => Some(None),
        true => {
            let kind = state.action_type.as_deref().and_then(ActionKind::from_wire)?;
            let plot_id = state
                .action_plot_id
                .and_then(|p| usize::try_from(p).ok())
                .filter(|p| *p < PLOT_COUNT)?;
            Some(Some(PlayerAction { kind, plot_id }))
        }
    }
}

pub struct Reconciler {
    cfg: WorldConfig,
    timings: BossTimings,
}

impl Reconciler {
    pub fn new(cfg: &WorldConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            timings: BossTimings::from(cfg),
        }
    }

    pub fn timings(&self) -> &BossTimings {
        &self.timings
    }

    /// Applies one inbound message.
    pub fn apply(&self, world: &mut World, msg: ServerMsg, now: Duration) -> Vec<RenderEvent> {
        debug!(kind = msg.kind(), "Apply");
        let mut events = Vec::new();
        let t = &self.timings;
        match msg {
            ServerMsg::Welcome(w) => self.welcome(world, w, now, &mut events),
            ServerMsg::Init(list) => {
                for state in &list.players {
                    upsert_player(&mut world.registry, state, now, &mut events);
                }
            }
            ServerMsg::Join(state) | ServerMsg::Update(state) => {
                upsert_player(&mut world.registry, &state, now, &mut events);
            }
            ServerMsg::Leave(p) => {
                if world.registry.players.remove(&p.id).is_some() {
                    events.push(RenderEvent::PlayerRemoved(p.id));
                }
            }
            ServerMsg::WeaponUpdate(w) => {
                if let Some(player) = world.registry.player_mut(&w.id) {
                    if player.weapon != w.weapon {
                        player.weapon = w.weapon;
                        events.push(RenderEvent::WeaponChanged(w.id));
                    }
                }
            }
            ServerMsg::DragonUpdate(d) => {
                events.extend(boss::apply_state(&mut world.registry.boss, &d, now, t));
            }
            ServerMsg::DragonHit(hit) => {
                events.extend(boss::hit(&mut world.registry.boss, &hit, now, t));
            }
            ServerMsg::DragonDeath => {
                events.extend(boss::kill(&mut world.registry.boss, now));
            }
            ServerMsg::DragonRespawn(d) => {
                events.extend(boss::respawn(&mut world.registry.boss, &d, now, t));
            }
            ServerMsg::DragonCharging => {
                events.extend(boss::start_charging(&mut world.registry.boss, now, t));
            }
            ServerMsg::WorldUpdate(u) => {
                if let Some(d) = &u.dragon {
                    events.extend(boss::apply_state(&mut world.registry.boss, d, now, t));
                }
                if let Some(bullets) = &u.bullets {
                    sync_projectiles(&mut world.registry, bullets);
                }
                if let Some(pickups) = &u.pickups {
                    sync_pickups(&mut world.registry, pickups);
                }
                if let Some(sheeps) = &u.sheeps {
                    sync_sheep(&mut world.registry, sheeps);
                }
                if let Some(plots) = &u.farm_plots {
                    apply_plots(&mut world.registry, plots, &mut events);
                }
                if let Some(players) = &u.players {
                    for state in players {
                        upsert_player(&mut world.registry, state, now, &mut events);
                    }
                }
            }
            ServerMsg::PickupSpawned(p) => spawn_pickup(&mut world.registry, &p),
            ServerMsg::FarmUpdate(f) => apply_plots(&mut world.registry, &f.farm_plots, &mut events),
            ServerMsg::BuySuccess(b) => {
                if let Some(coins) = b.coins {
                    world.economy.coins = coins;
                }
                if let Some(inventory) = b.inventory {
                    world.economy.inventory = inventory;
                }
            }
            ServerMsg::InventoryUpdate(i) => {
                if let Some(inventory) = i.inventory {
                    world.economy.inventory = inventory;
                }
            }
            ServerMsg::CoinsEarned(c) => {
                world.economy.coins = world.economy.coins.saturating_add(c.amount);
            }
            ServerMsg::Scores(s) => world.economy.scores = s.scores,
            ServerMsg::PlayerDeath(d) => player_death(&mut world.registry, &d, now, &mut events),
            ServerMsg::PlayerRespawn(r) => player_respawn(&mut world.registry, r, &mut events),
            ServerMsg::Error(e) => {
                info!(message = %e.message, "Server rejected action");
                world.show_toast(e.message, now, Duration::from_millis(self.cfg.toast_ms));
            }
            ServerMsg::Unknown => {}
        }
        events
    }

    fn welcome(&self, world: &mut World, w: Welcome, now: Duration, events: &mut Vec<RenderEvent>) {
        if world.welcomed {
            debug!(id = %w.id, "Duplicate welcome on this connection; ignoring");
            return;
        }
        world.welcomed = true;
        let reg = &mut world.registry;
        if reg.local.is_some() {
            // Reconnected: the server re-sends everything.
            for id in reg.players.keys() {
                events.push(RenderEvent::PlayerRemoved(id.clone()));
            }
            reg.clear_remote();
        }

        let x = if w.x.is_finite() { w.x } else { 0.0 };
        let z = if w.z.is_finite() { w.z } else { 0.0 };
        let heading = if w.rotation.is_finite() { w.rotation } else { 0.0 };
        let player = Player::spawn(PlayerSpawn {
            id: w.id.clone(),
            position: Vec3::ground(x, z),
            heading,
            username: w.username.unwrap_or_default(),
            first_name: w.first_name.unwrap_or_default(),
            cosmetics: cosmetics(w.gender, w.face_index),
            weapon: w.weapon,
        });
        info!(id = %w.id, x, z, "Welcome");
        reg.local = Some(LocalPlayer::new(player));
        events.push(RenderEvent::LocalPlayerCreated(w.id));

        match &w.dragon {
            Some(d) => events.extend(boss::apply_state(&mut reg.boss, d, now, &self.timings)),
            None => {
                if reg.boss.take().is_some() {
                    events.push(RenderEvent::BossRemoved);
                }
            }
        }
        if let Some(plots) = &w.farm_plots {
            apply_plots(reg, plots, events);
        }
        if let Some(coins) = w.coins {
            world.economy.coins = coins;
        }
        if let Some(inventory) = w.inventory {
            world.economy.inventory = inventory;
        }
    }
}

fn kill_player(player: &mut Player, now: Duration) {
    let anchor = player.rendered_position();
    player.position.snap(anchor);
    player.life = Life::Dead { anchor, since: now };
    player.action = None;
}

fn revive_player(player: &mut Player, position: Vec3, heading: f32) {
    player.position.snap(position);
    player.heading.snap(heading);
    player.life = Life::Alive;
    player.action = None;
}

fn upsert_player(reg: &mut Registry, state: &PlayerState, now: Duration, events: &mut Vec<RenderEvent>) {
    if state.id.is_empty() {
        debug!("Player state without id; ignoring");
        return;
    }
    if reg.is_local(&state.id) {
        // The server echo of our own position is advisory only.
        return;
    }
    let x = finite(state.x);
    let z = finite(state.z);
    let rotation = finite(state.rotation);

    let Some(player) = reg.players.get_mut(&state.id) else {
        let mut player = Player::spawn(PlayerSpawn {
            id: state.id.clone(),
            position: Vec3::ground(x.unwrap_or(0.0), z.unwrap_or(0.0)),
            heading: rotation.unwrap_or(0.0),
            username: state.username.clone().unwrap_or_default(),
            first_name: state.first_name.clone().unwrap_or_default(),
            cosmetics: cosmetics(state.gender, state.face_index),
            weapon: state.weapon.clone(),
        });
        if let Some(action) = action_of(state) {
            player.action = action;
        }
        events.push(RenderEvent::PlayerSpawned(state.id.clone()));
        if state.is_dead == Some(true) {
            kill_player(&mut player, now);
            events.push(RenderEvent::PlayerDied(state.id.clone()));
        }
        reg.players.insert(state.id.clone(), player);
        return;
    };

    if let Some(name) = &state.username {
        player.username.clone_from(name);
    }
    if let Some(name) = &state.first_name {
        player.first_name.clone_from(name);
    }
    let mut look = player.cosmetics;
    if let Some(g) = state.gender {
        look.gender = g;
    }
    if let Some(f) = state.face_index {
        look.face_index = f;
    }
    if look != player.cosmetics {
        player.cosmetics = look;
        events.push(RenderEvent::PlayerRebuilt(state.id.clone()));
    }
    if state.weapon.is_some() && state.weapon != player.weapon {
        player.weapon = state.weapon.clone();
        events.push(RenderEvent::WeaponChanged(state.id.clone()));
    }

    match (player.life, state.is_dead) {
        (Life::Alive, Some(true)) => {
            kill_player(player, now);
            events.push(RenderEvent::PlayerDied(state.id.clone()));
            return;
        }
        (Life::Dead { anchor, .. }, Some(false)) => {
            let position = Vec3::ground(x.unwrap_or(anchor.x), z.unwrap_or(anchor.z));
            let heading = rotation.unwrap_or(player.heading.current);
            revive_player(player, position, heading);
            events.push(RenderEvent::PlayerRespawned(state.id.clone()));
            return;
        }
        (Life::Dead { .. }, _) => return,
        (Life::Alive, _) => {}
    }

    let mut target = player.position.target;
    if let Some(x) = x {
        target.x = x;
    }
    if let Some(z) = z {
        target.z = z;
    }
    player.position.set_target(target);
    if let Some(r) = rotation {
        player.heading.set_target(r);
    }
    if let Some(action) = action_of(state) {
        player.action = action;
    }
}

fn player_death(reg: &mut Registry, d: &PlayerDeath, now: Duration, events: &mut Vec<RenderEvent>) {
    let local = reg.is_local(&d.id);
    let Some(player) = reg.player_mut(&d.id) else {
        debug!(id = %d.id, "Death for unknown player");
        return;
    };
    if !player.is_alive() {
        return;
    }
    if let Some(name) = d.username.as_ref().filter(|n| !n.is_empty()) {
        player.username.clone_from(name);
    }
    if let Some(name) = d.first_name.as_ref().filter(|n| !n.is_empty()) {
        player.first_name.clone_from(name);
    }
    kill_player(player, now);
    events.push(RenderEvent::PlayerDied(d.id.clone()));
    if local {
        if let Some(me) = reg.local.as_mut() {
            me.death_started = Some(now);
            if me.action_until.take().is_some() {
                events.push(RenderEvent::ToolDetached);
            }
        }
    }
}

fn player_respawn(reg: &mut Registry, r: PlayerRespawn, events: &mut Vec<RenderEvent>) {
    let position = Vec3::ground(
        if r.x.is_finite() { r.x } else { 0.0 },
        if r.z.is_finite() { r.z } else { 0.0 },
    );
    let heading = if r.rotation.is_finite() { r.rotation } else { 0.0 };

    if let Some(me) = reg.local.as_mut().filter(|l| l.player.id == r.id) {
        me.death_started = None;
        if me.action_until.take().is_some() {
            events.push(RenderEvent::ToolDetached);
        }
        apply_respawn(&mut me.player, &r, position, heading);
        events.push(RenderEvent::PlayerRespawned(r.id));
        return;
    }
    match reg.players.get_mut(&r.id) {
        Some(player) => {
            apply_respawn(player, &r, position, heading);
            events.push(RenderEvent::PlayerRespawned(r.id));
        }
        None => {
            let player = Player::spawn(PlayerSpawn {
                id: r.id.clone(),
                position,
                heading,
                username: r.username.unwrap_or_default(),
                first_name: r.first_name.unwrap_or_default(),
                cosmetics: cosmetics(r.gender, r.face_index),
                weapon: r.weapon,
            });
            reg.players.insert(r.id.clone(), player);
            events.push(RenderEvent::PlayerSpawned(r.id));
        }
    }
}

fn apply_respawn(player: &mut Player, r: &PlayerRespawn, position: Vec3, heading: f32) {
    revive_player(player, position, heading);
    if let Some(name) = &r.username {
        player.username.clone_from(name);
    }
    if let Some(name) = &r.first_name {
        player.first_name.clone_from(name);
    }
    // The model is rebuilt on respawn anyway, so cosmetics are simply taken.
    if let Some(g) = r.gender {
        player.cosmetics.gender = g;
    }
    if let Some(f) = r.face_index {
        player.cosmetics.face_index = f;
    }
    if r.weapon.is_some() {
        player.weapon = r.weapon.clone();
    }
}

/// Full-array replace with an index-wise diff on growth stage.
fn apply_plots(reg: &mut Registry, plots: &[FarmPlotState], events: &mut Vec<RenderEvent>) {
    if plots.len() > PLOT_COUNT {
        debug!(len = plots.len(), "Extra farm plots ignored");
    }
    for (index, state) in plots.iter().enumerate().take(PLOT_COUNT) {
        let Some(stage) = state.stage.and_then(GrowthStage::from_wire) else {
            debug!(index, stage = ?state.stage, "Invalid growth stage");
            continue;
        };
        let plot = &mut reg.plots[index];
        plot.watered_at = state.watered_at;
        if plot.stage != stage {
            plot.stage = stage;
            events.push(RenderEvent::PlotRebuilt(index));
        }
    }
}

fn sync_projectiles(reg: &mut Registry, bullets: &[BulletState]) {
    let mut seen = HashSet::with_capacity(bullets.len());
    for b in bullets {
        if !(b.x.is_finite() && b.z.is_finite()) {
            continue;
        }
        seen.insert(b.id.clone());
        let at = Vec3::ground(b.x, b.z);
        let class = ProjectileClass::classify(b.owner_id.as_ref(), b.speed);
        reg.projectiles
            .entry(b.id.clone())
            .and_modify(|p| {
                p.position.set_target(at);
                p.class = class;
            })
            .or_insert_with(|| Projectile {
                id: b.id.clone(),
                position: Smoothed::settled(at),
                owner_id: b.owner_id.clone(),
                class,
            });
    }
    reg.projectiles.retain(|id, _| seen.contains(id));
}

fn sync_sheep(reg: &mut Registry, sheeps: &[SheepState]) {
    let mut seen = HashSet::with_capacity(sheeps.len());
    for s in sheeps {
        if !(s.x.is_finite() && s.z.is_finite()) {
            continue;
        }
        seen.insert(s.id.clone());
        let sheep = reg
            .sheep
            .entry(s.id.clone())
            .or_insert_with(|| Sheep::new(s.id.clone(), Vec3::ground(s.x, s.z)));
        sheep.position.set_target(Vec3::ground(s.x, s.z));
        sheep.hopping = s.is_hopping;
        sheep.label = s.text.clone().filter(|t| !t.is_empty());
    }
    reg.sheep.retain(|id, _| seen.contains(id));
}

fn pickup_from(p: &PickupState, unconfirmed: bool) -> Pickup {
    Pickup {
        id: p.id.clone(),
        item_type: p.item_type.clone(),
        recipient_id: p.target_player_id.clone(),
        position: Vec3::ground(p.x, p.z),
        collect_requested: false,
        unconfirmed,
    }
}

/// Incremental add; reconciled against the next full list.
fn spawn_pickup(reg: &mut Registry, p: &PickupState) {
    if !(p.x.is_finite() && p.z.is_finite()) {
        return;
    }
    match reg.pickups.get_mut(&p.id) {
        Some(existing) => {
            existing.item_type.clone_from(&p.item_type);
            existing.recipient_id.clone_from(&p.target_player_id);
            existing.position = Vec3::ground(p.x, p.z);
        }
        None => {
            reg.pickups.insert(p.id.clone(), pickup_from(p, true));
        }
    }
}

/// Authoritative full set. A pickup only ever seen through `pickup_spawned`
/// survives one list that lacks it, since the list may predate the spawn.
fn sync_pickups(reg: &mut Registry, pickups: &[PickupState]) {
    let mut seen: HashSet<&WireId> = HashSet::with_capacity(pickups.len());
    for p in pickups {
        if !(p.x.is_finite() && p.z.is_finite()) {
            continue;
        }
        seen.insert(&p.id);
        match reg.pickups.get_mut(&p.id) {
            Some(existing) => {
                existing.item_type.clone_from(&p.item_type);
                existing.recipient_id.clone_from(&p.target_player_id);
                existing.position = Vec3::ground(p.x, p.z);
                existing.unconfirmed = false;
            }
            None => {
                reg.pickups.insert(p.id.clone(), pickup_from(p, false));
            }
        }
    }
    reg.pickups.retain(|id, pickup| {
        if seen.contains(id) {
            true
        } else if pickup.unconfirmed {
            pickup.unconfirmed = false;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use dragonfield_shared::net::{
        decode_server, DragonState, FarmUpdate, PlayerList, PlayerRef, WorldUpdate,
    };

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn msg(json: &str) -> ServerMsg {
        decode_server(json).unwrap()
    }

    fn welcomed() -> (Reconciler, World) {
        let r = Reconciler::new(&WorldConfig::default());
        let mut w = World::default();
        r.apply(
            &mut w,
            msg(r#"{"type":"welcome","id":"p1","x":0,"z":0,"rotation":0}"#),
            ms(0),
        );
        (r, w)
    }

    fn plots(stages: [i64; 9]) -> ServerMsg {
        ServerMsg::FarmUpdate(FarmUpdate {
            farm_plots: stages
                .iter()
                .map(|s| FarmPlotState {
                    stage: Some(*s),
                    watered_at: None,
                })
                .collect(),
        })
    }

    #[test]
    fn welcome_creates_exactly_one_local_player() {
        let (r, mut w) = welcomed();
        let me = w.registry.local.as_ref().unwrap();
        assert_eq!(me.player.id.as_str(), "p1");
        assert_eq!(me.player.position.current, Vec3::ZERO);

        // Second welcome on the same connection is ignored.
        let events = r.apply(
            &mut w,
            msg(r#"{"type":"welcome","id":"p9","x":3,"z":3,"rotation":0}"#),
            ms(10),
        );
        assert!(events.is_empty());
        assert_eq!(w.registry.local_id().unwrap().as_str(), "p1");
    }

    #[test]
    fn reconnect_welcome_resyncs_remote_sets() {
        let (r, mut w) = welcomed();
        r.apply(&mut w, msg(r#"{"type":"join","id":"p2","x":1,"z":1}"#), ms(0));
        w.connection_opened();
        let events = r.apply(
            &mut w,
            msg(r#"{"type":"welcome","id":"p1","x":4,"z":4,"rotation":0}"#),
            ms(5),
        );
        assert!(events.contains(&RenderEvent::PlayerRemoved(WireId::from("p2"))));
        assert!(w.registry.players.is_empty());
        assert_eq!(
            w.registry.local.as_ref().unwrap().player.position.current,
            Vec3::ground(4.0, 4.0)
        );
    }

    #[test]
    fn local_echo_is_ignored() {
        let (r, mut w) = welcomed();
        w.registry.local.as_mut().unwrap().player.position.snap(Vec3::ground(2.0, 3.0));
        r.apply(
            &mut w,
            msg(r#"{"type":"update","id":"p1","x":40,"z":40,"rotation":2}"#),
            ms(1),
        );
        let me = &w.registry.local.as_ref().unwrap().player;
        assert_eq!(me.position.current, Vec3::ground(2.0, 3.0));
        assert_eq!(me.position.target, Vec3::ground(2.0, 3.0));
        assert!(w.registry.players.is_empty());
    }

    #[test]
    fn update_moves_target_not_current() {
        let (r, mut w) = welcomed();
        r.apply(
            &mut w,
            msg(r#"{"type":"update","id":"p2","x":5,"z":5,"rotation":1.57}"#),
            ms(0),
        );
        r.apply(&mut w, msg(r#"{"type":"update","id":"p2","x":10,"z":5}"#), ms(16));
        let p2 = &w.registry.players[&WireId::from("p2")];
        assert_eq!(p2.position.current, Vec3::ground(5.0, 5.0));
        assert_eq!(p2.position.target, Vec3::ground(10.0, 5.0));
        assert_eq!(p2.heading.target, 1.57);
    }

    #[test]
    fn cosmetic_change_rebuilds_in_place() {
        let (r, mut w) = welcomed();
        r.apply(
            &mut w,
            msg(r#"{"type":"join","id":"p2","x":1,"z":1,"gender":"male","faceIndex":2}"#),
            ms(0),
        );
        let events = r.apply(
            &mut w,
            msg(r#"{"type":"update","id":"p2","gender":"female"}"#),
            ms(1),
        );
        assert_eq!(events, vec![RenderEvent::PlayerRebuilt(WireId::from("p2"))]);
        let p2 = &w.registry.players[&WireId::from("p2")];
        assert_eq!(p2.cosmetics.gender, Gender::Female);
        assert_eq!(p2.cosmetics.face_index, 2);
        assert_eq!(p2.position.current, Vec3::ground(1.0, 1.0));

        // Same values again: nothing to rebuild.
        let events = r.apply(
            &mut w,
            msg(r#"{"type":"update","id":"p2","gender":"female","faceIndex":2}"#),
            ms(2),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn missing_face_index_defaults_at_creation() {
        let (r, mut w) = welcomed();
        r.apply(&mut w, msg(r#"{"type":"join","id":"p2"}"#), ms(0));
        let p2 = &w.registry.players[&WireId::from("p2")];
        assert_eq!(p2.cosmetics.face_index, DEFAULT_FACE_INDEX);
        // A later explicit default value is not a change.
        let events = r.apply(
            &mut w,
            msg(r#"{"type":"update","id":"p2","faceIndex":0}"#),
            ms(1),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn init_is_idempotent_and_leave_removes() {
        let (r, mut w) = welcomed();
        let list = ServerMsg::Init(PlayerList {
            players: vec![
                PlayerState {
                    id: WireId::from("p2"),
                    x: Some(1.0),
                    z: Some(1.0),
                    ..PlayerState::default()
                },
                PlayerState {
                    id: WireId::from("p1"),
                    ..PlayerState::default()
                },
            ],
        });
        r.apply(&mut w, list.clone(), ms(0));
        let events = r.apply(&mut w, list, ms(1));
        assert!(events.is_empty());
        assert_eq!(w.registry.players.len(), 1);

        let events = r.apply(
            &mut w,
            ServerMsg::Leave(PlayerRef {
                id: WireId::from("p2"),
            }),
            ms(2),
        );
        assert_eq!(events, vec![RenderEvent::PlayerRemoved(WireId::from("p2"))]);
        assert!(w.registry.players.is_empty());
    }

    #[test]
    fn weapon_update_applies_to_local_player() {
        let (r, mut w) = welcomed();
        let events = r.apply(
            &mut w,
            msg(r#"{"type":"weapon_update","id":"p1","weapon":"bow"}"#),
            ms(0),
        );
        assert_eq!(events, vec![RenderEvent::WeaponChanged(WireId::from("p1"))]);
        assert_eq!(
            w.registry.local.as_ref().unwrap().player.weapon,
            Some(WireId::from("bow"))
        );
    }

    #[test]
    fn identical_farm_update_rebuilds_nothing() {
        let (r, mut w) = welcomed();
        let first = r.apply(&mut w, plots([1, 2, 3, 0, 0, 0, 0, 0, 0]), ms(0));
        assert_eq!(
            first,
            vec![
                RenderEvent::PlotRebuilt(0),
                RenderEvent::PlotRebuilt(1),
                RenderEvent::PlotRebuilt(2)
            ]
        );
        let again = r.apply(&mut w, plots([1, 2, 3, 0, 0, 0, 0, 0, 0]), ms(1));
        assert!(again.is_empty());

        // Reset to empty is tolerated.
        let reset = r.apply(&mut w, plots([0, 2, 3, 0, 0, 0, 0, 0, 0]), ms(2));
        assert_eq!(reset, vec![RenderEvent::PlotRebuilt(0)]);
    }

    #[test]
    fn invalid_stage_leaves_plot_unchanged() {
        let (r, mut w) = welcomed();
        r.apply(&mut w, plots([1, 0, 0, 0, 0, 0, 0, 0, 0]), ms(0));
        let events = r.apply(&mut w, plots([7, 0, 0, 0, 0, 0, 0, 0, 0]), ms(1));
        assert!(events.is_empty());
        assert_eq!(w.registry.plots[0].stage, GrowthStage::Planted);
    }

    #[test]
    fn death_then_respawn_clears_transient_state() {
        let (r, mut w) = welcomed();
        w.registry.local.as_mut().unwrap().action_until = Some(ms(2_000));
        let events = r.apply(&mut w, msg(r#"{"type":"player_death","id":"p1"}"#), ms(100));
        assert_eq!(
            events,
            vec![
                RenderEvent::PlayerDied(WireId::from("p1")),
                RenderEvent::ToolDetached
            ]
        );
        let me = w.registry.local.as_ref().unwrap();
        assert!(!me.player.is_alive());
        assert_eq!(me.death_started, Some(ms(100)));
        assert!(!me.is_acting());

        r.apply(
            &mut w,
            msg(r#"{"type":"player_respawn","id":"p1","x":7,"z":-3,"rotation":1,"faceIndex":4}"#),
            ms(10_000),
        );
        let me = w.registry.local.as_ref().unwrap();
        assert!(me.player.is_alive());
        assert_eq!(me.player.position.current, Vec3::ground(7.0, -3.0));
        assert_eq!(me.player.heading.current, 1.0);
        assert_eq!(me.player.cosmetics.face_index, 4);
        assert_eq!(me.death_started, None);
        assert_eq!(me.player.label(), me.player.display_name());
    }

    #[test]
    fn dead_remote_player_ignores_movement() {
        let (r, mut w) = welcomed();
        r.apply(&mut w, msg(r#"{"type":"join","id":"p2","x":1,"z":1}"#), ms(0));
        r.apply(&mut w, msg(r#"{"type":"player_death","id":"p2"}"#), ms(1));
        r.apply(&mut w, msg(r#"{"type":"update","id":"p2","x":20,"z":20}"#), ms(2));
        let p2 = &w.registry.players[&WireId::from("p2")];
        assert_eq!(p2.rendered_position(), Vec3::ground(1.0, 1.0));
        assert_eq!(p2.position.target, Vec3::ground(1.0, 1.0));
    }

    #[test]
    fn spawned_pickup_survives_one_missing_list() {
        let (r, mut w) = welcomed();
        r.apply(
            &mut w,
            msg(r#"{"type":"pickup_spawned","id":"k1","itemType":"coin","x":1,"z":1}"#),
            ms(0),
        );
        let empty = ServerMsg::WorldUpdate(WorldUpdate {
            pickups: Some(vec![]),
            ..WorldUpdate::default()
        });
        r.apply(&mut w, empty.clone(), ms(1));
        assert!(w.registry.pickups.contains_key(&WireId::from("k1")));
        r.apply(&mut w, empty, ms(2));
        assert!(w.registry.pickups.is_empty());
    }

    #[test]
    fn full_lists_garbage_collect() {
        let (r, mut w) = welcomed();
        r.apply(
            &mut w,
            msg(r#"{"type":"world_update","bullets":[{"id":1,"x":0,"z":0},{"id":2,"x":1,"z":1,"ownerId":"dragon","speed":2}],"sheeps":[{"id":"s1","x":3,"z":3,"isHopping":true}]}"#),
            ms(0),
        );
        assert_eq!(w.registry.projectiles.len(), 2);
        assert_eq!(
            w.registry.projectiles[&WireId::from("2")].class,
            ProjectileClass::BossFast
        );
        assert!(w.registry.sheep[&WireId::from("s1")].hopping);

        r.apply(
            &mut w,
            msg(r#"{"type":"world_update","bullets":[{"id":"2","x":2,"z":2}]}"#),
            ms(16),
        );
        assert_eq!(w.registry.projectiles.len(), 1);
        let p = &w.registry.projectiles[&WireId::from("2")];
        assert_eq!(p.position.current, Vec3::ground(1.0, 1.0));
        assert_eq!(p.position.target, Vec3::ground(2.0, 2.0));
        // Sheep list absent from this update: untouched.
        assert_eq!(w.registry.sheep.len(), 1);
    }

    #[test]
    fn economy_messages() {
        let (r, mut w) = welcomed();
        r.apply(&mut w, msg(r#"{"type":"buy_success","coins":40,"inventory":["hat"]}"#), ms(0));
        r.apply(&mut w, msg(r#"{"type":"coins_earned","amount":5}"#), ms(1));
        r.apply(&mut w, msg(r#"{"type":"inventory_update","inventory":["hat","bow"]}"#), ms(2));
        assert_eq!(w.economy.coins, 45);
        assert_eq!(w.economy.inventory, vec!["hat".to_string(), "bow".to_string()]);
    }

    #[test]
    fn null_fields_fall_back_without_losing_the_update() {
        let r = Reconciler::new(&WorldConfig::default());
        let mut w = World::default();
        r.apply(
            &mut w,
            msg(r#"{"type":"welcome","id":"p1","x":null,"z":4,"rotation":null,"coins":12}"#),
            ms(0),
        );
        let me = w.registry.local.as_ref().unwrap();
        assert_eq!(me.player.position.current, Vec3::ground(0.0, 4.0));
        assert_eq!(w.economy.coins, 12);

        r.apply(
            &mut w,
            msg(r#"{"type":"world_update",
                "dragon":{"x":5,"z":5,"rotation":0,"health":9,"maxHealth":10},
                "pickups":[{"id":"k1","itemType":null,"x":null,"z":1}],
                "sheeps":[{"id":"s1","x":2,"z":2,"isHopping":null}]}"#),
            ms(16),
        );
        let b = w.registry.boss.as_ref().unwrap();
        assert_eq!(b.health, 9);
        assert_eq!(b.position.target, Vec3::ground(5.0, 5.0));
        // Pickups without a usable position are skipped.
        assert!(w.registry.pickups.is_empty());
        assert!(!w.registry.sheep[&WireId::from("s1")].hopping);

        r.apply(&mut w, msg(r#"{"type":"buy_success","coins":null,"inventory":null}"#), ms(32));
        assert_eq!(w.economy.coins, 12);
    }

    #[test]
    fn error_becomes_expiring_toast() {
        let (r, mut w) = welcomed();
        r.apply(&mut w, msg(r#"{"type":"error","message":"Not enough coins"}"#), ms(500));
        let toast = w.toast.as_ref().unwrap();
        assert_eq!(toast.message, "Not enough coins");
        assert_eq!(toast.expires_at, ms(3_500));
    }

    #[test]
    fn boss_hit_then_death() {
        let (r, mut w) = welcomed();
        r.apply(
            &mut w,
            ServerMsg::DragonUpdate(DragonState {
                health: Some(10.0),
                x: Some(0.0),
                z: Some(0.0),
                rotation: Some(0.0),
                ..DragonState::default()
            }),
            ms(0),
        );
        r.apply(
            &mut w,
            msg(r#"{"type":"dragon_hit","health":7,"damageList":[{"name":"Bob","damage":3}]}"#),
            ms(10),
        );
        let b = w.registry.boss.as_ref().unwrap();
        assert_eq!(b.health, 7);
        assert_eq!(b.damage_list[0].name, "Bob");
        assert_eq!(b.damage_list[0].damage, 3.0);

        r.apply(&mut w, msg(r#"{"type":"dragon_death"}"#), ms(20));
        let b = w.registry.boss.as_ref().unwrap();
        assert!(b.is_dead());
        assert!(b.damage_list.is_empty());
    }
}
