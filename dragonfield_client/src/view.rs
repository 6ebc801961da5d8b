//! View model.
//!
//! The core never touches presentation. Each tick it produces a [`Frame`]: the
//! rendered entity state, derived camera, UI state and the discrete
//! [`RenderEvent`]s (rebuilds, spawns, removals) since the previous frame.

use std::time::Duration;

use dragonfield_shared::{
    config::WorldConfig,
    math::{forward, Vec3},
    net::{DamageEntry, ScoreEntry, WireId},
};

use crate::{
    boss::BossTimings,
    mode::Mode,
    reconcile::World,
    registry::{
        ActionKind, Cosmetics, GrowthStage, PlayerAction, ProjectileClass, Registry, PLOT_COUNT,
    },
};

const FOLLOW_DISTANCE: f32 = 8.0;
const FOLLOW_HEIGHT: f32 = 5.0;
const ORBIT_RADIUS: f32 = 35.0;
const ORBIT_HEIGHT: f32 = 22.0;

/// Discrete things the renderer must react to.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    LocalPlayerCreated(WireId),
    PlayerSpawned(WireId),
    /// Cosmetics changed; rebuild the model in place, keeping its transform.
    PlayerRebuilt(WireId),
    PlayerRemoved(WireId),
    WeaponChanged(WireId),
    /// Swap to the death marker.
    PlayerDied(WireId),
    PlayerRespawned(WireId),
    BossSpawning,
    BossAlive,
    BossDied,
    BossRemoved,
    BossFlinch,
    BossCharging,
    /// Growth stage of a plot changed; rebuild its crop.
    PlotRebuilt(usize),
    ToolAttached(ActionKind),
    ToolDetached,
}

/// Transient, auto-expiring user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub message: String,
    pub expires_at: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerView {
    pub id: WireId,
    pub label: String,
    pub position: Vec3,
    pub heading: f32,
    pub cosmetics: Cosmetics,
    pub weapon: Option<WireId>,
    pub alive: bool,
    pub action: Option<PlayerAction>,
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BossView {
    pub position: Vec3,
    pub heading: f32,
    pub opacity: f32,
    pub label_visible: bool,
    pub health: i32,
    pub max_health: i32,
    pub health_fraction: f32,
    pub charge_progress: Option<f32>,
    pub flinching: bool,
    pub damage_list: Vec<DamageEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheepView {
    pub id: WireId,
    pub position: Vec3,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileView {
    pub id: WireId,
    pub position: Vec3,
    pub class: ProjectileClass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickupView {
    pub id: WireId,
    pub item_type: String,
    pub position: Vec3,
    /// Not meant for the local player.
    pub dimmed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotView {
    pub index: usize,
    pub stage: GrowthStage,
    pub remaining_growth: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub eye: Vec3,
    pub look_at: Vec3,
}

/// Interactions currently offered to the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Affordances {
    pub shop: bool,
    pub obelisk: bool,
    pub farm: Option<(usize, ActionKind)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub mode: Mode,
    pub reconnecting: bool,
    /// Blocking, permanent: the client must be reloaded.
    pub update_required: bool,
    pub toast: Option<String>,
    pub respawn_countdown: Option<u32>,
    pub coins: i64,
    pub inventory: Vec<String>,
    pub scores: Vec<ScoreEntry>,
    pub affordances: Affordances,
    pub action_locked: bool,
    pub shoot_ready: bool,
}

/// Everything a renderer needs for one displayed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub now: Duration,
    pub players: Vec<PlayerView>,
    pub boss: Option<BossView>,
    pub sheep: Vec<SheepView>,
    pub projectiles: Vec<ProjectileView>,
    pub pickups: Vec<PickupView>,
    pub plots: Vec<PlotView>,
    pub camera: CameraState,
    pub ui: UiState,
    pub events: Vec<RenderEvent>,
}

impl Frame {
    pub fn player(&self, id: &str) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.id.as_str() == id)
    }

    pub fn local_player(&self) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.is_local)
    }
}

/// Inputs to [`build_frame`] that live outside the world.
pub struct FrameContext<'a> {
    pub now: Duration,
    pub epoch_ms: i64,
    pub cfg: &'a WorldConfig,
    pub timings: &'a BossTimings,
    pub mode: Mode,
    pub reconnecting: bool,
    pub update_required: bool,
    pub affordances: Affordances,
    pub shoot_ready: bool,
    pub orbit_angle: f32,
    pub events: Vec<RenderEvent>,
}

/// Whole seconds left on the local respawn countdown. Changes once per second
/// and bottoms out at zero; it never triggers a respawn by itself.
pub fn respawn_countdown(started: Duration, now: Duration, total_secs: u32) -> u32 {
    let elapsed = now.saturating_sub(started).as_secs();
    let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
    total_secs.saturating_sub(elapsed)
}

/// In Customization the registry still holds whatever the last connection
/// left behind; only the economy and UI state are shown then.
pub fn build_frame(world: &World, ctx: FrameContext<'_>) -> Frame {
    let offline;
    let reg = if ctx.mode.wants_connection() {
        &world.registry
    } else {
        offline = Registry::default();
        &offline
    };
    let now = ctx.now;

    let mut players: Vec<PlayerView> = reg
        .local
        .iter()
        .map(|l| (&l.player, true))
        .chain(reg.players.values().map(|p| (p, false)))
        .map(|(p, is_local)| PlayerView {
            id: p.id.clone(),
            label: p.label(),
            position: p.rendered_position(),
            heading: p.heading.current,
            cosmetics: p.cosmetics,
            weapon: p.weapon.clone(),
            alive: p.is_alive(),
            action: p.action,
            is_local,
        })
        .collect();
    players.sort_by(|a, b| b.is_local.cmp(&a.is_local).then_with(|| a.id.cmp(&b.id)));

    let boss = reg.boss.as_ref().map(|b| {
        let mut position = b.position.current;
        position.y += b.vertical_offset(now, ctx.timings);
        BossView {
            position,
            heading: b.heading.current,
            opacity: b.opacity(now, ctx.timings),
            label_visible: b.label_visible(),
            health: b.health,
            max_health: b.max_health,
            health_fraction: b.health_fraction(),
            charge_progress: b.charge_progress(now, ctx.timings),
            flinching: b.is_flinching(now),
            damage_list: b.damage_list.clone(),
        }
    });

    let mut sheep: Vec<SheepView> = reg
        .sheep
        .values()
        .map(|s| {
            let mut position = s.position.current;
            position.y += s.hop_offset(ctx.cfg.hop_height);
            SheepView {
                id: s.id.clone(),
                position,
                label: s.label.clone(),
            }
        })
        .collect();
    sheep.sort_by(|a, b| a.id.cmp(&b.id));

    let mut projectiles: Vec<ProjectileView> = reg
        .projectiles
        .values()
        .map(|p| ProjectileView {
            id: p.id.clone(),
            position: p.position.current,
            class: p.class,
        })
        .collect();
    projectiles.sort_by(|a, b| a.id.cmp(&b.id));

    let local_id = reg.local_id();
    let mut pickups: Vec<PickupView> = reg
        .pickups
        .values()
        .map(|p| PickupView {
            id: p.id.clone(),
            item_type: p.item_type.clone(),
            position: p.position,
            dimmed: !local_id.is_some_and(|id| p.is_for(id)),
        })
        .collect();
    pickups.sort_by(|a, b| a.id.cmp(&b.id));

    let plots = (0..PLOT_COUNT)
        .map(|index| {
            let plot = reg.plots[index];
            PlotView {
                index,
                stage: plot.stage,
                remaining_growth: plot.remaining_growth(ctx.epoch_ms, ctx.cfg.wheat_growth_ms),
            }
        })
        .collect();

    let camera = match (ctx.mode, reg.local.as_ref()) {
        (Mode::Playing, Some(local)) => {
            let at = local.player.rendered_position();
            let back = forward(local.player.heading.current).scale(-FOLLOW_DISTANCE);
            CameraState {
                eye: at.add(back).add(Vec3::new(0.0, FOLLOW_HEIGHT, 0.0)),
                look_at: at.add(Vec3::new(0.0, 1.0, 0.0)),
            }
        }
        _ => CameraState {
            eye: Vec3::new(
                ORBIT_RADIUS * ctx.orbit_angle.sin(),
                ORBIT_HEIGHT,
                ORBIT_RADIUS * ctx.orbit_angle.cos(),
            ),
            look_at: Vec3::ZERO,
        },
    };

    let local = reg.local.as_ref();
    let ui = UiState {
        mode: ctx.mode,
        reconnecting: ctx.reconnecting,
        update_required: ctx.update_required,
        toast: world
            .toast
            .as_ref()
            .filter(|t| now < t.expires_at)
            .map(|t| t.message.clone()),
        respawn_countdown: local
            .and_then(|l| l.death_started)
            .map(|started| respawn_countdown(started, now, ctx.cfg.respawn_countdown_secs)),
        coins: world.economy.coins,
        inventory: world.economy.inventory.clone(),
        scores: world.economy.scores.clone(),
        affordances: ctx.affordances,
        action_locked: local.is_some_and(|l| l.is_acting()),
        shoot_ready: ctx.shoot_ready,
    };

    Frame {
        now,
        players,
        boss,
        sheep,
        projectiles,
        pickups,
        plots,
        camera,
        ui,
        events: ctx.events,
    }
}
