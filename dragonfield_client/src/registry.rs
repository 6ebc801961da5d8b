//! Entity registry.
//!
//! One keyed store per entity class. Each spatial entity carries both the last
//! authoritative target and the currently rendered value in a [`Smoothed`]
//! pair. Only the reconciliation engine creates or removes entries; the tick
//! routine only advances rendered fields.

use std::collections::HashMap;
use std::time::Duration;

use dragonfield_shared::{
    math::{angle_delta, lerp_angle, Vec3, SNAP_EPSILON},
    net::{Gender, WireId},
};

use crate::boss::Boss;

/// Number of farm plots; plot identity is the array index.
pub const PLOT_COUNT: usize = 9;

/// Owner id the server uses for boss projectiles.
pub const BOSS_OWNER_ID: &str = "dragon";

/// Projectile speed above which a boss projectile uses the fast visual.
pub const FAST_PROJECTILE_SPEED: f32 = 1.0;

/// Rendered value plus the target it converges toward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothed<T> {
    pub current: T,
    pub target: T,
}

impl<T: Copy> Smoothed<T> {
    /// Starts with `current == target`.
    pub fn settled(value: T) -> Self {
        Self {
            current: value,
            target: value,
        }
    }

    pub fn set_target(&mut self, value: T) {
        self.target = value;
    }

    /// Moves both current and target to `value`.
    pub fn snap(&mut self, value: T) {
        self.current = value;
        self.target = value;
    }
}

impl Smoothed<Vec3> {
    /// Blends current toward target by `factor` in `[0, 1]`.
    pub fn advance(&mut self, factor: f32) {
        self.current = self.current.lerp(self.target, factor);
        if self.error() < SNAP_EPSILON {
            self.current = self.target;
        }
    }

    pub fn error(&self) -> f32 {
        self.target.sub(self.current).len()
    }
}

impl Smoothed<f32> {
    /// Blends a heading along the short arc.
    pub fn advance(&mut self, factor: f32) {
        self.current = lerp_angle(self.current, self.target, factor);
        if self.error() < SNAP_EPSILON {
            self.current = self.target;
        }
    }

    pub fn error(&self) -> f32 {
        angle_delta(self.current, self.target).abs()
    }
}

/// Cosmetic choices that require a model rebuild when they change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cosmetics {
    pub gender: Gender,
    pub face_index: u32,
}

/// Alive/dead state of a player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Life {
    Alive,
    /// Rendered position is pinned to `anchor` until respawn.
    Dead { anchor: Vec3, since: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Planting,
    Watering,
    Harvesting,
}

impl ActionKind {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "planting" => Some(ActionKind::Planting),
            "watering" => Some(ActionKind::Watering),
            "harvesting" => Some(ActionKind::Harvesting),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Planting => "planting",
            ActionKind::Watering => "watering",
            ActionKind::Harvesting => "harvesting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerAction {
    pub kind: ActionKind,
    pub plot_id: usize,
}

/// Everything needed to create a player. `cosmetics` is required so later
/// rebuild comparisons always have a baseline.
#[derive(Debug, Clone)]
pub struct PlayerSpawn {
    pub id: WireId,
    pub position: Vec3,
    pub heading: f32,
    pub username: String,
    pub first_name: String,
    pub cosmetics: Cosmetics,
    pub weapon: Option<WireId>,
}

/// A player, remote or local.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: WireId,
    pub username: String,
    pub first_name: String,
    pub cosmetics: Cosmetics,
    pub weapon: Option<WireId>,
    pub position: Smoothed<Vec3>,
    pub heading: Smoothed<f32>,
    pub life: Life,
    pub action: Option<PlayerAction>,
}

impl Player {
    pub fn spawn(spawn: PlayerSpawn) -> Self {
        Self {
            id: spawn.id,
            username: spawn.username,
            first_name: spawn.first_name,
            cosmetics: spawn.cosmetics,
            weapon: spawn.weapon,
            position: Smoothed::settled(spawn.position),
            heading: Smoothed::settled(spawn.heading),
            life: Life::Alive,
            action: None,
        }
    }

    /// Username, else first name, else a placeholder.
    pub fn display_name(&self) -> &str {
        if !self.username.is_empty() {
            &self.username
        } else if !self.first_name.is_empty() {
            &self.first_name
        } else {
            "Player"
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.life, Life::Alive)
    }

    /// Floating name label; replaced by a death message while dead.
    pub fn label(&self) -> String {
        match self.life {
            Life::Alive => self.display_name().to_string(),
            Life::Dead { .. } => format!("{} has fallen", self.display_name()),
        }
    }

    /// Position the renderer should draw at.
    pub fn rendered_position(&self) -> Vec3 {
        match self.life {
            Life::Alive => self.position.current,
            Life::Dead { anchor, .. } => anchor,
        }
    }
}

/// The player this client controls.
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    pub player: Player,
    /// When the local respawn countdown started.
    pub death_started: Option<Duration>,
    /// Farming lock deadline; the action and its tool clear at this time.
    pub action_until: Option<Duration>,
}

impl LocalPlayer {
    pub fn new(player: Player) -> Self {
        Self {
            player,
            death_started: None,
            action_until: None,
        }
    }

    pub fn is_acting(&self) -> bool {
        self.action_until.is_some()
    }
}

/// Ambient creature.
#[derive(Debug, Clone)]
pub struct Sheep {
    pub id: WireId,
    pub position: Smoothed<Vec3>,
    pub hopping: bool,
    /// Continuous phase driving the hop offset, radians.
    pub hop_phase: f32,
    pub label: Option<String>,
}

impl Sheep {
    pub fn new(id: WireId, position: Vec3) -> Self {
        Self {
            id,
            position: Smoothed::settled(position),
            hopping: false,
            hop_phase: 0.0,
            label: None,
        }
    }

    /// Vertical offset for the current hop phase.
    pub fn hop_offset(&self, height: f32) -> f32 {
        if self.hopping {
            self.hop_phase.sin().abs() * height
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileClass {
    Player,
    Boss,
    BossFast,
}

impl ProjectileClass {
    pub fn classify(owner_id: Option<&WireId>, speed: Option<f32>) -> Self {
        let boss_owned = owner_id.is_some_and(|o| o.as_str() == BOSS_OWNER_ID);
        match (boss_owned, speed) {
            (true, Some(s)) if s > FAST_PROJECTILE_SPEED => ProjectileClass::BossFast,
            (true, _) => ProjectileClass::Boss,
            (false, _) => ProjectileClass::Player,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: WireId,
    pub position: Smoothed<Vec3>,
    pub owner_id: Option<WireId>,
    pub class: ProjectileClass,
}

#[derive(Debug, Clone)]
pub struct Pickup {
    pub id: WireId,
    pub item_type: String,
    pub recipient_id: Option<WireId>,
    pub position: Vec3,
    /// A `collect_pickup` was already sent for this id.
    pub collect_requested: bool,
    /// Seen only through `pickup_spawned`, not yet confirmed by a full list.
    pub unconfirmed: bool,
}

impl Pickup {
    pub fn is_for(&self, player: &WireId) -> bool {
        self.recipient_id.as_ref() == Some(player)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum GrowthStage {
    #[default]
    Empty = 0,
    Planted = 1,
    Growing = 2,
    Harvestable = 3,
}

impl GrowthStage {
    pub fn from_wire(stage: i64) -> Option<Self> {
        match stage {
            0 => Some(GrowthStage::Empty),
            1 => Some(GrowthStage::Planted),
            2 => Some(GrowthStage::Growing),
            3 => Some(GrowthStage::Harvestable),
            _ => None,
        }
    }

    /// The farming action this stage invites, if any.
    pub fn next_action(self) -> Option<ActionKind> {
        match self {
            GrowthStage::Empty => Some(ActionKind::Planting),
            GrowthStage::Planted => Some(ActionKind::Watering),
            GrowthStage::Growing => None,
            GrowthStage::Harvestable => Some(ActionKind::Harvesting),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FarmPlot {
    pub stage: GrowthStage,
    /// Server epoch milliseconds.
    pub watered_at: Option<i64>,
}

impl FarmPlot {
    /// Remaining growth time at server time `now_ms`, if growing.
    pub fn remaining_growth(&self, now_ms: i64, growth_ms: i64) -> Option<Duration> {
        if self.stage != GrowthStage::Growing {
            return None;
        }
        let watered_at = self.watered_at?;
        let left = (watered_at + growth_ms - now_ms).max(0);
        Some(Duration::from_millis(left as u64))
    }
}

/// Coins, inventory and scoreboard shown by the UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Economy {
    pub coins: i64,
    pub inventory: Vec<String>,
    pub scores: Vec<dragonfield_shared::net::ScoreEntry>,
}

/// All client-side entity state.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub local: Option<LocalPlayer>,
    pub players: HashMap<WireId, Player>,
    pub boss: Option<Boss>,
    pub sheep: HashMap<WireId, Sheep>,
    pub projectiles: HashMap<WireId, Projectile>,
    pub pickups: HashMap<WireId, Pickup>,
    pub plots: [FarmPlot; PLOT_COUNT],
}

impl Registry {
    pub fn local_id(&self) -> Option<&WireId> {
        self.local.as_ref().map(|l| &l.player.id)
    }

    pub fn is_local(&self, id: &WireId) -> bool {
        self.local_id() == Some(id)
    }

    /// Looks up a player by id, local or remote.
    pub fn player(&self, id: &WireId) -> Option<&Player> {
        match &self.local {
            Some(local) if &local.player.id == id => Some(&local.player),
            _ => self.players.get(id),
        }
    }

    pub fn player_mut(&mut self, id: &WireId) -> Option<&mut Player> {
        match &mut self.local {
            Some(local) if &local.player.id == id => Some(&mut local.player),
            _ => self.players.get_mut(id),
        }
    }

    /// Drops everything the server re-sends after a reconnect.
    pub fn clear_remote(&mut self) {
        self.players.clear();
        self.sheep.clear();
        self.projectiles.clear();
        self.pickups.clear();
    }
}
