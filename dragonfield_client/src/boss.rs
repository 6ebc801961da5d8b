//! Boss lifecycle.
//!
//! `Absent` is represented by `Option::None` in the registry. The remaining
//! states live in [`BossPhase`]:
//!
//! ```text
//! Absent -> Spawning (2 s rise + fade-in) -> Alive -> Dead (2 s fall + fade-out) -> Absent
//!                 ^                                     |
//!                 +------ new non-death data -----------+
//! ```
//!
//! Charging and Flinching are timed sub-states of Alive (and Spawning) kept as
//! deadlines rather than phases, so they can overlap.

use std::time::Duration;

use dragonfield_shared::{
    config::WorldConfig,
    math::{smoothing_factor, Vec3},
    net::{DamageEntry, DragonHit, DragonState, WireId},
};
use tracing::debug;

use crate::{registry::Smoothed, view::RenderEvent};

/// How far below ground the boss starts its spawn rise.
const RISE_DEPTH: f32 = 6.0;
/// How far the boss sinks during its death fall.
const FALL_DEPTH: f32 = 3.0;

/// Effect durations for the boss, taken from the world config.
#[derive(Debug, Clone, Copy)]
pub struct BossTimings {
    pub spawn: Duration,
    pub death: Duration,
    pub charge: Duration,
    pub flinch: Duration,
    pub default_max_health: i32,
    pub smoothing: f32,
}

impl From<&WorldConfig> for BossTimings {
    fn from(cfg: &WorldConfig) -> Self {
        Self {
            spawn: Duration::from_millis(cfg.boss_spawn_ms),
            death: Duration::from_millis(cfg.boss_death_ms),
            charge: Duration::from_millis(cfg.boss_charge_ms),
            flinch: Duration::from_millis(cfg.boss_flinch_ms),
            default_max_health: cfg.boss_default_max_health,
            smoothing: cfg.boss_smoothing,
        }
    }
}

impl Default for BossTimings {
    fn default() -> Self {
        Self::from(&WorldConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BossPhase {
    Spawning { since: Duration },
    Alive,
    Dead { since: Duration },
}

#[derive(Debug, Clone)]
pub struct Boss {
    pub position: Smoothed<Vec3>,
    pub heading: Smoothed<f32>,
    pub health: i32,
    pub max_health: i32,
    pub damage_list: Vec<DamageEntry>,
    pub phase: BossPhase,
    pub charging_until: Option<Duration>,
    pub flinch_until: Option<Duration>,
    /// Player the boss is currently attacking.
    pub target_player_id: Option<WireId>,
}

fn wire_health(h: f32) -> Option<i32> {
    h.is_finite().then(|| h.round() as i32)
}

impl Boss {
    fn spawn(state: &DragonState, now: Duration, t: &BossTimings) -> Self {
        let position = Vec3::ground(
            state.x.filter(|v| v.is_finite()).unwrap_or(0.0),
            state.z.filter(|v| v.is_finite()).unwrap_or(0.0),
        );
        let heading = state.rotation.filter(|v| v.is_finite()).unwrap_or(0.0);
        let mut boss = Self {
            position: Smoothed::settled(position),
            heading: Smoothed::settled(heading),
            health: t.default_max_health,
            max_health: t.default_max_health,
            damage_list: Vec::new(),
            phase: BossPhase::Spawning { since: now },
            charging_until: None,
            flinch_until: None,
            target_player_id: None,
        };
        boss.absorb(state);
        if state.max_health.is_none() {
            boss.max_health = boss.max_health.max(boss.health);
        }
        boss
    }

    /// Copies tracked fields from a snapshot; lifecycle is handled by callers.
    fn absorb(&mut self, state: &DragonState) {
        let mut target = self.position.target;
        if let Some(x) = state.x.filter(|v| v.is_finite()) {
            target.x = x;
        }
        if let Some(z) = state.z.filter(|v| v.is_finite()) {
            target.z = z;
        }
        self.position.set_target(target);
        if let Some(r) = state.rotation.filter(|v| v.is_finite()) {
            self.heading.set_target(r);
        }
        if let Some(h) = state.health.and_then(wire_health) {
            self.health = h;
        }
        if let Some(m) = state.max_health.and_then(wire_health).filter(|m| *m > 0) {
            self.max_health = m;
        }
        if let Some(list) = &state.damage_list {
            self.damage_list = list.clone();
        }
        self.target_player_id = state.target_player_id.clone().filter(|id| !id.is_empty());
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.phase, BossPhase::Dead { .. })
    }

    /// Name and health bar are shown until death.
    pub fn label_visible(&self) -> bool {
        !self.is_dead()
    }

    pub fn is_charging(&self, now: Duration) -> bool {
        self.charging_until.is_some_and(|until| now < until)
    }

    pub fn is_flinching(&self, now: Duration) -> bool {
        self.flinch_until.is_some_and(|until| now < until)
    }

    pub fn health_fraction(&self) -> f32 {
        if self.max_health <= 0 {
            return 0.0;
        }
        (self.health as f32 / self.max_health as f32).clamp(0.0, 1.0)
    }

    fn kill(&mut self, now: Duration) {
        self.phase = BossPhase::Dead { since: now };
        self.damage_list.clear();
        self.target_player_id = None;
        self.charging_until = None;
        self.flinch_until = None;
        // Pinned where it fell.
        let here = self.position.current;
        self.position.snap(here);
        let facing = self.heading.current;
        self.heading.snap(facing);
    }

    /// Opacity for the current phase, in `[0, 1]`.
    pub fn opacity(&self, now: Duration, t: &BossTimings) -> f32 {
        match self.phase {
            BossPhase::Spawning { since } => progress(now, since, t.spawn),
            BossPhase::Alive => 1.0,
            BossPhase::Dead { since } => 1.0 - progress(now, since, t.death),
        }
    }

    /// Vertical offset from the rise/fall animations.
    pub fn vertical_offset(&self, now: Duration, t: &BossTimings) -> f32 {
        match self.phase {
            BossPhase::Spawning { since } => -RISE_DEPTH * (1.0 - progress(now, since, t.spawn)),
            BossPhase::Alive => 0.0,
            BossPhase::Dead { since } => -FALL_DEPTH * progress(now, since, t.death),
        }
    }

    /// Charge-up progress in `[0, 1]` while charging.
    pub fn charge_progress(&self, now: Duration, t: &BossTimings) -> Option<f32> {
        let until = self.charging_until.filter(|until| now < *until)?;
        Some(progress(now, until.saturating_sub(t.charge), t.charge))
    }
}

fn progress(now: Duration, since: Duration, total: Duration) -> f32 {
    if total.is_zero() {
        return 1.0;
    }
    (now.saturating_sub(since).as_secs_f32() / total.as_secs_f32()).clamp(0.0, 1.0)
}

/// Applies a boss snapshot (`dragon_update`, `world_update.dragon`,
/// `welcome.dragon`).
pub fn apply_state(
    slot: &mut Option<Boss>,
    state: &DragonState,
    now: Duration,
    t: &BossTimings,
) -> Option<RenderEvent> {
    let dies = state.implies_death();
    match slot {
        None if dies => {
            debug!("Dead boss snapshot while absent; ignoring");
            None
        }
        None => {
            *slot = Some(Boss::spawn(state, now, t));
            Some(RenderEvent::BossSpawning)
        }
        Some(boss) if boss.is_dead() => {
            if dies {
                None
            } else {
                *boss = Boss::spawn(state, now, t);
                Some(RenderEvent::BossSpawning)
            }
        }
        Some(boss) => {
            boss.absorb(state);
            if dies {
                boss.kill(now);
                Some(RenderEvent::BossDied)
            } else {
                None
            }
        }
    }
}

/// `dragon_respawn`: re-enters Spawning from Dead or Absent.
pub fn respawn(
    slot: &mut Option<Boss>,
    state: &DragonState,
    now: Duration,
    t: &BossTimings,
) -> Option<RenderEvent> {
    match slot {
        Some(boss) if !boss.is_dead() => {
            boss.absorb(state);
            None
        }
        _ => {
            let mut fresh = Boss::spawn(state, now, t);
            if state.implies_death() {
                fresh.health = fresh.max_health;
            }
            *slot = Some(fresh);
            Some(RenderEvent::BossSpawning)
        }
    }
}

/// `dragon_hit`: damage attribution, health and a flinch window. Never changes
/// the lifecycle phase of an existing boss.
pub fn hit(
    slot: &mut Option<Boss>,
    hit: &DragonHit,
    now: Duration,
    t: &BossTimings,
) -> Vec<RenderEvent> {
    let mut events = Vec::new();
    if slot.is_none() {
        let seed = DragonState {
            x: hit.x,
            z: hit.z,
            ..DragonState::default()
        };
        *slot = Some(Boss::spawn(&seed, now, t));
        events.push(RenderEvent::BossSpawning);
    }
    let Some(boss) = slot.as_mut() else {
        return events;
    };
    if boss.is_dead() {
        return events;
    }
    if let Some(h) = wire_health(hit.health) {
        boss.health = h;
    }
    boss.damage_list = hit.damage_list.clone();
    let mut target = boss.position.target;
    if let Some(x) = hit.x.filter(|v| v.is_finite()) {
        target.x = x;
    }
    if let Some(z) = hit.z.filter(|v| v.is_finite()) {
        target.z = z;
    }
    boss.position.set_target(target);
    boss.flinch_until = Some(now + t.flinch);
    events.push(RenderEvent::BossFlinch);
    events
}

/// `dragon_death`.
pub fn kill(slot: &mut Option<Boss>, now: Duration) -> Option<RenderEvent> {
    match slot {
        Some(boss) if !boss.is_dead() => {
            boss.kill(now);
            Some(RenderEvent::BossDied)
        }
        _ => None,
    }
}

/// `dragon_charging`.
pub fn start_charging(
    slot: &mut Option<Boss>,
    now: Duration,
    t: &BossTimings,
) -> Option<RenderEvent> {
    match slot {
        Some(boss) if !boss.is_dead() => {
            boss.charging_until = Some(now + t.charge);
            Some(RenderEvent::BossCharging)
        }
        _ => None,
    }
}

/// Per-tick advance: phase timers, sub-state expiry, smoothing.
pub fn advance(
    slot: &mut Option<Boss>,
    now: Duration,
    dt: Duration,
    t: &BossTimings,
) -> Option<RenderEvent> {
    let boss = slot.as_mut()?;
    if boss.charging_until.is_some_and(|until| now >= until) {
        boss.charging_until = None;
    }
    if boss.flinch_until.is_some_and(|until| now >= until) {
        boss.flinch_until = None;
    }
    match boss.phase {
        BossPhase::Dead { since } => {
            if now.saturating_sub(since) >= t.death {
                *slot = None;
                return Some(RenderEvent::BossRemoved);
            }
            None
        }
        phase => {
            let f = smoothing_factor(t.smoothing, dt.as_secs_f32());
            boss.position.advance(f);
            boss.heading.advance(f);
            match phase {
                BossPhase::Spawning { since } if now.saturating_sub(since) >= t.spawn => {
                    boss.phase = BossPhase::Alive;
                    Some(RenderEvent::BossAlive)
                }
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn state(health: f32) -> DragonState {
        DragonState {
            x: Some(0.0),
            z: Some(0.0),
            rotation: Some(0.0),
            health: Some(health),
            ..DragonState::default()
        }
    }

    #[test]
    fn spawning_becomes_alive_after_two_seconds() {
        let t = BossTimings::default();
        let mut slot = None;
        assert_eq!(
            apply_state(&mut slot, &state(10.0), ms(0), &t),
            Some(RenderEvent::BossSpawning)
        );
        let boss = slot.as_ref().unwrap();
        assert!(matches!(boss.phase, BossPhase::Spawning { .. }));
        assert_eq!(boss.opacity(ms(1_000), &t), 0.5);

        assert_eq!(advance(&mut slot, ms(1_999), ms(16), &t), None);
        assert_eq!(
            advance(&mut slot, ms(2_000), ms(16), &t),
            Some(RenderEvent::BossAlive)
        );
        let boss = slot.as_ref().unwrap();
        assert_eq!(boss.phase, BossPhase::Alive);
        assert_eq!(boss.opacity(ms(2_000), &t), 1.0);
        assert_eq!(boss.vertical_offset(ms(2_000), &t), 0.0);
    }

    #[test]
    fn dead_snapshot_never_creates_a_boss() {
        let t = BossTimings::default();
        let mut slot = None;
        assert_eq!(apply_state(&mut slot, &state(0.0), ms(0), &t), None);
        assert!(slot.is_none());
    }

    #[test]
    fn health_implied_death_then_despawn() {
        let t = BossTimings::default();
        let mut slot = None;
        apply_state(&mut slot, &state(10.0), ms(0), &t);
        assert_eq!(
            apply_state(&mut slot, &state(0.0), ms(500), &t),
            Some(RenderEvent::BossDied)
        );
        let boss = slot.as_ref().unwrap();
        assert!(!boss.label_visible());
        assert_eq!(advance(&mut slot, ms(2_499), ms(16), &t), None);
        assert_eq!(
            advance(&mut slot, ms(2_500), ms(16), &t),
            Some(RenderEvent::BossRemoved)
        );
        assert!(slot.is_none());
    }

    #[test]
    fn new_data_while_dead_respawns() {
        let t = BossTimings::default();
        let mut slot = None;
        apply_state(&mut slot, &state(10.0), ms(0), &t);
        kill(&mut slot, ms(100));
        assert_eq!(
            apply_state(&mut slot, &state(50.0), ms(200), &t),
            Some(RenderEvent::BossSpawning)
        );
        let boss = slot.as_ref().unwrap();
        assert_eq!(boss.phase, BossPhase::Spawning { since: ms(200) });
        assert_eq!(boss.health, 50);
    }

    #[test]
    fn dead_boss_does_not_move() {
        let t = BossTimings::default();
        let mut slot = None;
        apply_state(&mut slot, &state(10.0), ms(0), &t);
        kill(&mut slot, ms(10));
        // A late hit carrying a position is dropped.
        hit(
            &mut slot,
            &DragonHit {
                health: 5.0,
                damage_list: vec![],
                x: Some(30.0),
                z: Some(30.0),
            },
            ms(20),
            &t,
        );
        advance(&mut slot, ms(40), ms(16), &t);
        let boss = slot.as_ref().unwrap();
        assert_eq!(boss.position.current, Vec3::ZERO);
        assert_eq!(boss.position.target, Vec3::ZERO);
    }

    #[test]
    fn flinch_and_charge_windows_expire() {
        let t = BossTimings::default();
        let mut slot = None;
        apply_state(&mut slot, &state(10.0), ms(0), &t);
        hit(
            &mut slot,
            &DragonHit {
                health: 7.0,
                damage_list: vec![],
                x: None,
                z: None,
            },
            ms(100),
            &t,
        );
        start_charging(&mut slot, ms(100), &t);
        let boss = slot.as_ref().unwrap();
        assert!(boss.is_flinching(ms(399)));
        assert!(!boss.is_flinching(ms(400)));
        assert!(boss.is_charging(ms(1_099)));
        assert_eq!(boss.charge_progress(ms(600), &t), Some(0.5));

        advance(&mut slot, ms(1_100), ms(16), &t);
        let boss = slot.as_ref().unwrap();
        assert!(boss.flinch_until.is_none());
        assert!(boss.charging_until.is_none());
    }

    #[test]
    fn targeted_player_tracks_snapshots() {
        let t = BossTimings::default();
        let mut slot = None;
        let mut s = state(10.0);
        s.target_player_id = Some(WireId::from("p1"));
        apply_state(&mut slot, &s, ms(0), &t);
        assert_eq!(
            slot.as_ref().unwrap().target_player_id,
            Some(WireId::from("p1"))
        );
        kill(&mut slot, ms(10));
        assert_eq!(slot.as_ref().unwrap().target_player_id, None);
    }
}
