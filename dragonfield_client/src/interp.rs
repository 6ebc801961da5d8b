//! Interpolation and simulation clock.
//!
//! The server sends discrete state at its own rate. Every display tick the
//! client moves rendered values toward their targets with frame-rate
//! independent exponential smoothing and expires time-boxed effects.

use std::f32::consts::TAU;
use std::time::Duration;

use dragonfield_shared::{config::WorldConfig, math::smoothing_factor};

use crate::{
    boss::{self, BossTimings},
    reconcile::World,
    view::RenderEvent,
};

/// Longest step fed to the smoothing; a stalled frame must not teleport.
pub const MAX_STEP: Duration = Duration::from_millis(250);

/// Monotonic simulation time, advanced only by explicit ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    now: Duration,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Advances by `dt` and returns the step the simulation should use.
    pub fn advance(&mut self, dt: Duration) -> Duration {
        self.now += dt;
        dt.min(MAX_STEP)
    }
}

/// Advances every rendered field by one tick.
pub fn advance(
    world: &mut World,
    now: Duration,
    dt: Duration,
    cfg: &WorldConfig,
    timings: &BossTimings,
) -> Vec<RenderEvent> {
    let mut events = Vec::new();
    let dt_sec = dt.as_secs_f32();
    let reg = &mut world.registry;

    let f = smoothing_factor(cfg.player_smoothing, dt_sec);
    // Dead players stay on their anchor.
    for player in reg.players.values_mut().filter(|p| p.is_alive()) {
        player.position.advance(f);
        player.heading.advance(f);
    }

    if let Some(me) = reg.local.as_mut() {
        if me.action_until.is_some_and(|until| now >= until) {
            me.action_until = None;
            me.player.action = None;
            events.push(RenderEvent::ToolDetached);
        }
    }

    events.extend(boss::advance(&mut reg.boss, now, dt, timings));

    let f = smoothing_factor(cfg.creature_smoothing, dt_sec);
    for sheep in reg.sheep.values_mut() {
        sheep.position.advance(f);
        if sheep.hopping {
            sheep.hop_phase = (sheep.hop_phase + cfg.hop_rate * dt_sec) % TAU;
        } else {
            sheep.hop_phase = 0.0;
        }
    }

    let f = smoothing_factor(cfg.projectile_smoothing, dt_sec);
    for projectile in reg.projectiles.values_mut() {
        projectile.position.advance(f);
    }

    if world.toast.as_ref().is_some_and(|t| now >= t.expires_at) {
        world.toast = None;
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use dragonfield_shared::{math::Vec3, net::WireId};

    use crate::registry::{Cosmetics, Player, PlayerSpawn, Sheep};

    const FRAME: Duration = Duration::from_millis(16);

    fn remote(world: &mut World, id: &str, at: Vec3) {
        let p = Player::spawn(PlayerSpawn {
            id: WireId::from(id),
            position: at,
            heading: 0.0,
            username: id.into(),
            first_name: String::new(),
            cosmetics: Cosmetics::default(),
            weapon: None,
        });
        world.registry.players.insert(WireId::from(id), p);
    }

    #[test]
    fn clock_clamps_long_frames() {
        let mut clock = Clock::new();
        assert_eq!(clock.advance(Duration::from_secs(3)), MAX_STEP);
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn remote_players_converge_within_bounded_ticks() {
        let cfg = WorldConfig::default();
        let t = BossTimings::from(&cfg);
        let mut world = World::default();
        remote(&mut world, "p2", Vec3::ground(5.0, 5.0));
        let id = WireId::from("p2");
        world
            .registry
            .players
            .get_mut(&id)
            .unwrap()
            .position
            .set_target(Vec3::ground(10.0, 5.0));

        let mut now = Duration::ZERO;
        let mut last_x = 5.0;
        for _ in 0..240 {
            now += FRAME;
            advance(&mut world, now, FRAME, &cfg, &t);
            let x = world.registry.players[&id].position.current.x;
            assert!(x >= last_x && x <= 10.0);
            last_x = x;
        }
        assert_eq!(
            world.registry.players[&id].position.current,
            Vec3::ground(10.0, 5.0)
        );
    }

    #[test]
    fn hop_phase_resets_when_idle() {
        let cfg = WorldConfig::default();
        let t = BossTimings::from(&cfg);
        let mut world = World::default();
        let mut sheep = Sheep::new(WireId::from("s1"), Vec3::ZERO);
        sheep.hopping = true;
        world.registry.sheep.insert(WireId::from("s1"), sheep);

        advance(&mut world, FRAME, FRAME, &cfg, &t);
        let s = &world.registry.sheep[&WireId::from("s1")];
        assert!(s.hop_phase > 0.0);
        assert!(s.hop_offset(cfg.hop_height) > 0.0);

        world
            .registry
            .sheep
            .get_mut(&WireId::from("s1"))
            .unwrap()
            .hopping = false;
        advance(&mut world, FRAME * 2, FRAME, &cfg, &t);
        assert_eq!(world.registry.sheep[&WireId::from("s1")].hop_phase, 0.0);
    }

    #[test]
    fn toast_expires() {
        let cfg = WorldConfig::default();
        let t = BossTimings::from(&cfg);
        let mut world = World::default();
        world.show_toast("nope", Duration::ZERO, Duration::from_secs(3));
        advance(&mut world, Duration::from_millis(2_999), FRAME, &cfg, &t);
        assert!(world.toast.is_some());
        advance(&mut world, Duration::from_secs(3), FRAME, &cfg, &t);
        assert!(world.toast.is_none());
    }
}
