//! Local prediction and input controller.
//!
//! Turns sampled input into an optimistic local pose without waiting for the
//! server, and into throttled outbound intents. The server remains the
//! authority: nothing here is rolled back, later server state simply wins.

use std::time::Duration;

use dragonfield_shared::{
    config::{KeepOutZone, WorldConfig},
    math::{angle_delta, forward, right, wrap_angle, Vec3},
    net::ClientMsg,
};
use tracing::debug;

use crate::{
    input::InputState,
    mode::Mode,
    reconcile::World,
    registry::{ActionKind, PlayerAction},
    view::{Affordances, RenderEvent},
};

const DEGENERATE: f32 = 1e-6;

/// Pushes `next` out of `zone` onto its boundary, sliding along the line from
/// the zone center. A point exactly at the center is pushed back toward
/// `prev`.
pub fn slide_out(prev: Vec3, next: Vec3, zone: &KeepOutZone) -> Vec3 {
    let center = zone.center();
    let offset = Vec3::ground(next.x - center.x, next.z - center.z);
    let dist = offset.len();
    if dist >= zone.radius {
        return next;
    }
    let dir = if dist > DEGENERATE {
        offset.scale(1.0 / dist)
    } else {
        let back = Vec3::ground(prev.x - center.x, prev.z - center.z);
        let len = back.len();
        if len > DEGENERATE {
            back.scale(1.0 / len)
        } else {
            Vec3::ground(1.0, 0.0)
        }
    };
    Vec3::new(
        center.x + dir.x * zone.radius,
        next.y,
        center.z + dir.z * zone.radius,
    )
}

/// Collision against every keep-out zone, then the square world bounds.
pub fn resolve_motion(prev: Vec3, next: Vec3, cfg: &WorldConfig) -> Vec3 {
    let mut at = next;
    for zone in cfg.keep_out_zones() {
        at = slide_out(prev, at, &zone);
    }
    let limit = cfg.world_half_extent;
    at.x = at.x.clamp(-limit, limit);
    at.z = at.z.clamp(-limit, limit);
    at
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SentPose {
    position: Vec3,
    heading: f32,
    at: Duration,
}

/// Per-session prediction state: throttles, cooldowns and the spectator orbit.
#[derive(Debug, Clone)]
pub struct Controller {
    cfg: WorldConfig,
    last_sent: Option<SentPose>,
    shoot_ready_at: Duration,
    orbit_angle: f32,
}

impl Controller {
    pub fn new(cfg: &WorldConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            last_sent: None,
            shoot_ready_at: Duration::ZERO,
            orbit_angle: 0.0,
        }
    }

    /// Forget the last sent pose; the next connection starts from scratch.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }

    pub fn orbit_angle(&self) -> f32 {
        self.orbit_angle
    }

    pub fn shoot_ready(&self, now: Duration) -> bool {
        now >= self.shoot_ready_at
    }

    /// One tick of local control. Returns the messages to send.
    pub fn step(
        &mut self,
        world: &mut World,
        mode: Mode,
        input: &InputState,
        now: Duration,
    ) -> Vec<ClientMsg> {
        let mut out = Vec::new();
        match mode {
            Mode::Customization => return out,
            Mode::Spectating => {
                self.orbit_angle =
                    wrap_angle(self.orbit_angle - input.look_dx * self.cfg.look_sensitivity);
                return out;
            }
            Mode::Playing => {}
        }
        let cfg = &self.cfg;
        let Some(me) = world.registry.local.as_mut() else {
            return out;
        };

        if me.player.is_alive() && !me.is_acting() {
            let axes = input.axes(cfg.joystick_radius);
            let heading = wrap_angle(
                me.player.heading.current + axes.turn * cfg.turn_speed
                    - input.look_dx * cfg.look_sensitivity,
            );
            let mut delta = forward(heading)
                .scale(axes.forward)
                .add(right(heading).scale(axes.strafe))
                .scale(cfg.move_speed);
            if delta.len() > cfg.move_speed {
                delta = delta.scale(cfg.move_speed / delta.len());
            }
            let prev = me.player.position.current;
            let next = resolve_motion(prev, prev.add(delta), cfg);
            me.player.position.snap(next);
            me.player.heading.snap(heading);
        }

        let position = me.player.position.current;
        let heading = me.player.heading.current;
        match self.last_sent {
            None => {
                self.last_sent = Some(SentPose {
                    position,
                    heading,
                    at: now,
                });
            }
            Some(last) => {
                let interval = Duration::from_millis(cfg.move_send_interval_ms);
                let moved = position.distance_xz(last.position) > cfg.move_epsilon
                    || angle_delta(last.heading, heading).abs() > cfg.move_epsilon;
                if moved && now.saturating_sub(last.at) >= interval {
                    out.push(ClientMsg::Move {
                        x: position.x,
                        z: position.z,
                        rotation: heading,
                    });
                    self.last_sent = Some(SentPose {
                        position,
                        heading,
                        at: now,
                    });
                }
            }
        }

        if input.shoot {
            out.extend(self.try_shoot(world, mode, now));
        }
        out.extend(self.auto_collect(world));
        out
    }

    /// Client-side cooldown for the UI; the server may still reject.
    pub fn try_shoot(&mut self, world: &World, mode: Mode, now: Duration) -> Option<ClientMsg> {
        if !mode.accepts_player_input() || !self.shoot_ready(now) {
            return None;
        }
        let me = world.registry.local.as_ref()?;
        if !me.player.is_alive() {
            return None;
        }
        self.shoot_ready_at = now + Duration::from_millis(self.cfg.shoot_cooldown_ms);
        Some(ClientMsg::Shoot)
    }

    /// One `collect_pickup` per nearby pickup meant for us.
    fn auto_collect(&self, world: &mut World) -> Vec<ClientMsg> {
        let reg = &mut world.registry;
        let Some(me) = reg.local.as_ref() else {
            return Vec::new();
        };
        if !me.player.is_alive() {
            return Vec::new();
        }
        let id = me.player.id.clone();
        let at = me.player.position.current;
        let reach = self.cfg.pickup_reach;
        reg.pickups
            .values_mut()
            .filter(|p| !p.collect_requested && p.is_for(&id))
            .filter(|p| p.position.distance_xz(at) <= reach)
            .map(|p| {
                p.collect_requested = true;
                debug!(pickup = %p.id, "Collect");
                ClientMsg::CollectPickup {
                    pickup_id: p.id.clone(),
                }
            })
            .collect()
    }

    /// Interactions on offer this tick.
    pub fn affordances(&self, world: &World, mode: Mode) -> Affordances {
        let none = Affordances::default();
        if !mode.accepts_player_input() {
            return none;
        }
        let reg = &world.registry;
        let Some(me) = reg.local.as_ref() else {
            return none;
        };
        if !me.player.is_alive() || me.is_acting() {
            return none;
        }
        let targeted = reg
            .boss
            .as_ref()
            .is_some_and(|b| !b.is_dead() && b.target_player_id.as_ref() == Some(&me.player.id));
        if targeted {
            return none;
        }
        let cfg = &self.cfg;
        let at = me.player.position.current;
        let farm = (0..reg.plots.len())
            .filter_map(|i| {
                let d = at.distance_xz(cfg.plot_center(i));
                let kind = reg.plots[i].stage.next_action()?;
                (d <= cfg.plot_reach).then_some((d, i, kind))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, i, kind)| (i, kind));
        Affordances {
            shop: at.distance_xz(cfg.shop.center()) <= cfg.shop_reach,
            obelisk: at.distance_xz(cfg.obelisk.center()) <= cfg.obelisk_reach,
            farm,
        }
    }

    /// Optimistic farming: lock and tool immediately, one intent, self-clearing
    /// after the lock duration whatever the server says.
    pub fn start_farm_action(
        &mut self,
        world: &mut World,
        mode: Mode,
        now: Duration,
    ) -> Option<(ClientMsg, RenderEvent)> {
        let (plot_id, kind) = self.affordances(world, mode).farm?;
        let me = world.registry.local.as_mut()?;
        me.action_until = Some(now + Duration::from_millis(self.cfg.farm_action_ms));
        me.player.action = Some(PlayerAction { kind, plot_id });
        let msg = match kind {
            ActionKind::Planting => ClientMsg::PlantSeeds { plot_id },
            ActionKind::Watering => ClientMsg::WaterWheat { plot_id },
            ActionKind::Harvesting => ClientMsg::HarvestWheat { plot_id },
        };
        Some((msg, RenderEvent::ToolAttached(kind)))
    }

    pub fn buy(&self, world: &World, mode: Mode, item_id: &str) -> Option<ClientMsg> {
        self.affordances(world, mode).shop.then(|| ClientMsg::BuyItem {
            item_id: item_id.to_string(),
        })
    }

    pub fn summon(&self, world: &World, mode: Mode) -> Option<ClientMsg> {
        self.affordances(world, mode)
            .obelisk
            .then_some(ClientMsg::SpawnDragon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dragonfield_shared::net::WireId;

    use crate::registry::{
        Cosmetics, GrowthStage, LocalPlayer, Pickup, Player, PlayerSpawn,
    };

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn world_at(x: f32, z: f32, heading: f32) -> World {
        let mut world = World::default();
        world.registry.local = Some(LocalPlayer::new(Player::spawn(PlayerSpawn {
            id: WireId::from("me"),
            position: Vec3::ground(x, z),
            heading,
            username: "me".into(),
            first_name: String::new(),
            cosmetics: Cosmetics::default(),
            weapon: None,
        })));
        world
    }

    fn pos(world: &World) -> Vec3 {
        world.registry.local.as_ref().unwrap().player.position.current
    }

    fn walk() -> InputState {
        InputState {
            forward: true,
            ..InputState::default()
        }
    }

    #[test]
    fn forward_follows_heading() {
        let cfg = WorldConfig::default();
        let mut c = Controller::new(&cfg);
        let mut w = world_at(0.0, 0.0, 0.0);
        c.step(&mut w, Mode::Playing, &walk(), ms(0));
        let p = pos(&w);
        assert!(p.x.abs() < 1e-6);
        assert!((p.z + cfg.move_speed).abs() < 1e-6);
    }

    #[test]
    fn approach_into_zone_stops_on_boundary() {
        let cfg = WorldConfig::default();
        let zone = cfg.shop;
        // Start due north of the shop (+z), facing it (heading 0 walks -z).
        let mut w = world_at(zone.x, zone.z + zone.radius + 0.05, 0.0);
        let mut c = Controller::new(&cfg);
        for i in 0..50 {
            c.step(&mut w, Mode::Playing, &walk(), ms(i * 16));
        }
        let p = pos(&w);
        let d = p.distance_xz(zone.center());
        assert!((d - zone.radius).abs() < 1e-4, "distance {d}");
        assert!((p.x - zone.x).abs() < 1e-4);
        assert!(p.z > zone.z);
    }

    #[test]
    fn center_hit_falls_back_to_previous_direction() {
        let cfg = WorldConfig::default();
        let zone = cfg.obelisk;
        let prev = Vec3::ground(zone.x - 5.0, zone.z);
        let out = slide_out(prev, zone.center(), &zone);
        assert!((out.x - (zone.x - zone.radius)).abs() < 1e-5);
        assert!((out.z - zone.z).abs() < 1e-5);
    }

    #[test]
    fn bounds_apply_after_collision() {
        let cfg = WorldConfig::default();
        let out = resolve_motion(Vec3::ZERO, Vec3::ground(100.0, -100.0), &cfg);
        assert_eq!(out, Vec3::ground(48.0, -48.0));
    }

    #[test]
    fn move_messages_are_throttled() {
        let cfg = WorldConfig::default();
        let mut c = Controller::new(&cfg);
        let mut w = world_at(0.0, 0.0, 0.0);
        let mut sent = 0;
        // One second of walking at ~60 Hz.
        for i in 0..60u64 {
            let out = c.step(&mut w, Mode::Playing, &walk(), ms(i * 16 + 1));
            sent += out
                .iter()
                .filter(|m| matches!(m, ClientMsg::Move { .. }))
                .count();
        }
        // At most one per 50 ms.
        assert!(sent <= 20, "sent {sent}");
        assert!(sent >= 10, "sent {sent}");

        // The last throttled pose goes out once after stopping.
        let rest = pos(&w);
        let idle = c.step(&mut w, Mode::Playing, &InputState::default(), ms(5_000));
        assert_eq!(
            idle,
            vec![ClientMsg::Move {
                x: rest.x,
                z: rest.z,
                rotation: 0.0
            }]
        );
        // Then standing still sends nothing.
        let idle = c.step(&mut w, Mode::Playing, &InputState::default(), ms(6_000));
        assert!(idle.is_empty());
    }

    #[test]
    fn dead_or_acting_player_cannot_move() {
        let cfg = WorldConfig::default();
        let mut c = Controller::new(&cfg);
        let mut w = world_at(0.0, 0.0, 0.0);
        w.registry.local.as_mut().unwrap().action_until = Some(ms(2_000));
        c.step(&mut w, Mode::Playing, &walk(), ms(0));
        assert_eq!(pos(&w), Vec3::ZERO);
    }

    #[test]
    fn spectating_orbits_instead_of_moving() {
        let cfg = WorldConfig::default();
        let mut c = Controller::new(&cfg);
        let mut w = world_at(0.0, 0.0, 0.0);
        let input = InputState {
            forward: true,
            look_dx: 100.0,
            shoot: true,
            ..InputState::default()
        };
        let out = c.step(&mut w, Mode::Spectating, &input, ms(0));
        assert!(out.is_empty());
        assert_eq!(pos(&w), Vec3::ZERO);
        assert!((c.orbit_angle() + 0.5).abs() < 1e-6);
    }

    #[test]
    fn shoot_cooldown() {
        let cfg = WorldConfig::default();
        let mut c = Controller::new(&cfg);
        let w = world_at(0.0, 0.0, 0.0);
        assert_eq!(c.try_shoot(&w, Mode::Playing, ms(0)), Some(ClientMsg::Shoot));
        assert_eq!(c.try_shoot(&w, Mode::Playing, ms(1_499)), None);
        assert_eq!(c.try_shoot(&w, Mode::Playing, ms(1_500)), Some(ClientMsg::Shoot));
    }

    #[test]
    fn farm_action_is_optimistic_and_locked() {
        let cfg = WorldConfig::default();
        let mut c = Controller::new(&cfg);
        let center = cfg.plot_center(4);
        let mut w = world_at(center.x, center.z, 0.0);
        w.registry.plots[4].stage = GrowthStage::Planted;

        let (msg, ev) = c.start_farm_action(&mut w, Mode::Playing, ms(0)).unwrap();
        assert_eq!(msg, ClientMsg::WaterWheat { plot_id: 4 });
        assert_eq!(ev, RenderEvent::ToolAttached(ActionKind::Watering));
        let me = w.registry.local.as_ref().unwrap();
        assert!(me.is_acting());
        // Locked: no second action, no affordances.
        assert!(c.start_farm_action(&mut w, Mode::Playing, ms(10)).is_none());
        assert_eq!(c.affordances(&w, Mode::Playing), Affordances::default());
    }

    #[test]
    fn boss_target_hides_affordances() {
        let cfg = WorldConfig::default();
        let c = Controller::new(&cfg);
        let shop = cfg.shop.center();
        let mut w = world_at(shop.x + cfg.shop.radius + 0.5, shop.z, 0.0);
        assert!(c.affordances(&w, Mode::Playing).shop);
        assert!(c.buy(&w, Mode::Playing, "hat").is_some());

        crate::boss::apply_state(
            &mut w.registry.boss,
            &dragonfield_shared::net::DragonState {
                health: Some(50.0),
                target_player_id: Some(WireId::from("me")),
                ..Default::default()
            },
            ms(0),
            &crate::boss::BossTimings::from(&cfg),
        );
        assert!(!c.affordances(&w, Mode::Playing).shop);
        assert!(c.buy(&w, Mode::Playing, "hat").is_none());
        assert!(!c.affordances(&w, Mode::Spectating).shop);
    }

    #[test]
    fn nearby_pickups_are_collected_once() {
        let cfg = WorldConfig::default();
        let mut c = Controller::new(&cfg);
        let mut w = world_at(0.0, 0.0, 0.0);
        for (id, recipient) in [("a", "me"), ("b", "other")] {
            w.registry.pickups.insert(
                WireId::from(id),
                Pickup {
                    id: WireId::from(id),
                    item_type: "coin".into(),
                    recipient_id: Some(WireId::from(recipient)),
                    position: Vec3::ground(0.5, 0.5),
                    collect_requested: false,
                    unconfirmed: false,
                },
            );
        }
        let out = c.step(&mut w, Mode::Playing, &InputState::default(), ms(0));
        assert_eq!(
            out,
            vec![ClientMsg::CollectPickup {
                pickup_id: WireId::from("a")
            }]
        );
        let again = c.step(&mut w, Mode::Playing, &InputState::default(), ms(16));
        assert!(again.is_empty());
    }
}
