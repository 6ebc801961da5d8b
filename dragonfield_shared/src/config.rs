//! Configuration system.
//!
//! Loads client configuration from JSON strings/files. Every field has a
//! default so partial files are accepted.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{math::Vec3, net::Gender};

/// Root client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:3000/ws`.
    pub server_url: String,
    /// Base URL of the HTTP collaborator (version check, profile sync).
    pub http_base: String,
    pub username: String,
    pub first_name: String,
    pub gender: Gender,
    pub face_index: u32,
    /// Version string this client was built for; compared to the server's.
    pub client_version: String,
    /// Display tick rate of the headless driver.
    pub frame_hz: u32,
    pub reconnect_delay_ms: u64,
    pub version_check_interval_ms: u64,
    /// Start in Spectating instead of Playing.
    pub spectate: bool,
    pub world: WorldConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3000/ws".to_string(),
            http_base: "http://127.0.0.1:3000".to_string(),
            username: "Player".to_string(),
            first_name: String::new(),
            gender: Gender::Male,
            face_index: 0,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            frame_hz: 60,
            reconnect_delay_ms: 2_000,
            version_check_interval_ms: 30_000,
            spectate: false,
            world: WorldConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn version_check_interval(&self) -> Duration {
        Duration::from_millis(self.version_check_interval_ms)
    }
}

/// Circular region the local player slides around instead of entering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeepOutZone {
    pub x: f32,
    pub z: f32,
    pub radius: f32,
}

impl KeepOutZone {
    pub fn center(&self) -> Vec3 {
        Vec3::ground(self.x, self.z)
    }
}

/// Gameplay constants of the shared world.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Local movement, world units per tick.
    pub move_speed: f32,
    /// Turn-key rotation, radians per tick.
    pub turn_speed: f32,
    /// Free-look rotation, radians per pixel of horizontal drag.
    pub look_sensitivity: f32,
    /// Virtual joystick radius in pixels.
    pub joystick_radius: f32,
    /// Half side of the square world boundary.
    pub world_half_extent: f32,
    pub shop: KeepOutZone,
    pub obelisk: KeepOutZone,
    pub shop_reach: f32,
    pub obelisk_reach: f32,
    pub plot_reach: f32,
    pub pickup_reach: f32,
    /// Centers of the 9 farm plots, row-major.
    pub plot_origin: [f32; 2],
    pub plot_spacing: f32,

    pub move_send_interval_ms: u64,
    pub move_epsilon: f32,
    pub shoot_cooldown_ms: u64,
    pub farm_action_ms: u64,
    pub wheat_growth_ms: i64,

    /// Exponential smoothing rates, 1/s.
    pub player_smoothing: f32,
    pub boss_smoothing: f32,
    pub creature_smoothing: f32,
    pub projectile_smoothing: f32,

    pub boss_spawn_ms: u64,
    pub boss_death_ms: u64,
    pub boss_charge_ms: u64,
    pub boss_flinch_ms: u64,
    pub boss_default_max_health: i32,
    pub respawn_countdown_secs: u32,
    pub toast_ms: u64,

    pub hop_rate: f32,
    pub hop_height: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            move_speed: 0.15,
            turn_speed: 0.04,
            look_sensitivity: 0.005,
            joystick_radius: 50.0,
            world_half_extent: 48.0,
            shop: KeepOutZone {
                x: -20.0,
                z: -20.0,
                radius: 4.0,
            },
            obelisk: KeepOutZone {
                x: 20.0,
                z: 20.0,
                radius: 3.0,
            },
            shop_reach: 6.0,
            obelisk_reach: 5.0,
            plot_reach: 2.0,
            pickup_reach: 1.5,
            plot_origin: [10.0, -14.0],
            plot_spacing: 3.0,
            move_send_interval_ms: 50,
            move_epsilon: 0.01,
            shoot_cooldown_ms: 1_500,
            farm_action_ms: 2_000,
            wheat_growth_ms: 60_000,
            player_smoothing: 10.0,
            boss_smoothing: 5.0,
            creature_smoothing: 8.0,
            projectile_smoothing: 20.0,
            boss_spawn_ms: 2_000,
            boss_death_ms: 2_000,
            boss_charge_ms: 1_000,
            boss_flinch_ms: 300,
            boss_default_max_health: 100,
            respawn_countdown_secs: 10,
            toast_ms: 3_000,
            hop_rate: 8.0,
            hop_height: 0.4,
        }
    }
}

impl WorldConfig {
    /// Center of farm plot `index` (0..9).
    pub fn plot_center(&self, index: usize) -> Vec3 {
        let col = (index % 3) as f32;
        let row = (index / 3) as f32;
        Vec3::ground(
            self.plot_origin[0] + col * self.plot_spacing,
            self.plot_origin[1] + row * self.plot_spacing,
        )
    }

    pub fn keep_out_zones(&self) -> [KeepOutZone; 2] {
        [self.shop, self.obelisk]
    }
}
