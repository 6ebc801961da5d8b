//! Wire protocol.
//!
//! Every frame on the socket is one JSON object discriminated by its `type`
//! field. Inbound frames are decoded into [`ServerMsg`] here, at the boundary,
//! so nothing past this module sees untyped JSON. Field names are camelCase on
//! the wire; optional fields default so a sparse or partially broken payload
//! still decodes.

use serde::{Deserialize, Deserializer, Serialize};

/// Errors at the protocol boundary.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed server message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode client message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Field and element tolerance for payloads from servers that write `NaN` as
/// `null` or send the odd malformed entry. A bad field falls back to a value
/// the reconciler already treats as missing; a bad list element is dropped
/// without losing the rest of the message.
mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// `null` decodes as the type's default.
    pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    /// `null` decodes as NaN; consumers skip or replace non-finite values.
    pub fn coord<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
    }

    fn elements<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<Value>>, D::Error> {
        Option::<Vec<Value>>::deserialize(deserializer)
    }

    /// Undecodable elements are dropped.
    pub fn list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(opt_list(deserializer)?.unwrap_or_default())
    }

    pub fn opt_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(elements(deserializer)?
            .map(|items| items.into_iter().filter_map(|v| T::deserialize(v).ok()).collect()))
    }

    /// Plots are positional, so an undecodable element becomes a default entry
    /// in its slot instead of shifting the ones after it.
    pub fn plots<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        Ok(opt_plots(deserializer)?.unwrap_or_default())
    }

    pub fn opt_plots<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        Ok(elements(deserializer)?.map(|items| {
            items
                .into_iter()
                .map(|v| T::deserialize(v).unwrap_or_default())
                .collect()
        }))
    }
}

/// Server-issued identifier. Accepts JSON strings and numbers and normalises
/// both to a string; `null` becomes the empty id, which callers ignore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct WireId(pub String);

impl WireId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for WireId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WireId {
    fn from(s: &str) -> Self {
        WireId(s.to_string())
    }
}

impl<'de> Deserialize<'de> for WireId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Int(i64),
            Uint(u64),
            Float(f64),
        }
        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => WireId::default(),
            Some(Raw::Str(s)) => WireId(s),
            Some(Raw::Int(i)) => WireId(i.to_string()),
            Some(Raw::Uint(u)) => WireId(u.to_string()),
            Some(Raw::Float(f)) => WireId(f.to_string()),
        })
    }
}

/// Cosmetic body choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
    #[serde(other)]
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

/// Player snapshot used by `init`, `join`, `update` and `world_update.players`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerState {
    pub id: WireId,
    pub x: Option<f32>,
    pub z: Option<f32>,
    pub rotation: Option<f32>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub gender: Option<Gender>,
    pub face_index: Option<u32>,
    pub weapon: Option<WireId>,
    pub is_acting: Option<bool>,
    pub action_type: Option<String>,
    pub action_plot_id: Option<i64>,
    pub is_dead: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Welcome {
    pub id: WireId,
    #[serde(deserialize_with = "lenient::coord")]
    pub x: f32,
    #[serde(deserialize_with = "lenient::coord")]
    pub z: f32,
    #[serde(deserialize_with = "lenient::coord")]
    pub rotation: f32,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub gender: Option<Gender>,
    pub face_index: Option<u32>,
    pub weapon: Option<WireId>,
    pub dragon: Option<DragonState>,
    #[serde(deserialize_with = "lenient::opt_plots")]
    pub farm_plots: Option<Vec<FarmPlotState>>,
    pub coins: Option<i64>,
    #[serde(deserialize_with = "lenient::opt_list")]
    pub inventory: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerList {
    #[serde(deserialize_with = "lenient::list")]
    pub players: Vec<PlayerState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerRef {
    pub id: WireId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaponUpdate {
    pub id: WireId,
    pub weapon: Option<WireId>,
}

/// One attacker's cumulative damage against the boss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageEntry {
    #[serde(deserialize_with = "lenient::or_default")]
    pub name: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub damage: f64,
}

/// Boss snapshot used by `dragon_update`, `dragon_respawn`, `welcome.dragon`
/// and `world_update.dragon`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DragonState {
    pub x: Option<f32>,
    pub z: Option<f32>,
    pub rotation: Option<f32>,
    pub health: Option<f32>,
    pub max_health: Option<f32>,
    pub is_dead: Option<bool>,
    pub target_player_id: Option<WireId>,
    #[serde(deserialize_with = "lenient::opt_list")]
    pub damage_list: Option<Vec<DamageEntry>>,
}

impl DragonState {
    /// True when the payload itself says the boss is dead.
    pub fn implies_death(&self) -> bool {
        self.is_dead == Some(true) || self.health.is_some_and(|h| h <= 0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DragonHit {
    #[serde(deserialize_with = "lenient::coord")]
    pub health: f32,
    #[serde(deserialize_with = "lenient::list")]
    pub damage_list: Vec<DamageEntry>,
    pub x: Option<f32>,
    pub z: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BulletState {
    pub id: WireId,
    #[serde(deserialize_with = "lenient::coord")]
    pub x: f32,
    #[serde(deserialize_with = "lenient::coord")]
    pub z: f32,
    pub owner_id: Option<WireId>,
    pub speed: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PickupState {
    pub id: WireId,
    #[serde(deserialize_with = "lenient::or_default")]
    pub item_type: String,
    /// Player the pickup is meant for.
    pub target_player_id: Option<WireId>,
    #[serde(deserialize_with = "lenient::coord")]
    pub x: f32,
    #[serde(deserialize_with = "lenient::coord")]
    pub z: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SheepState {
    pub id: WireId,
    #[serde(deserialize_with = "lenient::coord")]
    pub x: f32,
    #[serde(deserialize_with = "lenient::coord")]
    pub z: f32,
    #[serde(deserialize_with = "lenient::or_default")]
    pub is_hopping: bool,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FarmPlotState {
    /// `None` (absent, `null` or malformed) leaves the plot as it was.
    #[serde(alias = "growthStage")]
    pub stage: Option<i64>,
    /// Server epoch milliseconds.
    pub watered_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldUpdate {
    pub dragon: Option<DragonState>,
    #[serde(deserialize_with = "lenient::opt_list")]
    pub bullets: Option<Vec<BulletState>>,
    #[serde(deserialize_with = "lenient::opt_list")]
    pub pickups: Option<Vec<PickupState>>,
    #[serde(deserialize_with = "lenient::opt_list")]
    pub sheeps: Option<Vec<SheepState>>,
    #[serde(deserialize_with = "lenient::opt_plots")]
    pub farm_plots: Option<Vec<FarmPlotState>>,
    #[serde(deserialize_with = "lenient::opt_list")]
    pub players: Option<Vec<PlayerState>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FarmUpdate {
    #[serde(deserialize_with = "lenient::plots")]
    pub farm_plots: Vec<FarmPlotState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuySuccess {
    pub coins: Option<i64>,
    #[serde(deserialize_with = "lenient::opt_list")]
    pub inventory: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryUpdate {
    #[serde(deserialize_with = "lenient::opt_list")]
    pub inventory: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinsEarned {
    #[serde(deserialize_with = "lenient::or_default")]
    pub amount: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreEntry {
    pub username: Option<String>,
    #[serde(alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub dragon_kills: u32,
    #[serde(deserialize_with = "lenient::or_default")]
    pub deaths: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scores {
    #[serde(deserialize_with = "lenient::list")]
    pub scores: Vec<ScoreEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerDeath {
    pub id: WireId,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerRespawn {
    pub id: WireId,
    #[serde(deserialize_with = "lenient::coord")]
    pub x: f32,
    #[serde(deserialize_with = "lenient::coord")]
    pub z: f32,
    #[serde(deserialize_with = "lenient::coord")]
    pub rotation: f32,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub gender: Option<Gender>,
    pub face_index: Option<u32>,
    pub weapon: Option<WireId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerError {
    #[serde(deserialize_with = "lenient::or_default")]
    pub message: String,
}

/// Server -> client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    Welcome(Welcome),
    Init(PlayerList),
    Join(PlayerState),
    Leave(PlayerRef),
    Update(PlayerState),
    WeaponUpdate(WeaponUpdate),
    DragonUpdate(DragonState),
    DragonHit(DragonHit),
    DragonDeath,
    DragonRespawn(DragonState),
    DragonCharging,
    WorldUpdate(WorldUpdate),
    PickupSpawned(PickupState),
    FarmUpdate(FarmUpdate),
    BuySuccess(BuySuccess),
    InventoryUpdate(InventoryUpdate),
    CoinsEarned(CoinsEarned),
    Scores(Scores),
    PlayerDeath(PlayerDeath),
    PlayerRespawn(PlayerRespawn),
    Error(ServerError),
    /// Any discriminant this client does not know. Ignored.
    #[serde(other)]
    Unknown,
}

impl ServerMsg {
    /// Wire discriminant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::Welcome(_) => "welcome",
            ServerMsg::Init(_) => "init",
            ServerMsg::Join(_) => "join",
            ServerMsg::Leave(_) => "leave",
            ServerMsg::Update(_) => "update",
            ServerMsg::WeaponUpdate(_) => "weapon_update",
            ServerMsg::DragonUpdate(_) => "dragon_update",
            ServerMsg::DragonHit(_) => "dragon_hit",
            ServerMsg::DragonDeath => "dragon_death",
            ServerMsg::DragonRespawn(_) => "dragon_respawn",
            ServerMsg::DragonCharging => "dragon_charging",
            ServerMsg::WorldUpdate(_) => "world_update",
            ServerMsg::PickupSpawned(_) => "pickup_spawned",
            ServerMsg::FarmUpdate(_) => "farm_update",
            ServerMsg::BuySuccess(_) => "buy_success",
            ServerMsg::InventoryUpdate(_) => "inventory_update",
            ServerMsg::CoinsEarned(_) => "coins_earned",
            ServerMsg::Scores(_) => "scores",
            ServerMsg::PlayerDeath(_) => "player_death",
            ServerMsg::PlayerRespawn(_) => "player_respawn",
            ServerMsg::Error(_) => "error",
            ServerMsg::Unknown => "unknown",
        }
    }
}

/// Client -> server message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    Move {
        x: f32,
        z: f32,
        rotation: f32,
    },
    Shoot,
    GetScores,
    BuyItem {
        #[serde(rename = "itemId")]
        item_id: String,
    },
    PlantSeeds {
        #[serde(rename = "plotId")]
        plot_id: usize,
    },
    WaterWheat {
        #[serde(rename = "plotId")]
        plot_id: usize,
    },
    HarvestWheat {
        #[serde(rename = "plotId")]
        plot_id: usize,
    },
    CollectPickup {
        #[serde(rename = "pickupId")]
        pickup_id: WireId,
    },
    SpawnDragon,
}

/// Body of the profile-sync POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub username: String,
    pub gender: Gender,
    pub face_index: u32,
}

/// JSON form of the version endpoint's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

/// Extracts a version string from either `{"version": ".."}` or plain text.
pub fn parse_version_body(body: &str) -> String {
    match serde_json::from_str::<VersionInfo>(body) {
        Ok(info) => info.version.trim().to_string(),
        Err(_) => body.trim().trim_matches('"').to_string(),
    }
}

/// Decodes one inbound text frame.
pub fn decode_server(text: &str) -> Result<ServerMsg, WireError> {
    serde_json::from_str(text).map_err(WireError::Decode)
}

/// Encodes one outbound message as a text frame.
pub fn encode_client(msg: &ClientMsg) -> Result<String, WireError> {
    serde_json::to_string(msg).map_err(WireError::Encode)
}
