//! `dragonfield_client`
//!
//! Client-side world sync and local simulation:
//! - Transport session state machine and WebSocket connection tasks
//! - Entity registry and reconciliation of the server's delta stream
//! - Boss and player lifecycles
//! - Local prediction, input and throttled intents
//! - Interpolation clock and the per-tick view model
//! - Mode state machine

pub mod boss;
pub mod client;
pub mod http;
pub mod input;
pub mod interp;
pub mod mode;
pub mod predict;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod transport;
pub mod view;

pub use client::{ClientCore, Command, Effect, GameClient};
