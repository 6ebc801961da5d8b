//! `dragonfield_shared`
//!
//! Libraries shared by the client crates and their tests.
//!
//! - `net`: the JSON wire protocol, decoded into tagged unions at the boundary.
//! - `math`: ground-plane vectors, angle wrapping, exponential smoothing.
//! - `config`: client configuration and world constants.
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
}
