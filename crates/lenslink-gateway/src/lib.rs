//! LensLink gateway library.
//!
//! The gateway relays WebRTC signaling between a camera-equipped producer
//! and a browser viewer, and keeps the shared capture configuration and
//! the producer's reported capabilities in sync between them. Media never
//! transits the gateway; once the peers negotiate, frames flow directly.

pub mod liveness;
pub mod registry;
pub mod signal;
pub mod state;
pub mod web;

pub use registry::{Connection, ConnectionId, Registry, Role, SharedRegistry};
pub use state::{CapsDoc, ConfigDoc, SharedCaps, SharedConfig};
