//! Network-facing pieces of the simulation
//!
//! - `protocol`: message contracts and the binary codec
//! - `dead_reckoning`: smooth extrapolation of remote actors
//! - `reconciliation`: local prediction corrected by the server

pub mod dead_reckoning;
pub mod protocol;
pub mod reconciliation;

pub use dead_reckoning::{DeadReckonState, Snapshot};
pub use protocol::{ClientMessage, CodecError, Delivery, ServerMessage, decode, encode};
pub use reconciliation::{ClientPredictor, Correction, ServerState};
