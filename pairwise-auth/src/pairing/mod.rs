//! Pairing state machine (responder role).
//!
//! Each device runs one [`PairingMachine`] per peer. The machine's state only
//! moves when the peer drives it through the pairing resources, or when the
//! local driver reports that the peer accepted our counter-challenge answer.
//! The same machine also produces our own answers and MACs when we are the
//! one being asked.

mod error;
mod machine;
mod state;

pub use error::PairingError;
pub use machine::PairingMachine;
pub use state::PairingState;
