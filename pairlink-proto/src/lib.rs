//! Shared signaling vocabulary for the Pairlink relay and its clients.

pub mod room;
pub mod signal;
