//! Pairlink relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, pairs them into rooms of two,
//! and forwards WebRTC negotiation messages between room-mates.

pub mod config;
pub mod relay;
pub mod rooms;
