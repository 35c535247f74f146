//! peerlink rendezvous broker
//!
//! A two-peer room registry, a REST admission surface, and a WebSocket relay
//! that forwards signaling between exactly two endpoints. The media path
//! never touches this process; the broker only brokers.

pub mod config;
pub mod rate_limit;
pub mod relay;
pub mod rooms;
pub mod routing;
pub mod turn;
