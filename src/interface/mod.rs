//! Interface layer - inbound adapters (REST API and WebSocket signaling)

pub mod api;
