//! Portico - condominium virtual intercom call server
//!
//! The real-time core that brokers audio/video calls between visitors and
//! residents: call lifecycle state machine, live connection registry and
//! the WebRTC signaling relay. Media itself flows peer-to-peer or through
//! external TURN infrastructure, never through this server.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
