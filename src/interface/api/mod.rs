//! API interface implementations

pub mod call_dto;
pub mod call_handler;
pub mod metrics;
pub mod router;
pub mod signaling;

pub use call_dto::{ApiResponse, CallResponse, InitiateCallRequest};
pub use call_handler::AppState;
pub use metrics::{init_metrics, update_active_calls, update_connections};
pub use router::build_router;
pub use signaling::{ClientEvent, ServerEvent, SignalingState};
