//! Shared result type alias

pub use super::error::Result;
