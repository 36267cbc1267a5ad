//! Infrastructure layer - adapters for the domain's ports

pub mod persistence;
