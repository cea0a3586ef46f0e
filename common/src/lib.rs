//! Common Utilities and Types Library
//!
//! This crate provides shared types and utilities used across the eNodeB MAC implementation.

pub mod bitmask;
pub mod tti;
pub mod types;

// Re-export commonly used items
pub use bitmask::*;
pub use tti::*;
pub use types::*;
