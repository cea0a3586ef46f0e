//! eNodeB MAC Layer Library
//!
//! This crate implements the per-TTI resource grid of the LTE MAC scheduler
//! according to 3GPP TS 36.213 and TS 36.212.

pub mod mac;

use thiserror::Error;

/// Common errors for the scheduler layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
