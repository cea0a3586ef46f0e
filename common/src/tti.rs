//! TTI Timing
//!
//! Derives the transmission and feedback TTIs from the TTI in which the
//! scheduler runs.

use serde::Serialize;

/// Number of TTIs before the TTI counter wraps (1024 frames of 10 subframes)
pub const NOF_TTIS: u32 = 10240;

/// FDD processing delay between reception and transmission, in TTIs
pub const TX_DELAY: u32 = 4;

/// Add `delta` TTIs to `tti`, wrapping at [`NOF_TTIS`]
pub fn tti_add(tti: u32, delta: u32) -> u32 {
    (tti + delta) % NOF_TTIS
}

/// Timing of one scheduling interval, recomputed every TTI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TtiParams {
    /// TTI in which the scheduler runs
    pub tti_rx: u32,
    /// Subframe index of the downlink transmission
    pub sf_idx: u32,
    /// TTI of the downlink transmission
    pub tti_tx_dl: u32,
    /// TTI of the uplink transmission, where HARQ feedback is received
    pub tti_tx_ul: u32,
    /// System frame number of the downlink transmission
    pub sfn: u32,
}

impl TtiParams {
    pub fn new(tti_rx: u32) -> Self {
        let tti_rx = tti_rx % NOF_TTIS;
        let tti_tx_dl = tti_add(tti_rx, TX_DELAY);
        Self {
            tti_rx,
            sf_idx: tti_tx_dl % 10,
            tti_tx_dl,
            tti_tx_ul: tti_add(tti_tx_dl, TX_DELAY),
            sfn: tti_tx_dl / 10,
        }
    }
}
