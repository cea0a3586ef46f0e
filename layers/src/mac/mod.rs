//! Medium Access Control (MAC) Scheduler Grid
//!
//! Per-TTI allocation of PDCCH CCEs, downlink RBGs and uplink PRBs for an
//! LTE carrier, following 3GPP TS 36.213.

pub mod dci;
pub mod params;
pub mod pdcch_grid;
pub mod ra;
pub mod sched_result;
pub mod tti_grid;
pub mod ue;

use common::Rnti;
use serde::Serialize;
use thiserror::Error;

pub use dci::{DciError, DciFormat, DciLocation, DlDci, UlDci, generate_format1a};
pub use params::{RarSearchSpaceConfig, SchedConfig, SchedParams, SibConfig};
pub use pdcch_grid::{DciLocations, PdcchAlloc, PdcchGrid};
pub use sched_result::{
    BcChannel, BcSchedInfo, DlDataAlloc, Msg3Grant, RarGrant, RarSchedInfo, SchedResult,
    TtiSchedResult, UlAllocKind, UlDataAlloc,
};
pub use tti_grid::TtiGrid;
pub use ue::{DlDataSchedInfo, SchedUe, UeDciGenerator, UlSchedInfo};

/// Class of an allocation, selecting the search space and placement rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AllocType {
    /// System information broadcast
    DlBc,
    /// Paging
    DlPcch,
    /// Random access response
    DlRar,
    /// Downlink user data
    DlData,
    /// Uplink user data
    UlData,
}

/// Transmission direction of a user allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Downlink,
    Uplink,
}

/// Reasons an allocation request is refused
///
/// Collisions leave the grid untouched and may be retried with other
/// resources in the same TTI. The remaining variants are logic errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("rb_collision")]
    RbCollision,

    #[error("dci_collision")]
    DciCollision,

    #[error("error: rnti={rnti} already has a {direction:?} allocation in this TTI")]
    DuplicateAlloc { rnti: Rnti, direction: Direction },

    #[error("error: range start={start}, len={len} exceeds {limit}")]
    OutOfBounds { start: u32, len: u32, limit: u32 },

    #[error("error: mask of {got} bits, expected {expected}")]
    MaskSizeMismatch { expected: u32, got: u32 },

    #[error("error: {0:?} is not a DL control allocation")]
    InvalidAllocType(AllocType),

    #[error("error: no PDCCH search space for {0:?}")]
    MissingSearchSpace(AllocType),

    #[error("error: SIB index {0} not configured")]
    UnknownSib(u32),
}

impl AllocError {
    /// True for RB and DCI collisions
    pub fn is_collision(&self) -> bool {
        matches!(self, AllocError::RbCollision | AllocError::DciCollision)
    }
}
