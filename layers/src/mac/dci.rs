//! Downlink Control Information
//!
//! DCI message structures handed to the PHY encoder, and the generator for
//! the legacy format 1A used by broadcast, paging and random access responses.

use super::ra::{self, MAX_I_TBS_FORMAT1A};
use common::{AggregationLevel, RbgMask, Rnti};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

/// DCI formats handled by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DciFormat {
    /// Uplink grant
    Format0,
    /// Downlink, type 0/1 allocation, one codeword
    Format1,
    /// Downlink, compact type 2 allocation
    Format1A,
}

/// Position of a DCI in the control region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DciLocation {
    /// Aggregation level
    pub aggregation: AggregationLevel,
    /// First CCE index
    pub ncce: u32,
}

/// Column of the TBS table selected by a format 1A grant on a common RNTI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NPrb1a {
    Two,
    Three,
}

impl NPrb1a {
    pub fn nof_prb(&self) -> u32 {
        match self {
            NPrb1a::Two => 2,
            NPrb1a::Three => 3,
        }
    }
}

/// Downlink resource allocation field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DlResourceAllocation {
    /// RBG bitmap
    Type0 { rbg_mask: RbgMask },
    /// Contiguous allocation given as a resource indication value
    Type2 {
        /// Localized virtual resource blocks
        localized: bool,
        riv: u32,
        n_prb1a: Option<NPrb1a>,
    },
}

/// Downlink DCI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlDci {
    pub rnti: Rnti,
    pub format: DciFormat,
    pub location: DciLocation,
    pub alloc: DlResourceAllocation,
    /// HARQ process id
    pub pid: u32,
    pub mcs_idx: u32,
    /// Redundancy version
    pub rv: u32,
    /// New data indicator
    pub ndi: bool,
}

/// Uplink DCI (format 0)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UlDci {
    pub rnti: Rnti,
    /// `None` when the grant is carried without PDCCH (Msg3, non-adaptive retx)
    pub location: Option<DciLocation>,
    pub riv: u32,
    pub mcs_idx: u32,
    pub rv: u32,
    pub ndi: bool,
}

/// Errors raised while materializing a DCI
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DciError {
    #[error("no MCS up to {max_mcs} carries {bits} bits in format 1A")]
    TbsTooLarge { bits: u64, max_mcs: u32 },

    #[error("invalid resource block range start={start}, len={len} (nof_prb={nof_prb})")]
    InvalidRange { start: u32, len: u32, nof_prb: u32 },

    #[error("transport block size {0} is not positive")]
    NonPositiveTbs(i64),

    #[error("DCI format {0:?} not supported")]
    UnsupportedFormat(DciFormat),
}

/// Result of the format 1A generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format1aGrant {
    pub dci: DlDci,
    /// Transport block size in bits
    pub tbs: u32,
}

/// Search the smallest MCS whose 2- or 3-PRB transport block fits `tbs_bytes`
pub fn format1a_mcs(tbs_bytes: u32) -> Result<(u32, NPrb1a, u32), DciError> {
    let bits = u64::from(tbs_bytes) * 8;
    for mcs in 0..=MAX_I_TBS_FORMAT1A {
        for n_prb1a in [NPrb1a::Two, NPrb1a::Three] {
            if let Some(tbs) = ra::tbs_from_idx(mcs, n_prb1a.nof_prb()) {
                if u64::from(tbs) >= bits {
                    return Ok((mcs, n_prb1a, tbs));
                }
            }
        }
    }
    Err(DciError::TbsTooLarge { bits, max_mcs: MAX_I_TBS_FORMAT1A })
}

/// Build a localized format 1A grant for a common-channel transmission
///
/// Fills the DCI only; no scheduler state is touched.
pub fn generate_format1a(
    rb_start: u32,
    l_crb: u32,
    tbs_bytes: u32,
    rv: u32,
    rnti: Rnti,
    nof_prb: u32,
    location: DciLocation,
) -> Result<Format1aGrant, DciError> {
    if l_crb == 0 || rb_start > nof_prb || l_crb > nof_prb - rb_start {
        return Err(DciError::InvalidRange { start: rb_start, len: l_crb, nof_prb });
    }

    let (mcs, n_prb1a, tbs) = format1a_mcs(tbs_bytes).map_err(|e| {
        error!("Can't allocate Format 1A for TBS={} bytes: {}", tbs_bytes, e);
        e
    })?;

    debug!(
        "ra_tbs={:?}/{:?}, tbs_bytes={}, tbs={}, mcs={}",
        ra::tbs_from_idx(mcs, 2),
        ra::tbs_from_idx(mcs, 3),
        tbs_bytes,
        tbs,
        mcs
    );

    let dci = DlDci {
        rnti,
        format: DciFormat::Format1A,
        location,
        alloc: DlResourceAllocation::Type2 {
            localized: true,
            riv: ra::riv(l_crb, rb_start, nof_prb),
            n_prb1a: Some(n_prb1a),
        },
        pid: 0,
        mcs_idx: mcs,
        rv,
        ndi: false,
    };

    Ok(Format1aGrant { dci, tbs })
}
