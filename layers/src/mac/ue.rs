//! Scheduler Collaborator Interfaces
//!
//! Per-user state lives outside the grid. The grid only queries it through
//! [`SchedUe`] while allocating, and hands accepted data allocations to a
//! [`UeDciGenerator`] when the TTI is finalized.

use super::dci::{DciError, DciFormat, DciLocation, DlDci, UlDci};
use super::pdcch_grid::DciLocations;
use super::sched_result::{DlDataAlloc, UlAllocKind, UlDataAlloc};
use common::{AggregationLevel, PrbRange, Rnti, TtiParams};
use serde::Serialize;

/// Read-only view of a user as needed by the TTI grid
pub trait SchedUe {
    fn rnti(&self) -> Rnti;

    /// UE-specific search space for a CFI and subframe
    fn dci_locations(&self, cfi: u32, sf_idx: u32) -> Option<&DciLocations>;

    /// True if a DCI starting at `ncce` would map the HARQ ACK onto the PUCCH
    /// resource reserved for this user's scheduling request
    fn pucch_sr_collision(&self, _tti_tx_dl: u32, _ncce: u32) -> bool {
        false
    }

    /// Aggregation level needed to carry a DCI of `nof_bits` to this user
    fn aggregation_level(&self, nof_bits: u32) -> AggregationLevel;

    /// Format of downlink data grants
    fn dl_dci_format(&self) -> DciFormat {
        DciFormat::Format1
    }

    /// Resources of the UL HARQ process pending retransmission at `tti_tx_ul`
    fn pending_ul_retx(&self, _tti_tx_ul: u32) -> Option<PrbRange> {
        None
    }
}

/// Downlink data grant ready for the PHY
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlDataSchedInfo {
    pub dci: DlDci,
    /// Transport block size in bits
    pub tbs: u32,
}

/// Uplink data grant ready for the PHY
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UlSchedInfo {
    pub dci: UlDci,
    pub kind: UlAllocKind,
    pub prb: PrbRange,
    /// Transport block size in bits
    pub tbs: u32,
}

/// Builds user-specific DCIs once the PDCCH combination of a TTI is fixed
pub trait UeDciGenerator {
    fn generate_dl(
        &mut self,
        alloc: &DlDataAlloc,
        location: DciLocation,
        tti_params: &TtiParams,
        cfi: u32,
    ) -> Result<DlDataSchedInfo, DciError>;

    /// `location` is `None` for grants sent without PDCCH
    fn generate_ul(
        &mut self,
        alloc: &UlDataAlloc,
        location: Option<DciLocation>,
        tti_params: &TtiParams,
    ) -> Result<UlSchedInfo, DciError>;
}
