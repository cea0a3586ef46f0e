//! TTI Resource Grid
//!
//! Combines the PDCCH grid with the downlink RBG mask and the uplink PRB
//! mask of one TTI. A request is committed only if both its data resources
//! and its DCI fit.

use super::dci::DciFormat;
use super::params::SchedParams;
use super::pdcch_grid::PdcchGrid;
use super::ra;
use super::ue::SchedUe;
use super::{AllocError, AllocType};
use crate::LayerError;
use common::{AggregationLevel, PrbMask, PrbRange, RbgMask, RbgRange, TtiParams};
use std::sync::Arc;
use tracing::{debug, enabled, error, Level};

/// Resources of one TTI for one carrier
#[derive(Debug)]
pub struct TtiGrid {
    params: Arc<SchedParams>,
    tti_params: TtiParams,
    nof_rbgs: u32,
    /// RBGs used by SIB and paging grants
    si_n_rbg: u32,
    /// RBGs used by random access responses
    rar_n_rbg: u32,
    avail_rbg: u32,
    dl_mask: RbgMask,
    ul_mask: PrbMask,
    pdcch_alloc: PdcchGrid,
}

impl TtiGrid {
    pub fn new(params: Arc<SchedParams>) -> Self {
        let nof_rbgs = params.nof_rbgs;
        let nof_prb = params.nof_prb;
        let p = params.p;
        let pdcch_alloc = PdcchGrid::new(Arc::clone(&params));
        Self {
            params,
            tti_params: TtiParams::default(),
            nof_rbgs,
            si_n_rbg: (4 + p - 1) / p,
            rar_n_rbg: (3 + p - 1) / p,
            avail_rbg: nof_rbgs,
            dl_mask: RbgMask::new(nof_rbgs),
            ul_mask: PrbMask::new(nof_prb),
            pdcch_alloc,
        }
    }

    /// Start a new TTI: all RBGs, PRBs and CCEs become free
    pub fn new_tti(&mut self, tti_params: TtiParams, start_cfi: u32) -> Result<(), LayerError> {
        self.tti_params = tti_params;
        self.avail_rbg = self.nof_rbgs;
        self.dl_mask.resize(self.nof_rbgs);
        self.ul_mask.resize(self.params.nof_prb);
        self.pdcch_alloc.new_tti(tti_params);
        if !self.pdcch_alloc.set_cfi(start_cfi) {
            return Err(LayerError::InvalidConfiguration(format!("CFI {} outside 1..=3", start_cfi)));
        }
        Ok(())
    }

    /// Allocate CCEs and RBGs for the given mask and allocation type
    pub fn alloc_dl(
        &mut self,
        aggr: AggregationLevel,
        alloc_type: AllocType,
        alloc_mask: RbgMask,
        user: Option<&dyn SchedUe>,
    ) -> Result<(), AllocError> {
        if alloc_mask.len() != self.nof_rbgs {
            return Err(AllocError::MaskSizeMismatch { expected: self.nof_rbgs, got: alloc_mask.len() });
        }

        // Check RBG collision
        if self.dl_mask.intersects(&alloc_mask) {
            return Err(AllocError::RbCollision);
        }

        // Allocate DCI in PDCCH
        if let Err(e) = self.pdcch_alloc.alloc_dci(alloc_type, aggr, user) {
            if let Some(user) = user {
                if enabled!(Level::DEBUG) {
                    debug!(
                        "No space in PDCCH for rnti={} DL tx. Current PDCCH allocation: {}",
                        user.rnti(),
                        self.pdcch_alloc.result_to_string(true)
                    );
                }
            }
            return Err(e);
        }

        // Allocate RBGs
        self.dl_mask |= alloc_mask;
        self.avail_rbg -= alloc_mask.count();
        Ok(())
    }

    /// Allocate CCEs and a contiguous RBG range for broadcast, paging or RAR
    ///
    /// Control grants are packed from the lowest RBG in request order.
    pub fn alloc_dl_ctrl(&mut self, aggr: AggregationLevel, alloc_type: AllocType) -> Result<RbgRange, AllocError> {
        let n_rbg = match alloc_type {
            AllocType::DlRar => self.rar_n_rbg,
            AllocType::DlBc | AllocType::DlPcch => self.si_n_rbg,
            other => {
                error!("SCHED: DL control allocations must be RAR/BC/PCCH, got {:?}", other);
                return Err(AllocError::InvalidAllocType(other));
            }
        };

        let start = self.nof_rbgs - self.avail_rbg;
        let range = RbgRange::new(start, start + n_rbg);
        if range.end > self.nof_rbgs {
            return Err(AllocError::RbCollision);
        }

        let new_mask = RbgMask::with_range(self.nof_rbgs, range.start, range.end);
        self.alloc_dl(aggr, alloc_type, new_mask, None)?;
        Ok(range)
    }

    /// Allocate CCEs and RBGs for a user's downlink data
    pub fn alloc_dl_data(&mut self, user: &dyn SchedUe, user_mask: RbgMask) -> Result<(), AllocError> {
        let nof_bits = ra::dci_format_size(user.dl_dci_format(), self.params.nof_prb, self.nof_rbgs);
        let aggr = user.aggregation_level(nof_bits);
        self.alloc_dl(aggr, AllocType::DlData, user_mask, Some(user))
    }

    /// Allocate PRBs, and a format 0 DCI when `needs_pdcch`, for a user's uplink data
    pub fn alloc_ul_data(
        &mut self,
        user: &dyn SchedUe,
        alloc: PrbRange,
        needs_pdcch: bool,
    ) -> Result<(), AllocError> {
        if !alloc.fits(self.ul_mask.len()) {
            return Err(AllocError::OutOfBounds { start: alloc.start, len: alloc.len, limit: self.ul_mask.len() });
        }

        let new_mask = PrbMask::with_range(self.ul_mask.len(), alloc.start, alloc.end());
        if self.ul_mask.intersects(&new_mask) {
            return Err(AllocError::RbCollision);
        }

        // RAR-granted Msg3 and non-adaptive retx go without PDCCH
        if needs_pdcch {
            let nof_bits = ra::dci_format_size(DciFormat::Format0, self.params.nof_prb, self.nof_rbgs);
            let aggr = user.aggregation_level(nof_bits);
            if let Err(e) = self.pdcch_alloc.alloc_dci(AllocType::UlData, aggr, Some(user)) {
                if enabled!(Level::DEBUG) {
                    debug!(
                        "No space in PDCCH for rnti={} UL tx. Current PDCCH allocation: {}",
                        user.rnti(),
                        self.pdcch_alloc.result_to_string(true)
                    );
                }
                return Err(e);
            }
        }

        self.ul_mask |= new_mask;
        Ok(())
    }

    pub fn tti_params(&self) -> &TtiParams {
        &self.tti_params
    }

    pub fn pdcch_grid(&self) -> &PdcchGrid {
        &self.pdcch_alloc
    }

    pub fn cfi(&self) -> u32 {
        self.pdcch_alloc.cfi()
    }

    /// Free RBGs left in this TTI
    pub fn avail_rbg(&self) -> u32 {
        self.avail_rbg
    }

    pub fn nof_rbgs(&self) -> u32 {
        self.nof_rbgs
    }

    pub fn dl_mask(&self) -> &RbgMask {
        &self.dl_mask
    }

    pub fn ul_mask(&self) -> &PrbMask {
        &self.ul_mask
    }
}
