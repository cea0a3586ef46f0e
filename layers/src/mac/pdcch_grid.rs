//! PDCCH Allocation Grid
//!
//! Tracks, for one TTI, every non-colliding way of placing the DCIs requested
//! so far. Placements are nodes of an append-only forest stored in an arena and
//! linked to their parent by index; the nodes created by the latest successful
//! request form the frontier, and each frontier node closes one complete
//! combination of CCE positions.

use super::dci::DciLocation;
use super::params::SchedParams;
use super::ue::SchedUe;
use super::{AllocError, AllocType};
use common::{AggregationLevel, CceMask, Rnti, TtiParams};
use std::fmt::Write;
use std::sync::Arc;
use tracing::trace;

/// Maximum PDCCH candidates per aggregation level in a search space
pub const MAX_CANDIDATES: usize = 6;

/// First-CCE candidates per aggregation level, for one CFI and subframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DciLocations {
    cce_start: [[u32; MAX_CANDIDATES]; 4],
    nof_loc: [usize; 4],
}

impl DciLocations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a list of candidates per level
    pub fn from_candidates(levels: &[(AggregationLevel, &[u32])]) -> Self {
        let mut locs = Self::new();
        for (level, starts) in levels {
            for &ncce in starts.iter() {
                locs.push(*level, ncce);
            }
        }
        locs
    }

    /// Common search space: L4 and L8 candidates within the first 16 CCEs
    pub fn common(nof_cce: u32) -> Self {
        let mut locs = Self::new();
        let span = nof_cce.min(16);
        for level in [AggregationLevel::L8, AggregationLevel::L4] {
            let l = level.nof_cces();
            for i in 0..span / l {
                locs.push(level, i * l);
            }
        }
        locs
    }

    /// Append a candidate; returns false when the level is full or the start is a duplicate
    pub fn push(&mut self, level: AggregationLevel, ncce: u32) -> bool {
        let idx = level.index();
        let n = self.nof_loc[idx];
        if n >= MAX_CANDIDATES || self.cce_start[idx][..n].contains(&ncce) {
            return false;
        }
        self.cce_start[idx][n] = ncce;
        self.nof_loc[idx] = n + 1;
        true
    }

    /// Candidate first-CCE indices at `level`
    pub fn candidates(&self, level: AggregationLevel) -> &[u32] {
        let idx = level.index();
        &self.cce_start[idx][..self.nof_loc[idx]]
    }
}

/// One DCI placement in the control region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdcchAlloc {
    /// Addressed RNTI, `None` for common-channel grants
    pub rnti: Option<Rnti>,
    pub location: DciLocation,
    /// CCEs used by this DCI alone
    pub current_mask: CceMask,
    /// CCEs used by this DCI and all its ancestors
    pub total_mask: CceMask,
}

#[derive(Debug, Clone)]
struct TreeNode {
    parent: Option<usize>,
    alloc: PdcchAlloc,
}

/// Per-TTI forest of PDCCH placements
#[derive(Debug)]
pub struct PdcchGrid {
    params: Arc<SchedParams>,
    tti_params: TtiParams,
    cfi: u32,
    tree: Vec<TreeNode>,
    /// Frontier is `tree[prev_start..prev_end]`
    prev_start: usize,
    prev_end: usize,
    nof_dci_allocs: usize,
}

fn cce_loc_table<'a>(
    params: &'a SchedParams,
    user: Option<&'a dyn SchedUe>,
    alloc_type: AllocType,
    cfi: u32,
    sf_idx: u32,
) -> Option<&'a DciLocations> {
    match alloc_type {
        AllocType::DlBc | AllocType::DlPcch => Some(params.common_locations(cfi)),
        AllocType::DlRar => Some(params.rar_locations(cfi, sf_idx)),
        AllocType::DlData | AllocType::UlData => user.and_then(|u| u.dci_locations(cfi, sf_idx)),
    }
}

impl PdcchGrid {
    pub fn new(params: Arc<SchedParams>) -> Self {
        let capacity = params.max_pdcch_combinations * 4;
        Self {
            params,
            tti_params: TtiParams::default(),
            cfi: 1,
            tree: Vec::with_capacity(capacity),
            prev_start: 0,
            prev_end: 0,
            nof_dci_allocs: 0,
        }
    }

    /// Start a new TTI, discarding the whole forest
    pub fn new_tti(&mut self, tti_params: TtiParams) {
        self.tti_params = tti_params;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.prev_start = 0;
        self.prev_end = 0;
        self.tree.clear();
        self.nof_dci_allocs = 0;
    }

    /// Place a DCI of `aggr` for `alloc_type` on top of every open combination
    ///
    /// On failure the forest is left untouched.
    pub fn alloc_dci(
        &mut self,
        alloc_type: AllocType,
        aggr: AggregationLevel,
        user: Option<&dyn SchedUe>,
    ) -> Result<(), AllocError> {
        // Candidate table comes from a shared handle so the tree can be extended while it is borrowed
        let params = Arc::clone(&self.params);
        let dci_locs = cce_loc_table(&params, user, alloc_type, self.cfi, self.tti_params.sf_idx)
            .ok_or(AllocError::MissingSearchSpace(alloc_type))?;
        let rnti = user.map(|u| u.rnti());

        if self.prev_end > 0 {
            for parent in self.prev_start..self.prev_end {
                self.update_alloc_tree(Some(parent), aggr, rnti, alloc_type, user, dci_locs);
            }
        } else {
            self.update_alloc_tree(None, aggr, rnti, alloc_type, user, dci_locs);
        }

        // no space left in the PDCCH
        if self.tree.len() == self.prev_end {
            return Err(AllocError::DciCollision);
        }

        self.prev_start = self.prev_end;
        self.prev_end = self.tree.len();
        self.nof_dci_allocs += 1;

        trace!(
            "PDCCH alloc #{} ({:?}, L={}): {} combinations",
            self.nof_dci_allocs,
            alloc_type,
            aggr.index(),
            self.nof_alloc_combinations()
        );
        Ok(())
    }

    fn update_alloc_tree(
        &mut self,
        parent: Option<usize>,
        aggr: AggregationLevel,
        rnti: Option<Rnti>,
        alloc_type: AllocType,
        user: Option<&dyn SchedUe>,
        dci_locs: &DciLocations,
    ) {
        let nof_cces = self.nof_cces();
        let cum_mask = match parent {
            Some(idx) => self.tree[idx].alloc.total_mask,
            None => CceMask::new(nof_cces),
        };
        let l = aggr.nof_cces();

        for &ncce in dci_locs.candidates(aggr) {
            if self.tree.len() - self.prev_end >= self.params.max_pdcch_combinations {
                trace!("PDCCH combination cap of {} reached", self.params.max_pdcch_combinations);
                return;
            }
            if ncce + l > nof_cces {
                continue;
            }
            if alloc_type == AllocType::DlData
                && user.map_or(false, |u| u.pucch_sr_collision(self.tti_params.tti_tx_dl, ncce))
            {
                // would collide in the PUCCH
                continue;
            }

            let alloc_mask = CceMask::with_range(nof_cces, ncce, ncce + l);
            if cum_mask.intersects(&alloc_mask) {
                continue;
            }
            let total_mask = cum_mask | alloc_mask;

            // Prune combinations that reach an already produced CCE state
            if self.tree[self.prev_end..].iter().any(|node| node.alloc.total_mask == total_mask) {
                continue;
            }

            self.tree.push(TreeNode {
                parent,
                alloc: PdcchAlloc {
                    rnti,
                    location: DciLocation { aggregation: aggr, ncce },
                    current_mask: alloc_mask,
                    total_mask,
                },
            });
        }
    }

    /// Set the CFI of the control region
    ///
    /// Only possible while no DCI is placed, since the CCE masks of the
    /// forest are sized for the current CFI.
    pub fn set_cfi(&mut self, cfi: u32) -> bool {
        if !(1..=3).contains(&cfi) || self.nof_dci_allocs > 0 {
            return false;
        }
        self.cfi = cfi;
        true
    }

    pub fn cfi(&self) -> u32 {
        self.cfi
    }

    pub fn nof_cces(&self) -> u32 {
        self.params.nof_cces(self.cfi)
    }

    /// Number of successful DCI allocations in this TTI
    pub fn nof_allocs(&self) -> usize {
        self.nof_dci_allocs
    }

    /// Number of complete combinations currently open
    pub fn nof_alloc_combinations(&self) -> usize {
        self.prev_end - self.prev_start
    }

    /// Total number of nodes in the forest
    pub fn nof_nodes(&self) -> usize {
        self.tree.len()
    }

    /// Placements of combination `idx`, in allocation order
    pub fn get_allocs(&self, idx: usize) -> Vec<PdcchAlloc> {
        let mut vec = Vec::with_capacity(self.nof_dci_allocs);
        if idx >= self.nof_alloc_combinations() {
            return vec;
        }
        let mut node = Some(self.prev_start + idx);
        while let Some(i) = node {
            vec.push(self.tree[i].alloc);
            node = self.tree[i].parent;
        }
        vec.reverse();
        vec
    }

    /// CCEs used by combination `idx`
    pub fn total_mask(&self, idx: usize) -> CceMask {
        if idx >= self.nof_alloc_combinations() {
            return CceMask::new(self.nof_cces());
        }
        self.tree[self.prev_start + idx].alloc.total_mask
    }

    /// Human readable dump of all open combinations
    pub fn result_to_string(&self, verbose: bool) -> String {
        let mut s = String::new();
        let _ = writeln!(
            s,
            "cfi={}, mask_size={}, {} DCI allocation combinations:",
            self.cfi,
            self.nof_cces(),
            self.nof_alloc_combinations()
        );
        for idx in 0..self.nof_alloc_combinations() {
            let _ = write!(s, "  combination {}: mask={}", idx, self.total_mask(idx));
            if verbose {
                let _ = writeln!(s, ", DCI allocs:");
                for alloc in self.get_allocs(idx) {
                    let rnti = alloc.rnti.map(|r| r.to_string()).unwrap_or_else(|| "-".into());
                    let _ = writeln!(
                        s,
                        "  > rnti={}: {} / {}",
                        rnti, alloc.current_mask, alloc.total_mask
                    );
                }
            } else {
                let _ = writeln!(s);
            }
        }
        s
    }
}
