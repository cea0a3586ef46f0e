//! Simulated UE Context
//!
//! Stands in for the per-user scheduler state: UE-specific search spaces,
//! PUCCH resources, uplink HARQ and DCI generation for data grants.

use crate::config::{SrConfig, UeConfig};
use common::{AggregationLevel, PrbRange, RbgMask, Rnti, TtiParams};
use layers::mac::dci::{DciError, DciFormat, DciLocation, DlDci, DlResourceAllocation, UlDci};
use layers::mac::ra;
use layers::mac::sched_result::rv_idx;
use layers::mac::{DciLocations, DlDataAlloc, DlDataSchedInfo, SchedParams, SchedUe, UeDciGenerator, UlDataAlloc, UlSchedInfo};
use std::collections::HashMap;
use tracing::debug;

/// Candidates per aggregation level in the UE-specific search space (TS 36.213 Table 9.1.1-1)
const UE_SS_CANDIDATES: [u32; 4] = [6, 6, 2, 2];

/// Highest MCS mapped onto the narrow TBS columns
const MAX_DATA_MCS: u32 = 26;

/// Uplink HARQ process awaiting retransmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlHarq {
    pub tti_tx_ul: u32,
    pub alloc: PrbRange,
    pub retx_cnt: u32,
}

#[derive(Debug, Clone)]
pub struct SimUe {
    rnti: Rnti,
    cfg: UeConfig,
    /// UE-specific search space per CFI and subframe
    locations: Vec<[DciLocations; 10]>,
    pub ul_harq: Option<UlHarq>,
}

impl SimUe {
    pub fn new(cfg: UeConfig, params: &SchedParams) -> Self {
        let rnti = Rnti(cfg.rnti);
        let locations = params
            .nof_cce_table
            .iter()
            .map(|&nof_cce| {
                let mut per_sf = [DciLocations::new(); 10];
                for (sf_idx, locs) in per_sf.iter_mut().enumerate() {
                    *locs = ue_search_space(rnti, nof_cce, sf_idx as u32);
                }
                per_sf
            })
            .collect();
        Self { rnti, cfg, locations, ul_harq: None }
    }

    pub fn config(&self) -> &UeConfig {
        &self.cfg
    }

    fn sr_tti(sr: &SrConfig, tti: u32) -> bool {
        tti % sr.period == sr.offset % sr.period
    }
}

/// UE-specific search space of TS 36.213 9.1.1
///
/// Y_k = (39827 * Y_{k-1}) mod 65537 with Y_{-1} = RNTI; candidate m of level L
/// starts at L * ((Y_k + m) mod floor(N_cce / L)).
pub fn ue_search_space(rnti: Rnti, nof_cce: u32, sf_idx: u32) -> DciLocations {
    let mut y = u64::from(rnti.value());
    for _ in 0..=sf_idx {
        y = (39827 * y) % 65537;
    }

    let mut locs = DciLocations::new();
    for aggr in AggregationLevel::ALL {
        let l = aggr.nof_cces();
        let nof_positions = nof_cce / l;
        if nof_positions == 0 {
            continue;
        }
        for m in 0..UE_SS_CANDIDATES[aggr.index()] {
            locs.push(aggr, l * ((y as u32 + m) % nof_positions));
        }
    }
    locs
}

impl SchedUe for SimUe {
    fn rnti(&self) -> Rnti {
        self.rnti
    }

    fn dci_locations(&self, cfi: u32, sf_idx: u32) -> Option<&DciLocations> {
        let cfix = cfi.checked_sub(1)? as usize;
        self.locations.get(cfix).map(|per_sf| &per_sf[(sf_idx % 10) as usize])
    }

    fn pucch_sr_collision(&self, tti_tx_dl: u32, ncce: u32) -> bool {
        let Some(sr) = &self.cfg.sr else {
            return false;
        };
        // HARQ ACK goes out 4 TTIs after the PDSCH on resource ncce + N1
        let tti_ack = common::tti_add(tti_tx_dl, common::TX_DELAY);
        Self::sr_tti(sr, tti_ack) && sr.n_pucch_sr == ncce + sr.n1_pucch_an
    }

    fn aggregation_level(&self, _nof_bits: u32) -> AggregationLevel {
        self.cfg.aggregation
    }

    fn pending_ul_retx(&self, tti_tx_ul: u32) -> Option<PrbRange> {
        self.ul_harq.filter(|h| h.tti_tx_ul == tti_tx_ul).map(|h| h.alloc)
    }
}

/// Builds data DCIs of the simulated users
#[derive(Debug)]
pub struct SimDciGenerator {
    nof_prb: u32,
    p: u32,
    mcs: HashMap<Rnti, u32>,
    ul_retx: HashMap<Rnti, u32>,
    ndi: HashMap<Rnti, bool>,
}

impl SimDciGenerator {
    pub fn new(params: &SchedParams) -> Self {
        Self {
            nof_prb: params.nof_prb,
            p: params.p,
            mcs: HashMap::new(),
            ul_retx: HashMap::new(),
            ndi: HashMap::new(),
        }
    }

    pub fn add_user(&mut self, ue: &SimUe) {
        self.mcs.insert(ue.rnti, ue.cfg.mcs.min(MAX_DATA_MCS));
    }

    /// Retransmission count of the user's pending uplink HARQ, consumed on read
    pub fn set_ul_retx(&mut self, rnti: Rnti, retx_cnt: u32) {
        self.ul_retx.insert(rnti, retx_cnt);
    }

    fn nof_prb_in_mask(&self, mask: &RbgMask) -> u32 {
        mask.iter_ones()
            .map(|rbg| (self.nof_prb - (rbg * self.p).min(self.nof_prb)).min(self.p))
            .sum()
    }

    /// Rough TBS: single PRB entry of the table scaled by the allocation
    fn estimate_tbs(mcs: u32, nof_prb: u32) -> Result<u32, DciError> {
        let per_prb = ra::tbs_from_idx(mcs, 1).ok_or(DciError::NonPositiveTbs(0))?;
        let tbs = per_prb * nof_prb;
        if tbs == 0 {
            return Err(DciError::NonPositiveTbs(0));
        }
        Ok(tbs)
    }

    fn toggle_ndi(&mut self, rnti: Rnti) -> bool {
        let ndi = self.ndi.entry(rnti).or_insert(false);
        *ndi = !*ndi;
        *ndi
    }
}

impl UeDciGenerator for SimDciGenerator {
    fn generate_dl(
        &mut self,
        alloc: &DlDataAlloc,
        location: DciLocation,
        _tti_params: &TtiParams,
        _cfi: u32,
    ) -> Result<DlDataSchedInfo, DciError> {
        let mcs = self.mcs.get(&alloc.rnti).copied().unwrap_or(0);
        let nof_prb = self.nof_prb_in_mask(&alloc.user_mask);
        let tbs = Self::estimate_tbs(mcs, nof_prb)?;

        let dci = DlDci {
            rnti: alloc.rnti,
            format: DciFormat::Format1,
            location,
            alloc: DlResourceAllocation::Type0 { rbg_mask: alloc.user_mask },
            pid: alloc.pid,
            mcs_idx: mcs,
            rv: 0,
            ndi: self.toggle_ndi(alloc.rnti),
        };
        Ok(DlDataSchedInfo { dci, tbs })
    }

    fn generate_ul(
        &mut self,
        alloc: &UlDataAlloc,
        location: Option<DciLocation>,
        tti_params: &TtiParams,
    ) -> Result<UlSchedInfo, DciError> {
        let range = alloc.alloc;
        if range.len == 0 || range.end() > self.nof_prb {
            return Err(DciError::InvalidRange { start: range.start, len: range.len, nof_prb: self.nof_prb });
        }
        let mcs = alloc
            .mcs
            .unwrap_or_else(|| self.mcs.get(&alloc.rnti).copied().unwrap_or(0));
        let tbs = Self::estimate_tbs(mcs.min(MAX_DATA_MCS), range.len)?;
        let retx_cnt = if alloc.kind.is_retx() { self.ul_retx.remove(&alloc.rnti).unwrap_or(1) } else { 0 };

        debug!(
            "UL DCI rnti={}, tti_tx_ul={}, kind={:?}, retx={}",
            alloc.rnti, tti_params.tti_tx_ul, alloc.kind, retx_cnt
        );

        let dci = UlDci {
            rnti: alloc.rnti,
            location,
            riv: ra::riv(range.len, range.start, self.nof_prb),
            mcs_idx: mcs,
            rv: rv_idx(retx_cnt),
            ndi: !alloc.kind.is_retx(),
        };
        Ok(UlSchedInfo { dci, kind: alloc.kind, prb: range, tbs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layers::mac::{SchedConfig, UlAllocKind};

    fn params() -> SchedParams {
        SchedParams::new(&SchedConfig {
            nof_prb: 25,
            nof_cce: [6, 12, 20],
            rbg_size: None,
            sibs: vec![],
            max_pdcch_combinations: 64,
            rar_search_space: vec![],
        })
        .unwrap()
    }

    fn ue_config(rnti: u16) -> UeConfig {
        UeConfig {
            rnti,
            aggregation: AggregationLevel::L2,
            mcs: 10,
            dl_rbgs: 2,
            ul_prbs: 4,
            ul_bler: 0.0,
            sr: None,
        }
    }

    #[test]
    fn test_search_space_within_bounds() {
        for sf_idx in 0..10 {
            let locs = ue_search_space(Rnti(0x46), 20, sf_idx);
            for aggr in AggregationLevel::ALL {
                let cands = locs.candidates(aggr);
                assert!(cands.len() as u32 <= UE_SS_CANDIDATES[aggr.index()]);
                for &ncce in cands {
                    assert_eq!(ncce % aggr.nof_cces(), 0);
                    assert!(ncce + aggr.nof_cces() <= 20);
                }
            }
        }
    }

    #[test]
    fn test_search_space_hash() {
        // Y_0 = 39827 * 70 mod 65537 = 35336
        let locs = ue_search_space(Rnti(70), 16, 0);
        assert_eq!(locs.candidates(AggregationLevel::L8), &[0, 8]);
        assert_eq!(locs.candidates(AggregationLevel::L4), &[0, 4]);
        assert_eq!(locs.candidates(AggregationLevel::L2)[0], 2 * (35336 % 8));
    }

    #[test]
    fn test_small_control_region_drops_levels() {
        let locs = ue_search_space(Rnti(0x46), 6, 3);
        assert!(locs.candidates(AggregationLevel::L8).is_empty());
        assert_eq!(locs.candidates(AggregationLevel::L4), &[0]);
    }

    #[test]
    fn test_sr_collision() {
        let mut cfg = ue_config(0x46);
        cfg.sr = Some(SrConfig { period: 10, offset: 2, n_pucch_sr: 5, n1_pucch_an: 3 });
        let ue = SimUe::new(cfg, &params());
        // ACK at TTI 12 is an SR TTI
        assert!(ue.pucch_sr_collision(8, 2));
        assert!(!ue.pucch_sr_collision(8, 4));
        assert!(!ue.pucch_sr_collision(9, 2));
    }

    #[test]
    fn test_pending_ul_retx() {
        let mut ue = SimUe::new(ue_config(0x46), &params());
        assert_eq!(ue.pending_ul_retx(8), None);
        ue.ul_harq = Some(UlHarq { tti_tx_ul: 8, alloc: PrbRange::new(2, 4), retx_cnt: 1 });
        assert_eq!(ue.pending_ul_retx(8), Some(PrbRange::new(2, 4)));
        assert_eq!(ue.pending_ul_retx(9), None);
        assert!(ue.dci_locations(2, 3).is_some());
        assert!(ue.dci_locations(0, 3).is_none());
    }

    #[test]
    fn test_generator() {
        let params = params();
        let ue = SimUe::new(ue_config(0x46), &params);
        let mut generator = SimDciGenerator::new(&params);
        generator.add_user(&ue);

        let location = DciLocation { aggregation: AggregationLevel::L2, ncce: 2 };
        let dl = DlDataAlloc {
            dci_idx: 0,
            rnti: Rnti(0x46),
            // P=2: RBG 12 holds the single last PRB
            user_mask: RbgMask::from_indices(params.nof_rbgs, [11, 12]),
            pid: 2,
        };
        let info = generator.generate_dl(&dl, location, &TtiParams::new(0), 1).unwrap();
        assert_eq!(info.tbs, 3 * 144);
        assert_eq!(info.dci.pid, 2);
        assert!(info.dci.ndi);

        let ul = UlDataAlloc {
            kind: UlAllocKind::AdaptiveRetx,
            dci_idx: Some(1),
            rnti: Rnti(0x46),
            alloc: PrbRange::new(0, 4),
            mcs: None,
        };
        generator.set_ul_retx(Rnti(0x46), 2);
        let info = generator.generate_ul(&ul, Some(location), &TtiParams::new(0)).unwrap();
        assert_eq!(info.dci.rv, 3);
        assert!(!info.dci.ndi);
        assert_eq!(info.dci.riv, 75);
        assert_eq!(info.tbs, 4 * 144);
    }
}
