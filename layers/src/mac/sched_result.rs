//! TTI Scheduling Result
//!
//! Ordered front end of the TTI grid for one carrier. Requests are recorded
//! as they are accepted; once all of them are in, [`TtiSchedResult::finalize`]
//! picks one PDCCH combination and turns every record into a DCI.
//!
//! Requests must arrive in priority order: broadcast, paging and random access
//! responses first, then downlink user data, then uplink user data.

use super::dci::{self, DciLocation, DlDci};
use super::params::SchedParams;
use super::pdcch_grid::PdcchAlloc;
use super::tti_grid::TtiGrid;
use super::ue::{DlDataSchedInfo, SchedUe, UeDciGenerator, UlSchedInfo};
use super::{AllocError, AllocType, Direction};
use crate::LayerError;
use common::{AggregationLevel, CceMask, PrbRange, RbgMask, RbgRange, Rnti, TtiParams};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Redundancy version sequence for consecutive SIB transmissions
const RV_IDX: [u32; 4] = [0, 2, 3, 1];

/// Redundancy version of the `retx_cnt`-th transmission
pub fn rv_idx(retx_cnt: u32) -> u32 {
    RV_IDX[(retx_cnt % 4) as usize]
}

/// Fields shared by broadcast, paging and RAR records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtrlAlloc {
    /// Index of the DCI in the PDCCH combination
    pub dci_idx: usize,
    pub rbg_range: RbgRange,
    pub rnti: Rnti,
    /// Payload in bytes
    pub req_bytes: u32,
    pub alloc_type: AllocType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcKind {
    Sib { sib_idx: u32, rv: u32 },
    Paging,
}

/// Accepted broadcast or paging request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BcAlloc {
    pub ctrl: CtrlAlloc,
    pub kind: BcKind,
}

/// Uplink grant for a Msg3 carried in a random access response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Msg3Grant {
    /// Preamble index
    pub ra_id: u32,
    pub temp_crnti: Rnti,
    /// Resource block assignment
    pub rba: u32,
    pub trunc_mcs: u32,
}

/// Payload of a random access response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RarGrant {
    pub msg3_grants: Vec<Msg3Grant>,
}

/// Accepted random access response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarAlloc {
    pub ctrl: CtrlAlloc,
    pub grant: RarGrant,
}

/// Accepted downlink data request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlDataAlloc {
    pub dci_idx: usize,
    pub rnti: Rnti,
    pub user_mask: RbgMask,
    /// HARQ process id
    pub pid: u32,
}

/// Kind of uplink grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UlAllocKind {
    NewTx,
    NonAdaptiveRetx,
    AdaptiveRetx,
    Msg3,
}

impl UlAllocKind {
    /// Msg3 and non-adaptive retransmissions are signalled without DCI
    pub fn needs_pdcch(&self) -> bool {
        matches!(self, UlAllocKind::NewTx | UlAllocKind::AdaptiveRetx)
    }

    pub fn is_retx(&self) -> bool {
        matches!(self, UlAllocKind::NonAdaptiveRetx | UlAllocKind::AdaptiveRetx)
    }

    pub fn is_msg3(&self) -> bool {
        *self == UlAllocKind::Msg3
    }
}

/// Accepted uplink data request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlDataAlloc {
    pub kind: UlAllocKind,
    /// Index of the DCI in the PDCCH combination, if any
    pub dci_idx: Option<usize>,
    pub rnti: Rnti,
    pub alloc: PrbRange,
    /// Fixed MCS, for Msg3
    pub mcs: Option<u32>,
}

/// Logical channel of a broadcast grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BcChannel {
    Bcch { sib_idx: u32 },
    Pcch,
}

/// Broadcast or paging grant ready for the PHY
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BcSchedInfo {
    pub dci: DlDci,
    pub channel: BcChannel,
    /// Transport block size in bits
    pub tbs: u32,
    pub payload_bytes: u32,
}

/// Random access response ready for the PHY
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RarSchedInfo {
    pub dci: DlDci,
    /// Transport block size in bits
    pub tbs: u32,
    pub payload_bytes: u32,
    pub msg3_grants: Vec<Msg3Grant>,
}

/// Everything scheduled for one TTI of one carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedResult {
    pub tti: TtiParams,
    pub cfi: u32,
    pub nof_ctrl_symbols: u32,
    /// CCEs used by the selected PDCCH combination
    pub pdcch_mask: CceMask,
    pub bc: Vec<BcSchedInfo>,
    pub rar: Vec<RarSchedInfo>,
    pub dl_data: Vec<DlDataSchedInfo>,
    pub ul_data: Vec<UlSchedInfo>,
}

/// Per-carrier scheduling state of one TTI
#[derive(Debug)]
pub struct TtiSchedResult {
    params: Arc<SchedParams>,
    tti_params: TtiParams,
    tti_alloc: TtiGrid,
    bc_allocs: Vec<BcAlloc>,
    rar_allocs: Vec<RarAlloc>,
    data_allocs: Vec<DlDataAlloc>,
    ul_data_allocs: Vec<UlDataAlloc>,
}

impl TtiSchedResult {
    pub fn new(params: Arc<SchedParams>) -> Self {
        let tti_alloc = TtiGrid::new(Arc::clone(&params));
        Self {
            params,
            tti_params: TtiParams::default(),
            tti_alloc,
            bc_allocs: Vec::new(),
            rar_allocs: Vec::new(),
            data_allocs: Vec::new(),
            ul_data_allocs: Vec::new(),
        }
    }

    /// Begin the TTI in which the scheduler runs at `tti_rx`
    pub fn new_tti(&mut self, tti_rx: u32, start_cfi: u32) -> Result<(), LayerError> {
        let tti_params = TtiParams::new(tti_rx);
        self.tti_alloc.new_tti(tti_params, start_cfi)?;
        self.tti_params = tti_params;

        self.bc_allocs.clear();
        self.rar_allocs.clear();
        self.data_allocs.clear();
        self.ul_data_allocs.clear();
        Ok(())
    }

    pub fn is_dl_alloc(&self, rnti: Rnti) -> bool {
        self.data_allocs.iter().any(|a| a.rnti == rnti)
    }

    pub fn is_ul_alloc(&self, rnti: Rnti) -> bool {
        self.ul_data_allocs.iter().any(|a| a.rnti == rnti)
    }

    fn last_dci_idx(&self) -> usize {
        self.tti_alloc.pdcch_grid().nof_allocs() - 1
    }

    fn alloc_dl_ctrl(
        &mut self,
        aggr: AggregationLevel,
        tbs_bytes: u32,
        rnti: Rnti,
    ) -> Result<CtrlAlloc, AllocError> {
        let alloc_type = match rnti {
            Rnti::SI => AllocType::DlBc,
            Rnti::P => AllocType::DlPcch,
            _ => AllocType::DlRar,
        };

        let rbg_range = self.tti_alloc.alloc_dl_ctrl(aggr, alloc_type)?;
        Ok(CtrlAlloc {
            dci_idx: self.last_dci_idx(),
            rbg_range,
            rnti,
            req_bytes: tbs_bytes,
            alloc_type,
        })
    }

    /// Schedule SIB `sib_idx` for its `sib_ntx`-th transmission
    pub fn alloc_bc(&mut self, aggr: AggregationLevel, sib_idx: u32, sib_ntx: u32) -> Result<(), AllocError> {
        let sib_len = self.params.sib_len(sib_idx).ok_or(AllocError::UnknownSib(sib_idx))?;
        let rv = rv_idx(sib_ntx);
        let ctrl = self.alloc_dl_ctrl(aggr, sib_len, Rnti::SI).map_err(|e| {
            warn!(
                "SCHED: Could not allocate SIB={}, L={}, len={}, cause={}",
                sib_idx + 1,
                aggr.index(),
                sib_len,
                e
            );
            e
        })?;

        self.bc_allocs.push(BcAlloc { ctrl, kind: BcKind::Sib { sib_idx, rv } });
        Ok(())
    }

    pub fn alloc_paging(&mut self, aggr: AggregationLevel, paging_payload: u32) -> Result<(), AllocError> {
        let ctrl = self.alloc_dl_ctrl(aggr, paging_payload, Rnti::P).map_err(|e| {
            warn!("SCHED: Could not allocate Paging with payload length={}, cause={}", paging_payload, e);
            e
        })?;

        self.bc_allocs.push(BcAlloc { ctrl, kind: BcKind::Paging });
        Ok(())
    }

    /// Schedule the response to preambles received at `prach_tti`
    pub fn alloc_rar(
        &mut self,
        aggr: AggregationLevel,
        rar_grant: RarGrant,
        prach_tti: u32,
        buf_rar: u32,
    ) -> Result<&RarAlloc, AllocError> {
        let ra_rnti = Rnti::ra_rnti(prach_tti);
        let ctrl = self.alloc_dl_ctrl(aggr, buf_rar, ra_rnti).map_err(|e| {
            warn!("SCHED: Could not allocate RAR for L={}, cause={}", aggr.index(), e);
            e
        })?;

        self.rar_allocs.push(RarAlloc { ctrl, grant: rar_grant });
        Ok(&self.rar_allocs[self.rar_allocs.len() - 1])
    }

    pub fn alloc_dl_user(&mut self, user: &dyn SchedUe, user_mask: RbgMask, pid: u32) -> Result<(), AllocError> {
        let rnti = user.rnti();
        if self.is_dl_alloc(rnti) {
            warn!("SCHED: Attempt to assign multiple harq pids to the same user rnti={}", rnti);
            return Err(AllocError::DuplicateAlloc { rnti, direction: Direction::Downlink });
        }

        // Try to allocate RBGs and DCI
        self.tti_alloc.alloc_dl_data(user, user_mask)?;

        let dci_idx = self.last_dci_idx();
        self.data_allocs.push(DlDataAlloc {
            dci_idx,
            rnti,
            user_mask,
            pid,
        });
        Ok(())
    }

    fn alloc_ul(
        &mut self,
        user: &dyn SchedUe,
        alloc: PrbRange,
        kind: UlAllocKind,
        mcs: Option<u32>,
    ) -> Result<(), AllocError> {
        let rnti = user.rnti();
        if self.is_ul_alloc(rnti) {
            warn!("SCHED: Attempt to assign multiple ul_harq_proc to the same user rnti={}", rnti);
            return Err(AllocError::DuplicateAlloc { rnti, direction: Direction::Uplink });
        }

        let needs_pdcch = kind.needs_pdcch();
        self.tti_alloc.alloc_ul_data(user, alloc, needs_pdcch)?;

        let dci_idx = needs_pdcch.then(|| self.last_dci_idx());
        self.ul_data_allocs.push(UlDataAlloc {
            kind,
            dci_idx,
            rnti,
            alloc,
            mcs,
        });
        Ok(())
    }

    /// Schedule uplink data, classifying it from the user's pending HARQ retransmission
    pub fn alloc_ul_user(&mut self, user: &dyn SchedUe, alloc: PrbRange) -> Result<(), AllocError> {
        let kind = match user.pending_ul_retx(self.tti_params.tti_tx_ul) {
            Some(prev) if prev == alloc => UlAllocKind::NonAdaptiveRetx,
            Some(_) => UlAllocKind::AdaptiveRetx,
            None => UlAllocKind::NewTx,
        };
        self.alloc_ul(user, alloc, kind, None)
    }

    /// Reserve the PUSCH granted to a Msg3 by an earlier RAR
    pub fn alloc_ul_msg3(&mut self, user: &dyn SchedUe, alloc: PrbRange, mcs: u32) -> Result<(), AllocError> {
        self.alloc_ul(user, alloc, UlAllocKind::Msg3, Some(mcs))
    }

    fn dci_location(dci_result: &[PdcchAlloc], dci_idx: usize) -> Option<DciLocation> {
        dci_result.get(dci_idx).map(|a| a.location)
    }

    fn bc_sched_result(&self, dci_result: &[PdcchAlloc]) -> Vec<BcSchedInfo> {
        let mut result = Vec::with_capacity(self.bc_allocs.len());
        for bc_alloc in &self.bc_allocs {
            let ctrl = &bc_alloc.ctrl;
            let Some(location) = Self::dci_location(dci_result, ctrl.dci_idx) else {
                warn!("SCHED: missing DCI {} for broadcast rnti={}", ctrl.dci_idx, ctrl.rnti);
                continue;
            };

            let prb_range = PrbRange::from_rbg_range(ctrl.rbg_range, self.params.p, self.params.nof_prb);
            let rv = match bc_alloc.kind {
                BcKind::Sib { rv, .. } => rv,
                BcKind::Paging => 0,
            };
            let grant = dci::generate_format1a(
                prb_range.start,
                prb_range.len,
                ctrl.req_bytes,
                rv,
                ctrl.rnti,
                self.params.nof_prb,
                location,
            );

            match (bc_alloc.kind, grant) {
                (BcKind::Sib { sib_idx, rv }, Ok(grant)) => {
                    info!(
                        "SCHED: SIB{}, rbgs={}, dci=({},{}), rv={}, len={}, period={}, mcs={}",
                        sib_idx + 1,
                        ctrl.rbg_range,
                        location.aggregation.index(),
                        location.ncce,
                        rv,
                        ctrl.req_bytes,
                        self.params.sibs.get(sib_idx as usize).map_or(0, |s| s.period_rf),
                        grant.dci.mcs_idx
                    );
                    result.push(BcSchedInfo {
                        dci: grant.dci,
                        channel: BcChannel::Bcch { sib_idx },
                        tbs: grant.tbs,
                        payload_bytes: ctrl.req_bytes,
                    });
                }
                (BcKind::Paging, Ok(grant)) => {
                    info!(
                        "SCHED: PCH, rbgs={}, dci=({},{}), tbs={}, mcs={}",
                        ctrl.rbg_range,
                        location.aggregation.index(),
                        location.ncce,
                        grant.tbs,
                        grant.dci.mcs_idx
                    );
                    result.push(BcSchedInfo {
                        dci: grant.dci,
                        channel: BcChannel::Pcch,
                        tbs: grant.tbs,
                        payload_bytes: ctrl.req_bytes,
                    });
                }
                (kind, Err(e)) => {
                    warn!(
                        "SCHED: Error {:?}, rbgs={}, dci=({},{}), len={}: {}",
                        kind,
                        ctrl.rbg_range,
                        location.aggregation.index(),
                        location.ncce,
                        ctrl.req_bytes,
                        e
                    );
                }
            }
        }
        result
    }

    fn rar_sched_result(&self, dci_result: &[PdcchAlloc]) -> Vec<RarSchedInfo> {
        let mut result = Vec::with_capacity(self.rar_allocs.len());
        for rar_alloc in &self.rar_allocs {
            let ctrl = &rar_alloc.ctrl;
            let Some(location) = Self::dci_location(dci_result, ctrl.dci_idx) else {
                warn!("SCHED: missing DCI {} for RAR ra-rnti={}", ctrl.dci_idx, ctrl.rnti);
                continue;
            };

            let prb_range = PrbRange::from_rbg_range(ctrl.rbg_range, self.params.p, self.params.nof_prb);
            let grant = match dci::generate_format1a(
                prb_range.start,
                prb_range.len,
                ctrl.req_bytes,
                0,
                ctrl.rnti,
                self.params.nof_prb,
                location,
            ) {
                Ok(grant) => grant,
                Err(e) => {
                    warn!(
                        "SCHED: Error RAR, ra-rnti={}, rbgs={}, dci=({},{}): {}",
                        ctrl.rnti,
                        ctrl.rbg_range,
                        location.aggregation.index(),
                        location.ncce,
                        e
                    );
                    continue;
                }
            };

            for msg3 in &rar_alloc.grant.msg3_grants {
                info!(
                    "SCHED: RAR, temp_crnti={}, ra-rnti={}, rbgs={}, dci=({},{}), rar_grant_rba={}, rar_grant_mcs={}",
                    msg3.temp_crnti,
                    ctrl.rnti.value(),
                    ctrl.rbg_range,
                    location.aggregation.index(),
                    location.ncce,
                    msg3.rba,
                    msg3.trunc_mcs
                );
            }

            result.push(RarSchedInfo {
                dci: grant.dci,
                tbs: grant.tbs,
                payload_bytes: ctrl.req_bytes,
                msg3_grants: rar_alloc.grant.msg3_grants.clone(),
            });
        }
        result
    }

    fn dl_data_sched_result(
        &self,
        dci_result: &[PdcchAlloc],
        generator: &mut dyn UeDciGenerator,
    ) -> Vec<DlDataSchedInfo> {
        let cfi = self.tti_alloc.cfi();
        let mut result = Vec::with_capacity(self.data_allocs.len());
        for data_alloc in &self.data_allocs {
            let Some(location) = Self::dci_location(dci_result, data_alloc.dci_idx) else {
                warn!("SCHED: missing DCI {} for DL rnti={}", data_alloc.dci_idx, data_alloc.rnti);
                continue;
            };

            match generator.generate_dl(data_alloc, location, &self.tti_params, cfi) {
                Ok(data) if data.tbs > 0 => {
                    info!(
                        "SCHED: DL rnti={}, pid={}, mask={}, dci=({},{}), tbs={}",
                        data_alloc.rnti,
                        data_alloc.pid,
                        data_alloc.user_mask,
                        location.aggregation.index(),
                        location.ncce,
                        data.tbs
                    );
                    result.push(data);
                }
                Ok(_) => {
                    warn!(
                        "SCHED: Error DL rnti={}, pid={}, mask={}, tbs=0",
                        data_alloc.rnti, data_alloc.pid, data_alloc.user_mask
                    );
                }
                Err(e) => {
                    warn!(
                        "SCHED: Error DL rnti={}, pid={}, mask={}: {}",
                        data_alloc.rnti, data_alloc.pid, data_alloc.user_mask, e
                    );
                }
            }
        }
        result
    }

    fn ul_sched_result(&self, dci_result: &[PdcchAlloc], generator: &mut dyn UeDciGenerator) -> Vec<UlSchedInfo> {
        let mut result = Vec::with_capacity(self.ul_data_allocs.len());
        for ul_alloc in &self.ul_data_allocs {
            let location = match ul_alloc.dci_idx {
                Some(idx) => match Self::dci_location(dci_result, idx) {
                    Some(location) => Some(location),
                    None => {
                        warn!("SCHED: missing DCI {} for UL rnti={}", idx, ul_alloc.rnti);
                        continue;
                    }
                },
                None => None,
            };
            let label = if ul_alloc.kind.is_msg3() { "Msg3" } else { "UL" };
            let tx = if ul_alloc.kind.is_retx() { "retx" } else { "tx" };

            match generator.generate_ul(ul_alloc, location, &self.tti_params) {
                Ok(pusch) if pusch.tbs > 0 => {
                    info!(
                        "SCHED: {} {} rnti={}, dci={:?}, prb={}, tbs={}",
                        label,
                        tx,
                        ul_alloc.rnti,
                        location.map(|l| (l.aggregation.index(), l.ncce)),
                        ul_alloc.alloc,
                        pusch.tbs
                    );
                    result.push(pusch);
                }
                Ok(_) => {
                    warn!("SCHED: Error {} {} rnti={}, prb={}, tbs=0", label, tx, ul_alloc.rnti, ul_alloc.alloc);
                }
                Err(e) => {
                    warn!("SCHED: Error {} {} rnti={}, prb={}: {}", label, tx, ul_alloc.rnti, ul_alloc.alloc, e);
                }
            }
        }
        result
    }

    /// Select the first PDCCH combination and build every DCI of the TTI
    ///
    /// Records whose DCI cannot be built are dropped; their resources stay
    /// reserved until the next TTI.
    pub fn finalize(&mut self, generator: &mut dyn UeDciGenerator) -> SchedResult {
        let pdcch = self.tti_alloc.pdcch_grid();
        let dci_result = pdcch.get_allocs(0);
        let pdcch_mask = pdcch.total_mask(0);

        let bc = self.bc_sched_result(&dci_result);
        let rar = self.rar_sched_result(&dci_result);
        let dl_data = self.dl_data_sched_result(&dci_result, generator);
        let ul_data = self.ul_sched_result(&dci_result, generator);

        self.bc_allocs.clear();
        self.rar_allocs.clear();
        self.data_allocs.clear();
        self.ul_data_allocs.clear();

        SchedResult {
            tti: self.tti_params,
            cfi: self.tti_alloc.cfi(),
            nof_ctrl_symbols: self.nof_ctrl_symbols(),
            pdcch_mask,
            bc,
            rar,
            dl_data,
            ul_data,
        }
    }

    /// OFDM symbols of the control region; narrow carriers use one more than the CFI
    pub fn nof_ctrl_symbols(&self) -> u32 {
        self.tti_alloc.cfi() + if self.params.nof_prb <= 10 { 1 } else { 0 }
    }

    pub fn tti_params(&self) -> &TtiParams {
        &self.tti_params
    }

    pub fn tti_grid(&self) -> &TtiGrid {
        &self.tti_alloc
    }

    pub fn bc_allocs(&self) -> &[BcAlloc] {
        &self.bc_allocs
    }

    pub fn rar_allocs(&self) -> &[RarAlloc] {
        &self.rar_allocs
    }

    pub fn dl_data_allocs(&self) -> &[DlDataAlloc] {
        &self.data_allocs
    }

    pub fn ul_data_allocs(&self) -> &[UlDataAlloc] {
        &self.ul_data_allocs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::dci::{DciError, DciFormat, DlResourceAllocation, UlDci};
    use crate::mac::params::{SchedConfig, SibConfig};
    use crate::mac::pdcch_grid::DciLocations;
    use crate::mac::ra;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct TestUe {
        rnti: Rnti,
        aggr: AggregationLevel,
        locs: DciLocations,
        ul_retx: Option<PrbRange>,
    }

    impl SchedUe for TestUe {
        fn rnti(&self) -> Rnti {
            self.rnti
        }

        fn dci_locations(&self, _cfi: u32, _sf_idx: u32) -> Option<&DciLocations> {
            Some(&self.locs)
        }

        fn aggregation_level(&self, _nof_bits: u32) -> AggregationLevel {
            self.aggr
        }

        fn pending_ul_retx(&self, _tti_tx_ul: u32) -> Option<PrbRange> {
            self.ul_retx
        }
    }

    fn ue(rnti: u16, aggr: AggregationLevel, starts: &[u32]) -> TestUe {
        TestUe {
            rnti: Rnti(rnti),
            aggr,
            locs: DciLocations::from_candidates(&[(aggr, starts)]),
            ul_retx: None,
        }
    }

    /// Builds data DCIs from the allocation alone; fails for the listed RNTIs
    #[derive(Default)]
    struct TestGenerator {
        failing: Vec<Rnti>,
        zero_tbs: Vec<Rnti>,
    }

    impl UeDciGenerator for TestGenerator {
        fn generate_dl(
            &mut self,
            alloc: &DlDataAlloc,
            location: DciLocation,
            _tti_params: &TtiParams,
            _cfi: u32,
        ) -> Result<DlDataSchedInfo, DciError> {
            if self.failing.contains(&alloc.rnti) {
                return Err(DciError::UnsupportedFormat(DciFormat::Format1));
            }
            let tbs = if self.zero_tbs.contains(&alloc.rnti) { 0 } else { alloc.user_mask.count() * 100 };
            Ok(DlDataSchedInfo {
                dci: DlDci {
                    rnti: alloc.rnti,
                    format: DciFormat::Format1,
                    location,
                    alloc: DlResourceAllocation::Type0 { rbg_mask: alloc.user_mask },
                    pid: alloc.pid,
                    mcs_idx: 10,
                    rv: 0,
                    ndi: true,
                },
                tbs,
            })
        }

        fn generate_ul(
            &mut self,
            alloc: &UlDataAlloc,
            location: Option<DciLocation>,
            _tti_params: &TtiParams,
        ) -> Result<UlSchedInfo, DciError> {
            if self.failing.contains(&alloc.rnti) {
                return Err(DciError::UnsupportedFormat(DciFormat::Format0));
            }
            Ok(UlSchedInfo {
                dci: UlDci {
                    rnti: alloc.rnti,
                    location,
                    riv: ra::riv(alloc.alloc.len, alloc.alloc.start, 25),
                    mcs_idx: alloc.mcs.unwrap_or(5),
                    rv: 0,
                    ndi: !alloc.kind.is_retx(),
                },
                kind: alloc.kind,
                prb: alloc.alloc,
                tbs: alloc.alloc.len * 50,
            })
        }
    }

    /// 25 PRBs with P=1, 16 CCEs at CFI 1, SIB1 of 17 bytes and SIB2 of 300 bytes
    fn config() -> SchedConfig {
        SchedConfig {
            nof_prb: 25,
            nof_cce: [16, 32, 48],
            rbg_size: Some(1),
            sibs: vec![SibConfig { len: 17, period_rf: 8 }, SibConfig { len: 300, period_rf: 16 }],
            max_pdcch_combinations: 64,
            rar_search_space: vec![],
        }
    }

    fn sched_from(cfg: SchedConfig) -> TtiSchedResult {
        let mut sched = TtiSchedResult::new(Arc::new(SchedParams::new(&cfg).unwrap()));
        sched.new_tti(0, 1).unwrap();
        sched
    }

    fn sched() -> TtiSchedResult {
        sched_from(config())
    }

    #[test]
    fn test_rv_sequence() {
        let rvs: Vec<u32> = (0..6).map(rv_idx).collect();
        assert_eq!(rvs, vec![0, 2, 3, 1, 0, 2]);
    }

    #[test]
    fn test_sib_and_paging() {
        let mut sched = sched();
        sched.alloc_bc(AggregationLevel::L4, 0, 1).unwrap();
        sched.alloc_paging(AggregationLevel::L4, 10).unwrap();
        assert_eq!(sched.bc_allocs()[1].ctrl.rbg_range, RbgRange::new(4, 8));
        assert_eq!(sched.bc_allocs()[1].ctrl.dci_idx, 1);

        let result = sched.finalize(&mut TestGenerator::default());
        assert_eq!(result.cfi, 1);
        assert_eq!(result.nof_ctrl_symbols, 1);
        assert_eq!(result.tti.tti_tx_dl, 4);
        assert_eq!(result.pdcch_mask.count(), 8);
        assert_eq!(result.bc.len(), 2);

        let sib = &result.bc[0];
        assert_eq!(sib.channel, BcChannel::Bcch { sib_idx: 0 });
        assert_eq!(sib.dci.rnti, Rnti::SI);
        assert_eq!(sib.dci.rv, 2);
        assert_eq!(sib.dci.mcs_idx, 2);
        assert_eq!(sib.tbs, 144);
        assert_eq!(sib.dci.location.ncce, 0);
        match sib.dci.alloc {
            DlResourceAllocation::Type2 { riv, .. } => assert_eq!(riv, 75),
            other => panic!("unexpected allocation {:?}", other),
        }

        let pch = &result.bc[1];
        assert_eq!(pch.channel, BcChannel::Pcch);
        assert_eq!(pch.dci.rnti, Rnti::P);
        assert_eq!(pch.dci.mcs_idx, 1);
        assert_eq!(pch.tbs, 88);
        assert_eq!(pch.dci.location.ncce, 4);
        match pch.dci.alloc {
            DlResourceAllocation::Type2 { riv, .. } => assert_eq!(riv, 79),
            other => panic!("unexpected allocation {:?}", other),
        }

        assert!(sched.bc_allocs().is_empty());
    }

    #[test]
    fn test_unknown_sib() {
        let mut sched = sched();
        assert_eq!(sched.alloc_bc(AggregationLevel::L4, 3, 0), Err(AllocError::UnknownSib(3)));
        assert_eq!(sched.tti_grid().avail_rbg(), 25);
    }

    #[test]
    fn test_oversized_sib_is_dropped() {
        let mut sched = sched();
        sched.alloc_bc(AggregationLevel::L4, 1, 0).unwrap();
        let result = sched.finalize(&mut TestGenerator::default());
        assert!(result.bc.is_empty());
        // resources stay reserved for the TTI
        assert_eq!(sched.tti_grid().avail_rbg(), 21);
    }

    #[test]
    fn test_rar() {
        let mut sched = sched();
        let grant = RarGrant {
            msg3_grants: vec![Msg3Grant { ra_id: 12, temp_crnti: Rnti(0x46), rba: 30, trunc_mcs: 0 }],
        };
        let rar = sched.alloc_rar(AggregationLevel::L4, grant, 1237, 7).unwrap();
        assert_eq!(rar.ctrl.rnti, Rnti(8));
        assert_eq!(rar.ctrl.rbg_range, RbgRange::new(0, 3));
        assert_eq!(rar.ctrl.alloc_type, AllocType::DlRar);

        let result = sched.finalize(&mut TestGenerator::default());
        assert_eq!(result.rar.len(), 1);
        assert_eq!(result.rar[0].dci.rnti, Rnti(8));
        assert_eq!(result.rar[0].payload_bytes, 7);
        assert_eq!(result.rar[0].msg3_grants[0].temp_crnti, Rnti(0x46));
    }

    #[test]
    fn test_rar_uses_configured_search_space() {
        let mut cfg = config();
        // tti_rx 0 transmits in subframe 4
        cfg.rar_search_space = vec![crate::mac::params::RarSearchSpaceConfig {
            cfi: 1,
            sf_idx: 4,
            aggregation: AggregationLevel::L4,
            ncce: vec![12],
        }];
        let mut sched = sched_from(cfg);
        sched.alloc_rar(AggregationLevel::L4, RarGrant::default(), 0, 1).unwrap();
        let result = sched.finalize(&mut TestGenerator::default());
        assert_eq!(result.rar[0].dci.location.ncce, 12);
    }

    #[test]
    fn test_broadcasts_pack_rbgs_until_dci_collision() {
        let mut cfg = config();
        cfg.max_pdcch_combinations = 1;
        let mut sched = sched_from(cfg);

        sched.alloc_bc(AggregationLevel::L4, 0, 0).unwrap();
        assert_eq!(sched.tti_grid().avail_rbg(), 21);
        assert_eq!(sched.bc_allocs()[0].ctrl.rbg_range, RbgRange::new(0, 4));

        sched.alloc_paging(AggregationLevel::L4, 10).unwrap();
        assert_eq!(sched.tti_grid().avail_rbg(), 17);
        assert_eq!(sched.bc_allocs()[1].ctrl.rbg_range, RbgRange::new(4, 8));
        let allocs = sched.tti_grid().pdcch_grid().get_allocs(0);
        assert_eq!(allocs[0].location.ncce, 0);
        assert_eq!(allocs[1].location.ncce, 4);

        // only candidate covers CCEs 0..8
        let user = ue(0x46, AggregationLevel::L8, &[0]);
        assert_eq!(
            sched.alloc_dl_user(&user, RbgMask::with_range(25, 8, 12), 0),
            Err(AllocError::DciCollision)
        );
        assert_eq!(sched.tti_grid().avail_rbg(), 17);
        assert_eq!(sched.tti_grid().pdcch_grid().nof_allocs(), 2);
        assert!(!sched.is_dl_alloc(Rnti(0x46)));
    }

    #[test]
    fn test_huge_paging_payload_is_dropped() {
        let mut sched = sched();
        sched.alloc_paging(AggregationLevel::L4, 0x2000_0000).unwrap();
        sched.alloc_bc(AggregationLevel::L4, 0, 0).unwrap();
        let result = sched.finalize(&mut TestGenerator::default());
        assert_eq!(result.bc.len(), 1);
        assert_eq!(result.bc[0].channel, BcChannel::Bcch { sib_idx: 0 });
    }

    #[test]
    fn test_ul_range_past_u32_limit_rejected() {
        let mut sched = sched();
        let user = ue(0x46, AggregationLevel::L2, &[0]);
        assert_eq!(
            sched.alloc_ul_user(&user, PrbRange::new(u32::MAX, 2)),
            Err(AllocError::OutOfBounds { start: u32::MAX, len: 2, limit: 25 })
        );
        assert!(!sched.is_ul_alloc(Rnti(0x46)));
        assert_eq!(sched.tti_grid().pdcch_grid().nof_allocs(), 0);
        assert!(sched.tti_grid().ul_mask().none());
    }

    #[test]
    fn test_duplicate_dl_user() {
        let mut sched = sched();
        let user = ue(0x46, AggregationLevel::L2, &[0, 2]);
        sched.alloc_dl_user(&user, RbgMask::with_range(25, 0, 5), 0).unwrap();
        assert!(sched.is_dl_alloc(Rnti(0x46)));

        let nodes = sched.tti_grid().pdcch_grid().nof_nodes();
        assert_eq!(
            sched.alloc_dl_user(&user, RbgMask::with_range(25, 5, 10), 1),
            Err(AllocError::DuplicateAlloc { rnti: Rnti(0x46), direction: Direction::Downlink })
        );
        assert_eq!(sched.tti_grid().pdcch_grid().nof_nodes(), nodes);
        assert_eq!(sched.tti_grid().avail_rbg(), 20);
        assert_eq!(sched.dl_data_allocs().len(), 1);
    }

    #[test]
    fn test_ul_classification() {
        let mut sched = sched();
        let mut non_adaptive = ue(0x46, AggregationLevel::L2, &[0]);
        non_adaptive.ul_retx = Some(PrbRange::new(0, 4));
        let mut adaptive = ue(0x47, AggregationLevel::L2, &[2]);
        adaptive.ul_retx = Some(PrbRange::new(4, 2));
        let new_tx = ue(0x48, AggregationLevel::L2, &[4]);
        let msg3 = ue(0x49, AggregationLevel::L2, &[0]);

        sched.alloc_ul_user(&non_adaptive, PrbRange::new(0, 4)).unwrap();
        sched.alloc_ul_user(&adaptive, PrbRange::new(4, 4)).unwrap();
        sched.alloc_ul_user(&new_tx, PrbRange::new(8, 4)).unwrap();
        sched.alloc_ul_msg3(&msg3, PrbRange::new(12, 3), 2).unwrap();

        let kinds: Vec<_> = sched.ul_data_allocs().iter().map(|a| (a.kind, a.dci_idx)).collect();
        assert_eq!(
            kinds,
            vec![
                (UlAllocKind::NonAdaptiveRetx, None),
                (UlAllocKind::AdaptiveRetx, Some(0)),
                (UlAllocKind::NewTx, Some(1)),
                (UlAllocKind::Msg3, None),
            ]
        );
        assert_eq!(sched.tti_grid().pdcch_grid().nof_allocs(), 2);
        assert_eq!(
            sched.alloc_ul_user(&new_tx, PrbRange::new(16, 2)),
            Err(AllocError::DuplicateAlloc { rnti: Rnti(0x48), direction: Direction::Uplink })
        );

        let result = sched.finalize(&mut TestGenerator::default());
        assert_eq!(result.ul_data.len(), 4);
        assert_eq!(result.ul_data[0].dci.location, None);
        assert_eq!(result.ul_data[1].dci.location.map(|l| l.ncce), Some(2));
        assert_eq!(result.ul_data[3].dci.mcs_idx, 2);
        assert!(result.ul_data[3].kind.is_msg3());
    }

    #[test]
    fn test_finalize_drops_failed_records() {
        let mut sched = sched();
        sched.alloc_bc(AggregationLevel::L4, 0, 0).unwrap();
        let a = ue(0x46, AggregationLevel::L2, &[4]);
        let b = ue(0x47, AggregationLevel::L2, &[6]);
        let c = ue(0x48, AggregationLevel::L1, &[8]);
        sched.alloc_dl_user(&a, RbgMask::with_range(25, 4, 10), 3).unwrap();
        sched.alloc_dl_user(&b, RbgMask::with_range(25, 10, 12), 4).unwrap();
        sched.alloc_dl_user(&c, RbgMask::with_range(25, 12, 13), 5).unwrap();
        let b_ul = ue(0x47, AggregationLevel::L2, &[10]);
        sched.alloc_ul_user(&b_ul, PrbRange::new(0, 6)).unwrap();

        let mut generator = TestGenerator { failing: vec![Rnti(0x47)], zero_tbs: vec![Rnti(0x48)] };
        let result = sched.finalize(&mut generator);

        assert_eq!(result.bc.len(), 1);
        assert_eq!(result.dl_data.len(), 1);
        assert_eq!(result.dl_data[0].dci.rnti, Rnti(0x46));
        assert_eq!(result.dl_data[0].dci.pid, 3);
        assert_eq!(result.dl_data[0].dci.location.ncce, 4);
        assert_eq!(result.dl_data[0].tbs, 600);
        assert!(result.ul_data.is_empty());
        assert!(sched.dl_data_allocs().is_empty());
        assert!(sched.ul_data_allocs().is_empty());
    }

    #[test]
    fn test_narrow_carrier_control_symbols() {
        let cfg = SchedConfig {
            nof_prb: 6,
            nof_cce: [2, 5, 8],
            rbg_size: None,
            sibs: vec![],
            max_pdcch_combinations: 64,
            rar_search_space: vec![],
        };
        let mut sched = TtiSchedResult::new(Arc::new(SchedParams::new(&cfg).unwrap()));
        sched.new_tti(10239, 2).unwrap();
        assert_eq!(sched.nof_ctrl_symbols(), 3);
        assert_eq!(sched.tti_params().tti_tx_dl, 3);
    }

    #[test]
    fn test_random_requests_never_overlap() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut sched = sched();

        for tti in 0..50 {
            sched.new_tti(tti, rng.gen_range(1..=3)).unwrap();
            if rng.gen_bool(0.5) {
                let _ = sched.alloc_bc(AggregationLevel::L4, 0, tti);
            }

            let mut dl_used = RbgMask::new(25);
            let mut ul_used = common::PrbMask::new(25);
            for i in 0..8u16 {
                let aggr = AggregationLevel::ALL[rng.gen_range(0..4)];
                let step = aggr.nof_cces();
                let starts: Vec<u32> = (0..2).map(|_| rng.gen_range(0..4) * step).collect();
                let user = ue(0x46 + i, aggr, &starts);

                let start = rng.gen_range(0..25);
                let end = rng.gen_range(start + 1..=25);
                let mask = RbgMask::with_range(25, start, end);
                if sched.alloc_dl_user(&user, mask, u32::from(i)).is_ok() {
                    assert!(!dl_used.intersects(&mask));
                    dl_used |= mask;
                }

                let prb_start = rng.gen_range(0..24);
                let prb = PrbRange::new(prb_start, rng.gen_range(1..=25 - prb_start));
                if sched.alloc_ul_user(&user, prb).is_ok() {
                    let prb_mask = common::PrbMask::with_range(25, prb.start, prb.end());
                    assert!(!ul_used.intersects(&prb_mask));
                    ul_used |= prb_mask;
                }
            }

            let grid = sched.tti_grid();
            assert_eq!(grid.avail_rbg() + grid.dl_mask().count(), 25);
            assert_eq!(*grid.dl_mask() & dl_used, dl_used);

            let allocs = grid.pdcch_grid().get_allocs(0);
            assert_eq!(allocs.len(), grid.pdcch_grid().nof_allocs());
            let mut cces = CceMask::new(grid.pdcch_grid().nof_cces());
            for alloc in &allocs {
                assert!(!cces.intersects(&alloc.current_mask));
                cces |= alloc.current_mask;
            }
            assert_eq!(cces, grid.pdcch_grid().total_mask(0));
        }
    }
}
