//! Carrier Driver
//!
//! Feeds one carrier's scheduling grid with synthetic traffic, one TTI per
//! call, in the order the grid expects: system information, paging and
//! random access responses, then downlink and uplink user data.

use crate::config::{CellConfig, UeConfig};
use crate::ue::{SimDciGenerator, SimUe, UlHarq};
use common::{tti_add, BoundedBitset, CellId, PrbRange, RbgMask, Rnti, NOF_TTIS};
use layers::mac::{ra, AllocError, Msg3Grant, RarGrant, SchedParams, SchedResult, SchedUe, TtiSchedResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Maximum number of connected users per carrier
const MAX_UES: usize = 32;

/// PRBs granted to a Msg3
const MSG3_PRBS: u32 = 3;

/// MCS of a Msg3
const MSG3_MCS: u32 = 2;

/// TTIs between a RAR and the Msg3 it grants (TS 36.213 6.1.1)
const MSG3_DELAY: u32 = 6;

/// Uplink HARQ round trip
const UL_HARQ_RTT: u32 = 8;

/// Transmissions of an uplink transport block before it is dropped
const MAX_UL_TX: u32 = 4;

/// First temporary C-RNTI handed out by the random access procedure
const FIRST_TEMP_CRNTI: u16 = 0x100;

/// Last C-RNTI before the reserved range
const LAST_TEMP_CRNTI: u16 = 0xFFF3;

/// RAR payload: backoff header plus a subheader and a 6-byte response per preamble
fn rar_payload_len(nof_grants: usize) -> u32 {
    1 + 7 * nof_grants as u32
}

/// Counters of one carrier
#[derive(Debug, Clone, Default, Serialize)]
pub struct CarrierStats {
    pub cell_id: CellId,
    pub nof_ttis: u64,
    pub bc_grants: u64,
    pub rar_grants: u64,
    pub dl_grants: u64,
    pub ul_grants: u64,
    pub rb_collisions: u64,
    pub dci_collisions: u64,
    /// Requests rejected as invalid
    pub alloc_errors: u64,
}

impl CarrierStats {
    fn count_error(&mut self, err: &AllocError) {
        match err {
            AllocError::RbCollision => self.rb_collisions += 1,
            AllocError::DciCollision => self.dci_collisions += 1,
            _ => self.alloc_errors += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingMsg3 {
    tti_tx_ul: u32,
    rnti: Rnti,
    alloc: PrbRange,
}

/// Scheduling state of one carrier
pub struct Carrier {
    cfg: CellConfig,
    params: Arc<SchedParams>,
    sched: TtiSchedResult,
    ues: Vec<SimUe>,
    generator: SimDciGenerator,
    rng: StdRng,
    pending_msg3: VecDeque<PendingMsg3>,
    next_temp_crnti: u16,
    tti: u32,
    stats: CarrierStats,
}

impl Carrier {
    pub fn new(cfg: CellConfig, seed: u64) -> anyhow::Result<Self> {
        let params = Arc::new(SchedParams::new(&cfg.sched)?);
        let sched = TtiSchedResult::new(Arc::clone(&params));
        let mut generator = SimDciGenerator::new(&params);

        let ues: Vec<SimUe> = cfg.ues.iter().cloned().map(|ue_cfg| SimUe::new(ue_cfg, &params)).collect();
        for ue in &ues {
            generator.add_user(ue);
        }

        info!(
            "Cell {}: nof_prb={}, P={}, nof_rbgs={}, nof_cce={:?}, {} users",
            cfg.cell_id,
            params.nof_prb,
            params.p,
            params.nof_rbgs,
            params.nof_cce_table,
            ues.len()
        );

        let stats = CarrierStats { cell_id: cfg.cell_id, ..Default::default() };
        Ok(Self {
            cfg,
            params,
            sched,
            ues,
            generator,
            rng: StdRng::seed_from_u64(seed),
            pending_msg3: VecDeque::new(),
            next_temp_crnti: FIRST_TEMP_CRNTI,
            tti: 0,
            stats,
        })
    }

    pub fn cell_id(&self) -> CellId {
        self.cfg.cell_id
    }

    pub fn stats(&self) -> &CarrierStats {
        &self.stats
    }

    pub fn nof_ues(&self) -> usize {
        self.ues.len()
    }

    /// Schedule one TTI and advance the TTI counter
    pub fn run_tti(&mut self) -> anyhow::Result<SchedResult> {
        self.sched.new_tti(self.tti, self.cfg.start_cfi)?;

        self.schedule_bc();
        self.schedule_rar();
        self.schedule_dl();
        self.schedule_msg3();
        self.schedule_ul();

        let result = self.sched.finalize(&mut self.generator);
        self.update_ul_harq(&result);

        self.stats.nof_ttis += 1;
        self.stats.bc_grants += result.bc.len() as u64;
        self.stats.rar_grants += result.rar.len() as u64;
        self.stats.dl_grants += result.dl_data.len() as u64;
        self.stats.ul_grants += result.ul_data.len() as u64;
        if self.stats.nof_ttis % u64::from(NOF_TTIS) == 0 {
            info!("Cell {}: {:?}", self.cfg.cell_id, self.stats);
        }

        self.tti = tti_add(self.tti, 1);
        Ok(result)
    }

    fn schedule_bc(&mut self) {
        let tti = *self.sched.tti_params();
        let aggr = self.cfg.common_aggregation;

        for (sib_idx, sib) in self.params.sibs.iter().enumerate() {
            let sib_idx = sib_idx as u32;
            let (scheduled, sib_ntx) = if sib_idx == 0 {
                // SIB1: subframe 5 of even frames, new transmission every 8 frames
                (tti.sf_idx == 5 && tti.sfn % 2 == 0, (tti.sfn / 2) % 4)
            } else {
                (tti.sf_idx == sib_idx % 10 && tti.sfn % sib.period_rf == 0, 0)
            };
            if !scheduled {
                continue;
            }
            if let Err(e) = self.sched.alloc_bc(aggr, sib_idx, sib_ntx) {
                self.stats.count_error(&e);
            }
        }

        if self.cfg.paging_period > 0 && tti.tti_tx_dl % self.cfg.paging_period == 0 {
            if let Err(e) = self.sched.alloc_paging(aggr, self.cfg.paging_len) {
                self.stats.count_error(&e);
            }
        }
    }

    fn schedule_rar(&mut self) {
        if self.cfg.prach_prob <= 0.0 || !self.rng.gen_bool(self.cfg.prach_prob) {
            return;
        }
        let tti = *self.sched.tti_params();
        let nof_prb = self.params.nof_prb;

        let Some(temp_crnti) = self.free_temp_crnti() else {
            warn!("Cell {}: no free temporary C-RNTI", self.cfg.cell_id);
            return;
        };
        let msg3_start = self.rng.gen_range(0..=nof_prb - MSG3_PRBS.min(nof_prb));
        let msg3_alloc = PrbRange::new(msg3_start, MSG3_PRBS.min(nof_prb));
        let grant = RarGrant {
            msg3_grants: vec![Msg3Grant {
                ra_id: self.rng.gen_range(0..64),
                temp_crnti,
                rba: ra::riv(msg3_alloc.len, msg3_alloc.start, nof_prb),
                trunc_mcs: MSG3_MCS,
            }],
        };
        let payload = rar_payload_len(grant.msg3_grants.len());

        match self.sched.alloc_rar(self.cfg.common_aggregation, grant, tti.tti_rx, payload) {
            Ok(rar) => {
                self.next_temp_crnti = next_temp_crnti(temp_crnti.value());
                for msg3 in &rar.grant.msg3_grants {
                    let (start, len) = ra::riv_to_alloc(msg3.rba, nof_prb);
                    self.pending_msg3.push_back(PendingMsg3 {
                        tti_tx_ul: tti_add(tti.tti_tx_dl, MSG3_DELAY),
                        rnti: msg3.temp_crnti,
                        alloc: PrbRange::new(start, len),
                    });
                }
            }
            Err(e) => self.stats.count_error(&e),
        }
    }

    /// Next temporary C-RNTI not held by a user or an ongoing random access
    fn free_temp_crnti(&self) -> Option<Rnti> {
        let in_use = |rnti: Rnti| {
            self.ues.iter().any(|ue| ue.rnti() == rnti) || self.pending_msg3.iter().any(|m| m.rnti == rnti)
        };
        let mut candidate = self.next_temp_crnti;
        for _ in FIRST_TEMP_CRNTI..=LAST_TEMP_CRNTI {
            if !in_use(Rnti(candidate)) {
                return Some(Rnti(candidate));
            }
            candidate = next_temp_crnti(candidate);
        }
        None
    }

    fn schedule_dl(&mut self) {
        let nof_rbgs = self.params.nof_rbgs;
        let pid = self.tti % 8;
        let mut order: Vec<usize> = (0..self.ues.len()).collect();
        order.shuffle(&mut self.rng);

        for idx in order {
            let ue = &self.ues[idx];
            let n = ue.config().dl_rbgs;
            if n == 0 {
                continue;
            }
            let Some((start, end)) = first_free_run(self.sched.tti_grid().dl_mask(), n) else {
                continue;
            };
            let mask = RbgMask::with_range(nof_rbgs, start, end);
            if let Err(e) = self.sched.alloc_dl_user(ue, mask, pid) {
                debug!("Cell {}: DL rnti={} not scheduled: {}", self.cfg.cell_id, ue.rnti(), e);
                self.stats.count_error(&e);
            }
        }
    }

    fn schedule_msg3(&mut self) {
        let tti_tx_ul = self.sched.tti_params().tti_tx_ul;
        while let Some(msg3) = self.pending_msg3.front().copied() {
            if msg3.tti_tx_ul != tti_tx_ul {
                break;
            }
            self.pending_msg3.pop_front();

            let ue = SimUe::new(
                UeConfig {
                    rnti: msg3.rnti.value(),
                    aggregation: self.cfg.common_aggregation,
                    mcs: MSG3_MCS,
                    dl_rbgs: 1,
                    ul_prbs: MSG3_PRBS,
                    ul_bler: 0.0,
                    sr: None,
                },
                &self.params,
            );
            match self.sched.alloc_ul_msg3(&ue, msg3.alloc, MSG3_MCS) {
                Ok(()) => {
                    // contention resolved, the user stays connected
                    if self.ues.len() < MAX_UES {
                        self.generator.add_user(&ue);
                        self.ues.push(ue);
                    }
                }
                Err(e) => {
                    warn!("Cell {}: Msg3 rnti={} lost: {}", self.cfg.cell_id, msg3.rnti, e);
                    self.stats.count_error(&e);
                }
            }
        }
    }

    fn schedule_ul(&mut self) {
        let tti_tx_ul = self.sched.tti_params().tti_tx_ul;
        for ue in &self.ues {
            // users admitted by their Msg3 in this TTI
            if self.sched.is_ul_alloc(ue.rnti()) {
                continue;
            }
            let retx = ue.pending_ul_retx(tti_tx_ul);
            let len = retx.map_or(ue.config().ul_prbs, |r| r.len);
            if len == 0 {
                continue;
            }

            // Non-adaptive retransmissions keep their PRBs when they are free
            let mut result = match retx {
                Some(range) => self.sched.alloc_ul_user(ue, range),
                None => Err(AllocError::RbCollision),
            };
            if result == Err(AllocError::RbCollision) {
                result = match first_free_run(self.sched.tti_grid().ul_mask(), len) {
                    Some((start, end)) => self.sched.alloc_ul_user(ue, PrbRange::new(start, end - start)),
                    None => Err(AllocError::RbCollision),
                };
            }
            if let Err(e) = result {
                debug!("Cell {}: UL rnti={} not scheduled: {}", self.cfg.cell_id, ue.rnti(), e);
                self.stats.count_error(&e);
            }
        }
    }

    /// Draw HARQ feedback for this TTI's uplink transmissions
    fn update_ul_harq(&mut self, result: &SchedResult) {
        let tti_tx_ul = result.tti.tti_tx_ul;
        for ue in &mut self.ues {
            let Some(pusch) = result.ul_data.iter().find(|p| p.dci.rnti == ue.rnti()) else {
                if ue.ul_harq.map_or(false, |h| h.tti_tx_ul == tti_tx_ul) {
                    // retransmission missed its occasion
                    ue.ul_harq = None;
                }
                continue;
            };
            let tx_cnt = match ue.ul_harq {
                Some(h) if pusch.kind.is_retx() => h.retx_cnt + 1,
                _ => 1,
            };
            let bler = ue.config().ul_bler;
            let nack = bler > 0.0 && self.rng.gen_bool(bler);

            ue.ul_harq = if nack && tx_cnt < MAX_UL_TX && !pusch.kind.is_msg3() {
                self.generator.set_ul_retx(ue.rnti(), tx_cnt);
                Some(UlHarq {
                    tti_tx_ul: tti_add(tti_tx_ul, UL_HARQ_RTT),
                    alloc: pusch.prb,
                    retx_cnt: tx_cnt,
                })
            } else {
                None
            };
        }
    }
}

fn next_temp_crnti(rnti: u16) -> u16 {
    match rnti {
        LAST_TEMP_CRNTI => FIRST_TEMP_CRNTI,
        rnti => rnti + 1,
    }
}

/// First run of `n` free positions in a mask, as `[start, end)`
fn first_free_run(mask: &BoundedBitset, n: u32) -> Option<(u32, u32)> {
    let mut run_start = 0;
    for idx in 0..mask.len() {
        if mask.test(idx) {
            run_start = idx + 1;
        } else if idx + 1 - run_start == n {
            return Some((run_start, idx + 1));
        }
    }
    None
}

/// One dumped TTI
#[derive(Serialize)]
struct DumpRecord<'a> {
    cell_id: CellId,
    #[serde(flatten)]
    result: &'a SchedResult,
}

/// Drive a carrier once per millisecond until stopped or `max_ttis` are done
pub async fn run_carrier(
    mut carrier: Carrier,
    max_ttis: u64,
    running: Arc<RwLock<bool>>,
    dump: Option<mpsc::Sender<String>>,
) -> anyhow::Result<CarrierStats> {
    let mut interval = tokio::time::interval(Duration::from_millis(1));

    while *running.read().await {
        interval.tick().await;
        let result = carrier.run_tti()?;

        if let Some(tx) = &dump {
            let line = serde_json::to_string(&DumpRecord { cell_id: carrier.cell_id(), result: &result })?;
            if tx.send(line).await.is_err() {
                warn!("Cell {}: dump writer closed", carrier.cell_id());
            }
        }

        if max_ttis > 0 && carrier.stats().nof_ttis >= max_ttis {
            break;
        }
    }

    info!("Cell {}: stopped after {} TTIs", carrier.cell_id(), carrier.stats().nof_ttis);
    Ok(carrier.stats().clone())
}
