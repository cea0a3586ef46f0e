//! Scheduler Parameters
//!
//! Cell-wide constants shared by every TTI grid of a carrier. Built once
//! from [`SchedConfig`] and passed explicitly to the grids.

use super::pdcch_grid::DciLocations;
use super::ra;
use crate::LayerError;
use common::{AggregationLevel, BoundedBitset, Bandwidth};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum PRBs of an LTE carrier
pub const MAX_PRB: u32 = 110;

/// System information block configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SibConfig {
    /// Payload length in bytes
    pub len: u32,
    /// Periodicity in radio frames
    pub period_rf: u32,
}

/// Random access response candidates of one aggregation level in one subframe
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RarSearchSpaceConfig {
    pub cfi: u32,
    /// Subframe index 0..9
    pub sf_idx: u32,
    pub aggregation: AggregationLevel,
    /// First CCE of each candidate
    pub ncce: Vec<u32>,
}

/// Scheduler configuration for one carrier
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedConfig {
    /// Number of PRBs in the carrier
    pub nof_prb: u32,
    /// Number of CCEs available for CFI 1, 2 and 3
    pub nof_cce: [u32; 3],
    /// RBG size override; derived from the bandwidth when absent
    #[serde(default)]
    pub rbg_size: Option<u32>,
    /// System information blocks, SIB1 first
    #[serde(default)]
    pub sibs: Vec<SibConfig>,
    /// Upper bound on PDCCH combinations kept per allocation round
    #[serde(default = "default_max_pdcch_combinations")]
    pub max_pdcch_combinations: usize,
    /// RAR search space overrides; subframes not listed use the common search space
    #[serde(default)]
    pub rar_search_space: Vec<RarSearchSpaceConfig>,
}

fn default_max_pdcch_combinations() -> usize {
    64
}

/// Validated scheduler parameters
#[derive(Debug, Clone)]
pub struct SchedParams {
    /// Number of PRBs in the carrier
    pub nof_prb: u32,
    /// RBG size
    pub p: u32,
    /// Number of RBGs
    pub nof_rbgs: u32,
    /// Number of CCEs per CFI (index CFI - 1)
    pub nof_cce_table: [u32; 3],
    /// System information blocks
    pub sibs: Vec<SibConfig>,
    /// Upper bound on PDCCH combinations kept per allocation round
    pub max_pdcch_combinations: usize,
    common_locations: [DciLocations; 3],
    rar_locations: [[DciLocations; 10]; 3],
}

impl SchedParams {
    /// Validate a configuration and derive the per-cell tables
    pub fn new(cfg: &SchedConfig) -> Result<Self, LayerError> {
        if cfg.nof_prb == 0 || cfg.nof_prb > MAX_PRB {
            return Err(LayerError::InvalidConfiguration(format!(
                "nof_prb={} outside 1..={}",
                cfg.nof_prb, MAX_PRB
            )));
        }
        if Bandwidth::from_nof_prb(cfg.nof_prb).is_none() {
            warn!("nof_prb={} is not a standard LTE bandwidth", cfg.nof_prb);
        }
        for (cfix, &nof_cce) in cfg.nof_cce.iter().enumerate() {
            if nof_cce == 0 || nof_cce > BoundedBitset::MAX_BITS {
                return Err(LayerError::InvalidConfiguration(format!(
                    "nof_cce={} for CFI {} outside 1..={}",
                    nof_cce,
                    cfix + 1,
                    BoundedBitset::MAX_BITS
                )));
            }
        }
        if cfg.max_pdcch_combinations == 0 {
            return Err(LayerError::InvalidConfiguration(
                "max_pdcch_combinations must be positive".into(),
            ));
        }

        let p = cfg.rbg_size.unwrap_or_else(|| ra::rbg_size(cfg.nof_prb));
        if !(1..=4).contains(&p) {
            return Err(LayerError::InvalidConfiguration(format!("RBG size {} outside 1..=4", p)));
        }
        let nof_rbgs = ra::nof_rbgs(cfg.nof_prb, p);

        for (idx, sib) in cfg.sibs.iter().enumerate() {
            if sib.period_rf == 0 {
                return Err(LayerError::InvalidConfiguration(format!(
                    "SIB{} has zero periodicity",
                    idx + 1
                )));
            }
        }

        let common_locations = cfg.nof_cce.map(DciLocations::common);
        let rar_locations = common_locations.map(|locs| [locs; 10]);

        debug!(
            "Scheduler params: nof_prb={}, P={}, nof_rbgs={}, nof_cce={:?}",
            cfg.nof_prb, p, nof_rbgs, cfg.nof_cce
        );

        let mut params = Self {
            nof_prb: cfg.nof_prb,
            p,
            nof_rbgs,
            nof_cce_table: cfg.nof_cce,
            sibs: cfg.sibs.clone(),
            max_pdcch_combinations: cfg.max_pdcch_combinations,
            common_locations,
            rar_locations,
        };
        params.apply_rar_search_space(&cfg.rar_search_space)?;
        Ok(params)
    }

    /// Replace the RAR tables of the configured (CFI, subframe) pairs
    fn apply_rar_search_space(&mut self, entries: &[RarSearchSpaceConfig]) -> Result<(), LayerError> {
        let mut tables: Vec<(u32, u32, DciLocations)> = Vec::new();
        for entry in entries {
            if !(1..=3).contains(&entry.cfi) || entry.sf_idx >= 10 {
                return Err(LayerError::InvalidConfiguration(format!(
                    "RAR search space for CFI {} subframe {} out of range",
                    entry.cfi, entry.sf_idx
                )));
            }
            let nof_cce = self.nof_cces(entry.cfi);
            let l = entry.aggregation.nof_cces();
            let idx = match tables.iter().position(|(cfi, sf, _)| *cfi == entry.cfi && *sf == entry.sf_idx) {
                Some(idx) => idx,
                None => {
                    tables.push((entry.cfi, entry.sf_idx, DciLocations::new()));
                    tables.len() - 1
                }
            };
            for &ncce in &entry.ncce {
                if ncce % l != 0 || ncce + l > nof_cce || !tables[idx].2.push(entry.aggregation, ncce) {
                    return Err(LayerError::InvalidConfiguration(format!(
                        "invalid RAR candidate ncce={} at {:?} for CFI {} subframe {}",
                        ncce, entry.aggregation, entry.cfi, entry.sf_idx
                    )));
                }
            }
        }
        for (cfi, sf_idx, locations) in tables {
            debug!("RAR search space CFI {} subframe {}: {:?}", cfi, sf_idx, locations);
            self.set_rar_locations(cfi, sf_idx, locations);
        }
        Ok(())
    }

    fn cfix(cfi: u32) -> usize {
        debug_assert!((1..=3).contains(&cfi));
        (cfi.clamp(1, 3) - 1) as usize
    }

    /// Number of CCEs in the control region for `cfi`
    pub fn nof_cces(&self, cfi: u32) -> u32 {
        self.nof_cce_table[Self::cfix(cfi)]
    }

    /// Common search space used by broadcast and paging
    pub fn common_locations(&self, cfi: u32) -> &DciLocations {
        &self.common_locations[Self::cfix(cfi)]
    }

    /// Search space for random access responses in subframe `sf_idx`
    pub fn rar_locations(&self, cfi: u32, sf_idx: u32) -> &DciLocations {
        &self.rar_locations[Self::cfix(cfi)][(sf_idx % 10) as usize]
    }

    /// Replace the random access response search space of one subframe
    pub fn set_rar_locations(&mut self, cfi: u32, sf_idx: u32, locations: DciLocations) {
        self.rar_locations[Self::cfix(cfi)][(sf_idx % 10) as usize] = locations;
    }

    /// Payload length of a SIB, in bytes
    pub fn sib_len(&self, sib_idx: u32) -> Option<u32> {
        self.sibs.get(sib_idx as usize).map(|sib| sib.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregationLevel;

    fn config() -> SchedConfig {
        SchedConfig {
            nof_prb: 25,
            nof_cce: [6, 12, 20],
            rbg_size: None,
            sibs: vec![SibConfig { len: 17, period_rf: 8 }],
            max_pdcch_combinations: 64,
            rar_search_space: vec![],
        }
    }

    #[test]
    fn test_derived_values() {
        let params = SchedParams::new(&config()).unwrap();
        assert_eq!(params.p, 2);
        assert_eq!(params.nof_rbgs, 13);
        assert_eq!(params.nof_cces(2), 12);
        assert_eq!(params.sib_len(0), Some(17));
        assert_eq!(params.sib_len(1), None);
    }

    #[test]
    fn test_common_search_space_limited_by_cces() {
        let params = SchedParams::new(&config()).unwrap();
        // 6 CCEs: one L4 candidate, no L8 candidate
        assert_eq!(params.common_locations(1).candidates(AggregationLevel::L4), &[0]);
        assert!(params.common_locations(1).candidates(AggregationLevel::L8).is_empty());
        // 20 CCEs: common space is capped at 16 CCEs
        assert_eq!(params.common_locations(3).candidates(AggregationLevel::L4), &[0, 4, 8, 12]);
        assert_eq!(params.common_locations(3).candidates(AggregationLevel::L8), &[0, 8]);
        assert_eq!(params.rar_locations(3, 7), params.common_locations(3));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config();
        cfg.nof_prb = 111;
        assert!(SchedParams::new(&cfg).is_err());

        let mut cfg = config();
        cfg.nof_cce = [0, 12, 20];
        assert!(SchedParams::new(&cfg).is_err());

        let mut cfg = config();
        cfg.sibs[0].period_rf = 0;
        assert!(SchedParams::new(&cfg).is_err());
    }

    #[test]
    fn test_rar_search_space_override() {
        let mut cfg = config();
        cfg.rar_search_space = vec![
            RarSearchSpaceConfig { cfi: 2, sf_idx: 3, aggregation: AggregationLevel::L4, ncce: vec![8] },
            RarSearchSpaceConfig { cfi: 2, sf_idx: 3, aggregation: AggregationLevel::L8, ncce: vec![0] },
        ];
        let params = SchedParams::new(&cfg).unwrap();
        let locs = params.rar_locations(2, 3);
        assert_eq!(locs.candidates(AggregationLevel::L4), &[8]);
        assert_eq!(locs.candidates(AggregationLevel::L8), &[0]);
        // other subframes and CFIs keep the common search space
        assert_eq!(params.rar_locations(2, 4), params.common_locations(2));
        assert_eq!(params.rar_locations(1, 3), params.common_locations(1));
    }

    #[test]
    fn test_invalid_rar_search_space_rejected() {
        let entry = |cfi, sf_idx, ncce| RarSearchSpaceConfig {
            cfi,
            sf_idx,
            aggregation: AggregationLevel::L4,
            ncce: vec![ncce],
        };
        for bad in [entry(4, 0, 0), entry(1, 10, 0), entry(1, 0, 4), entry(2, 0, 2)] {
            let mut cfg = config();
            cfg.rar_search_space = vec![bad];
            assert!(SchedParams::new(&cfg).is_err());
        }
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = "nof_prb: 50\nnof_cce: [13, 29, 45]\nsibs:\n  - len: 18\n    period_rf: 8\n";
        let cfg: SchedConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.max_pdcch_combinations, 64);
        let params = SchedParams::new(&cfg).unwrap();
        assert_eq!(params.p, 3);
        assert_eq!(params.nof_rbgs, 17);
    }
}
