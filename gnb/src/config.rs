//! Driver Configuration
//!
//! Cells, simulated users and synthetic traffic for the scheduler driver.
//! Loaded from YAML, or TOML when the file name ends in `.toml`.

use common::{AggregationLevel, CellId};
use layers::mac::SchedConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    /// One entry per carrier
    pub cells: Vec<CellConfig>,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Carrier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Cell identity
    pub cell_id: CellId,
    /// Scheduler grid parameters
    pub sched: SchedConfig,
    /// CFI every TTI starts with
    #[serde(default = "default_start_cfi")]
    pub start_cfi: u32,
    /// Aggregation level of broadcast, paging and RAR DCIs
    #[serde(default = "default_common_aggregation")]
    pub common_aggregation: AggregationLevel,
    /// Paging occasion period in TTIs, 0 disables paging
    #[serde(default)]
    pub paging_period: u32,
    /// Paging message length in bytes
    #[serde(default = "default_paging_len")]
    pub paging_len: u32,
    /// Probability of a PRACH detection in a TTI
    #[serde(default)]
    pub prach_prob: f64,
    /// Users attached at start
    #[serde(default)]
    pub ues: Vec<UeConfig>,
}

fn default_start_cfi() -> u32 {
    1
}

fn default_common_aggregation() -> AggregationLevel {
    AggregationLevel::L4
}

fn default_paging_len() -> u32 {
    10
}

/// Simulated user
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeConfig {
    pub rnti: u16,
    /// Aggregation level of the user's DCIs
    #[serde(default = "default_ue_aggregation")]
    pub aggregation: AggregationLevel,
    /// MCS used for data
    #[serde(default = "default_mcs")]
    pub mcs: u32,
    /// Contiguous RBGs requested per downlink grant, 0 disables downlink
    #[serde(default)]
    pub dl_rbgs: u32,
    /// Contiguous PRBs requested per uplink grant, 0 disables uplink
    #[serde(default)]
    pub ul_prbs: u32,
    /// Probability that an uplink transmission is NACKed
    #[serde(default)]
    pub ul_bler: f64,
    /// Scheduling request configuration
    #[serde(default)]
    pub sr: Option<SrConfig>,
}

fn default_ue_aggregation() -> AggregationLevel {
    AggregationLevel::L2
}

fn default_mcs() -> u32 {
    10
}

/// PUCCH resources of a user with scheduling requests configured
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SrConfig {
    /// SR periodicity in TTIs
    pub period: u32,
    /// SR subframe offset
    pub offset: u32,
    /// PUCCH resource of the SR
    pub n_pucch_sr: u32,
    /// Offset of the dynamic HARQ ACK resources
    pub n1_pucch_an: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default log level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write every finalized TTI as a JSON line to this file
    pub dump_file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), dump_file: None }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DriverConfig {
    /// Load configuration from a YAML or TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let is_toml = Path::new(path).extension().map_or(false, |ext| ext == "toml");
        if is_toml {
            Self::from_toml_str(&contents)
        } else {
            Self::from_yaml_str(&contents)
        }
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: DriverConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: DriverConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.cells.is_empty() {
            return Err(anyhow::anyhow!("No cells configured"));
        }
        for cell in &self.cells {
            if !(1..=3).contains(&cell.start_cfi) {
                return Err(anyhow::anyhow!("Cell {}: invalid start_cfi {}", cell.cell_id, cell.start_cfi));
            }
            if !(0.0..=1.0).contains(&cell.prach_prob) {
                return Err(anyhow::anyhow!("Cell {}: prach_prob outside [0,1]", cell.cell_id));
            }
            for ue in &cell.ues {
                if ue.rnti < 0x46 || ue.rnti >= 0xFFF4 {
                    return Err(anyhow::anyhow!("Cell {}: invalid C-RNTI 0x{:x}", cell.cell_id, ue.rnti));
                }
                if !(0.0..=1.0).contains(&ue.ul_bler) {
                    return Err(anyhow::anyhow!("Cell {}: ul_bler outside [0,1]", cell.cell_id));
                }
                if ue.sr.map_or(false, |sr| sr.period == 0) {
                    return Err(anyhow::anyhow!("Cell {}: zero SR period for 0x{:x}", cell.cell_id, ue.rnti));
                }
            }
        }
        Ok(())
    }
}
