//! Common Types for the LTE eNodeB MAC
//!
//! Defines fundamental types used throughout the scheduler

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// System Information RNTI
    pub const SI: Self = Self(0xFFFF);
    /// Paging RNTI
    pub const P: Self = Self(0xFFFE);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// RA-RNTI addressing the response to a preamble received at `prach_tti`
    ///
    /// RA-RNTI = 1 + t_id + 10 * f_id, with f_id = 0 for FDD.
    pub fn ra_rnti(prach_tti: u32) -> Self {
        Self(1 + (prach_tti % 10) as u16)
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CellId(pub u16);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LTE channel bandwidths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    /// 1.4 MHz
    Bw1_4,
    /// 3 MHz
    Bw3,
    /// 5 MHz
    Bw5,
    /// 10 MHz
    Bw10,
    /// 15 MHz
    Bw15,
    /// 20 MHz
    Bw20,
}

impl Bandwidth {
    /// Number of physical resource blocks in the channel
    pub fn nof_prb(&self) -> u32 {
        match self {
            Bandwidth::Bw1_4 => 6,
            Bandwidth::Bw3 => 15,
            Bandwidth::Bw5 => 25,
            Bandwidth::Bw10 => 50,
            Bandwidth::Bw15 => 75,
            Bandwidth::Bw20 => 100,
        }
    }

    /// Bandwidth for a PRB count, if it is one of the standard ones
    pub fn from_nof_prb(nof_prb: u32) -> Option<Self> {
        match nof_prb {
            6 => Some(Bandwidth::Bw1_4),
            15 => Some(Bandwidth::Bw3),
            25 => Some(Bandwidth::Bw5),
            50 => Some(Bandwidth::Bw10),
            75 => Some(Bandwidth::Bw15),
            100 => Some(Bandwidth::Bw20),
            _ => None,
        }
    }
}

/// PDCCH aggregation level, stored as log2 of the CCE count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum AggregationLevel {
    /// 1 CCE
    L1 = 0,
    /// 2 CCEs
    L2 = 1,
    /// 4 CCEs
    L4 = 2,
    /// 8 CCEs
    L8 = 3,
}

impl AggregationLevel {
    pub const ALL: [AggregationLevel; 4] = [
        AggregationLevel::L1,
        AggregationLevel::L2,
        AggregationLevel::L4,
        AggregationLevel::L8,
    ];

    /// log2 of the CCE count, used to index candidate tables
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Number of CCEs consumed by one DCI at this level
    pub fn nof_cces(&self) -> u32 {
        1 << (*self as u32)
    }
}

/// Contiguous range of resource block groups, `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RbgRange {
    pub start: u32,
    pub end: u32,
}

impl RbgRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for RbgRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.start, self.end)
    }
}

/// Contiguous range of physical resource blocks given as start and length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrbRange {
    pub start: u32,
    pub len: u32,
}

impl PrbRange {
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// One past the last PRB, saturating at `u32::MAX`
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.len)
    }

    /// True when the range lies within the first `nof_prb` PRBs
    pub fn fits(&self, nof_prb: u32) -> bool {
        self.start <= nof_prb && self.len <= nof_prb - self.start
    }

    /// PRBs covered by an RBG range with group size `p`, clipped to the carrier
    pub fn from_rbg_range(rbgs: RbgRange, p: u32, nof_prb: u32) -> Self {
        let start = (rbgs.start * p).min(nof_prb);
        let end = (rbgs.end * p).min(nof_prb);
        Self { start, len: end - start }
    }
}

impl fmt::Display for PrbRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.start, self.end())
    }
}
