//! Resource Allocation Helpers
//!
//! Transport block sizes, resource indication values, RBG sizing and DCI
//! payload sizes according to 3GPP TS 36.213 and TS 36.212 (FDD).

use super::dci::DciFormat;

/// Highest I_TBS usable with DCI format 1A on common channels
pub const MAX_I_TBS_FORMAT1A: u32 = 26;

/// TS 36.213 Table 7.1.7.2.1-1, columns N_PRB = 1, 2, 3
const TBS_TABLE_LOW_PRB: [[u32; 3]; 27] = [
    [16, 32, 56],
    [24, 56, 88],
    [32, 72, 144],
    [40, 104, 176],
    [56, 120, 208],
    [72, 144, 224],
    [88, 176, 256],
    [104, 224, 328],
    [120, 256, 392],
    [136, 296, 456],
    [144, 328, 504],
    [176, 376, 584],
    [208, 440, 680],
    [224, 488, 744],
    [256, 552, 840],
    [280, 600, 904],
    [328, 632, 968],
    [336, 696, 1064],
    [376, 776, 1160],
    [408, 840, 1288],
    [440, 904, 1384],
    [488, 1000, 1480],
    [520, 1064, 1608],
    [552, 1128, 1736],
    [584, 1192, 1800],
    [616, 1256, 1864],
    [712, 1480, 2216],
];

/// Transport block size in bits for `i_tbs` over `n_prb` PRBs
///
/// Only the narrow allocations used by format 1A grants (1 to 3 PRBs) are tabulated.
pub fn tbs_from_idx(i_tbs: u32, n_prb: u32) -> Option<u32> {
    if !(1..=3).contains(&n_prb) {
        return None;
    }
    TBS_TABLE_LOW_PRB
        .get(i_tbs as usize)
        .map(|row| row[(n_prb - 1) as usize])
}

/// Resource indication value of a contiguous allocation (TS 36.213 7.1.6.3)
pub fn riv(l_crb: u32, rb_start: u32, nof_prb: u32) -> u32 {
    debug_assert!(l_crb >= 1 && rb_start + l_crb <= nof_prb);
    if l_crb <= nof_prb / 2 + 1 {
        nof_prb * (l_crb - 1) + rb_start
    } else {
        nof_prb * (nof_prb - l_crb + 1) + (nof_prb - 1 - rb_start)
    }
}

/// Inverse of [`riv`], returning `(rb_start, l_crb)`
pub fn riv_to_alloc(riv: u32, nof_prb: u32) -> (u32, u32) {
    let l_crb = riv / nof_prb + 1;
    let rb_start = riv % nof_prb;
    if rb_start + l_crb > nof_prb {
        (nof_prb - rb_start - 1, nof_prb - l_crb + 2)
    } else {
        (rb_start, l_crb)
    }
}

/// Resource block group size P for a carrier (TS 36.213 Table 7.1.6.1-1)
pub fn rbg_size(nof_prb: u32) -> u32 {
    match nof_prb {
        0..=10 => 1,
        11..=26 => 2,
        27..=63 => 3,
        _ => 4,
    }
}

/// Number of resource block groups for a carrier and group size
pub fn nof_rbgs(nof_prb: u32, p: u32) -> u32 {
    (nof_prb + p - 1) / p
}

fn ceil_log2(x: u32) -> u32 {
    if x <= 1 {
        0
    } else {
        32 - (x - 1).leading_zeros()
    }
}

/// Payload sizes that need an extra padding bit (TS 36.212 Table 5.3.3.1.2-1)
const AMBIGUOUS_SIZES: [u32; 10] = [12, 14, 16, 20, 24, 26, 32, 40, 44, 56];

fn riv_bits(nof_prb: u32) -> u32 {
    ceil_log2(nof_prb * (nof_prb + 1) / 2)
}

fn format0_unpadded(nof_prb: u32) -> u32 {
    // flag, hopping, RIV, MCS/RV, NDI, TPC, cyclic shift, CQI request
    1 + 1 + riv_bits(nof_prb) + 5 + 1 + 2 + 3 + 1
}

fn format1a_unpadded(nof_prb: u32) -> u32 {
    // flag, localized/distributed, RIV, MCS, HARQ, NDI, RV, TPC
    1 + 1 + riv_bits(nof_prb) + 5 + 3 + 1 + 2 + 2
}

/// Size in bits of formats 0 and 1A, which are padded to the same length
fn format0_1a_size(nof_prb: u32) -> u32 {
    let mut n = format0_unpadded(nof_prb).max(format1a_unpadded(nof_prb));
    if AMBIGUOUS_SIZES.contains(&n) {
        n += 1;
    }
    n
}

/// DCI payload size in bits for an FDD carrier
pub fn dci_format_size(format: DciFormat, nof_prb: u32, nof_rbgs: u32) -> u32 {
    match format {
        DciFormat::Format0 | DciFormat::Format1A => format0_1a_size(nof_prb),
        DciFormat::Format1 => {
            let header = if nof_prb > 10 { 1 } else { 0 };
            // header, bitmap, MCS, HARQ, NDI, RV, TPC
            let mut n = header + nof_rbgs + 5 + 3 + 1 + 2 + 2;
            let size_1a = format0_1a_size(nof_prb);
            while n == size_1a || AMBIGUOUS_SIZES.contains(&n) {
                n += 1;
            }
            n
        }
    }
}
