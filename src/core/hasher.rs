use kaspa_hashes::{BlockHash, HasherBase};
use num_bigint::BigUint;
use num_traits::{Num, ToPrimitive, Zero};
use once_cell::sync::Lazy;

/// Maximum target value: 2^224 - 1, the difficulty-1 target for Kaspa's PoW.
const MAX_TARGET_HEX: &str = "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF";

static MAX_TARGET: Lazy<BigUint> = Lazy::new(|| <BigUint as Num>::from_str_radix(MAX_TARGET_HEX, 16).unwrap());

/// minHash = 2^256 / maxTarget, computed exactly then converted to f64.
static MIN_HASH: Lazy<f64> = Lazy::new(|| {
    let two_256 = BigUint::from(1u8) << 256u32;
    (two_256 / &*MAX_TARGET).to_f64().unwrap_or(0.0)
});

const BIG_GIG: f64 = 1_000_000_000.0;

/// Kaspa difficulty representation: a stratum difficulty and its derived target/hashrate.
#[derive(Debug, Clone)]
pub struct KaspaDiff {
    pub hash_value: f64,
    pub diff_value: f64,
    pub target_value: BigUint,
}

impl Default for KaspaDiff {
    fn default() -> Self {
        Self { hash_value: 0.0, diff_value: 0.0, target_value: BigUint::zero() }
    }
}

impl KaspaDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_diff_value(&mut self, diff: f64) {
        self.diff_value = diff;
        self.target_value = diff_to_target(diff);
        self.hash_value = diff_to_hash(diff);
    }

    /// Same as [`Self::set_diff_value`]; the miner application name is accepted
    /// for call-site symmetry with the job-formatting path but all miner types
    /// currently share one difficulty calculation.
    pub fn set_diff_value_for_miner(&mut self, diff: f64, _remote_app: &str) {
        self.set_diff_value(diff);
    }
}

/// Convert a stratum difficulty to a target: target = maxTarget / diff.
///
/// Computed with a fixed-point scale factor rather than f64 division throughout,
/// since maxTarget / diff can span hundreds of bits.
pub fn diff_to_target(diff: f64) -> BigUint {
    if diff <= 0.0 {
        return MAX_TARGET.clone();
    }

    const SCALE: u128 = 1_000_000_000_000_000_000;
    let diff_scaled = BigUint::from((diff * SCALE as f64) as u128);
    if diff_scaled.is_zero() {
        return MAX_TARGET.clone();
    }

    (&*MAX_TARGET * BigUint::from(SCALE)) / diff_scaled
}

/// Convert a stratum difficulty to an expected hashes-to-find-a-share value.
pub fn diff_to_hash(diff: f64) -> f64 {
    (*MIN_HASH * diff) / BIG_GIG
}

/// Serialize a block header into its pre-PoW hash (timestamp and nonce zeroed).
pub fn serialize_block_header(block: &kaspa_consensus_core::block::Block) -> Result<kaspa_hashes::Hash, Box<dyn std::error::Error>> {
    let header = &block.header;
    let mut hasher = BlockHash::new();

    hasher.update(header.version.to_le_bytes());

    let expanded_len = header.parents_by_level.expanded_len();
    hasher.update((expanded_len as u64).to_le_bytes());

    for level in header.parents_by_level.expanded_iter() {
        hasher.update((level.len() as u64).to_le_bytes());
        for parent in level {
            hasher.update(parent);
        }
    }

    hasher.update(header.hash_merkle_root).update(header.accepted_id_merkle_root).update(header.utxo_commitment);

    // TS and Nonce are zeroed in the pre-PoW hash; the miner fills them in.
    hasher.update(0u64.to_le_bytes());
    hasher.update(header.bits.to_le_bytes());
    hasher.update(0u64.to_le_bytes());
    hasher.update(header.daa_score.to_le_bytes());
    hasher.update(header.blue_score.to_le_bytes());

    let be_bytes = header.blue_work.to_be_bytes();
    let start = be_bytes.iter().copied().position(|byte| byte != 0).unwrap_or(be_bytes.len());
    let blue_work_bytes = &be_bytes[start..];
    hasher.update((blue_work_bytes.len() as u64).to_le_bytes());
    hasher.update(blue_work_bytes);

    hasher.update(header.pruning_point);

    Ok(hasher.finalize())
}

/// Generate IceRiver-compatible job params: hash (64 hex chars) + timestamp LE (16 hex chars).
pub fn generate_iceriver_job_params(pre_pow_hash: &kaspa_hashes::Hash, timestamp: u64) -> String {
    let hash_hex = pre_pow_hash.to_string();
    let timestamp_hex = hex::encode(timestamp.to_le_bytes());
    format!("{}{}", hash_hex, timestamp_hex)
}

/// Generate BzMiner-compatible job params: 4 big-endian u64 header words plus a
/// byte-swapped timestamp, all rendered as one 80-char hex string.
pub fn generate_large_job_params(header_data: &[u8], timestamp: u64) -> String {
    let mut ids = Vec::new();

    for i in 0..4 {
        let offset = i * 8;
        if offset + 8 <= header_data.len() {
            let bytes = &header_data[offset..offset + 8];
            let value = u64::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]);
            ids.push(value);
        }
    }

    let timestamp_be = timestamp.to_be_bytes();
    let timestamp_swapped = u64::from_le_bytes(timestamp_be);
    ids.push(timestamp_swapped);

    format!("{:016x}{:016x}{:016x}{:016x}{:016x}", ids[0], ids[1], ids[2], ids[3], ids[4])
}

/// Generate legacy/Bitmain job params: 4 little-endian u64 header words.
pub fn generate_job_header(header_data: &[u8]) -> Vec<u64> {
    let mut ids = Vec::new();
    for i in 0..4 {
        let offset = i * 8;
        if offset + 8 <= header_data.len() {
            let bytes = &header_data[offset..offset + 8];
            let value = u64::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]);
            ids.push(value);
        }
    }
    ids
}

/// Decode a compact "bits" value into its full target.
///
/// Bits layout: top byte is the exponent, low 3 bytes are the mantissa;
/// target = mantissa << 8*(exponent-3) for exponent > 3, mantissa >> 8*(3-exponent) otherwise.
pub fn calculate_target(bits: u64) -> BigUint {
    let exponent = bits >> 24;
    let mantissa = bits & 0xFFFFFF;

    let (mantissa, exponent) = if exponent <= 3 {
        let shift = 8 * (3 - exponent);
        (mantissa >> shift, 0u32)
    } else {
        (mantissa, (8 * (exponent - 3)) as u32)
    };

    let mut target = BigUint::from(mantissa);
    target <<= exponent;
    target
}

/// Convert a big (target-space) difficulty into a plain f64 difficulty.
///
/// numerator = 2^255 (one bit above the sign-free 254-bit midpoint used by some
/// miner firmwares) divided by the target, further divided by 2^31 to land the
/// result in the same scale miners expect from `set_difficulty`.
pub fn big_diff_to_little(diff: &BigUint) -> f64 {
    let numerator = BigUint::from(1u8) << 255u32;
    let numerator_f = numerator.to_f64().unwrap_or(0.0);
    let diff_f = diff.to_f64().unwrap_or(1.0);

    let result = numerator_f / diff_f;
    result / 2.0_f64.powi(31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_to_target_is_max_target_at_diff_one() {
        let target = diff_to_target(1.0);
        assert_eq!(target, *MAX_TARGET);
    }

    #[test]
    fn diff_to_target_halves_for_doubled_difficulty() {
        let target_8192 = diff_to_target(8192.0);
        let expected = &*MAX_TARGET >> 13u32;
        assert_eq!(target_8192, expected);
        assert!(target_8192 < *MAX_TARGET);
    }

    #[test]
    fn calculate_target_matches_bitcoin_style_compact_bits() {
        let bits = 0x1d00ffffu64;
        let target = calculate_target(bits);
        let expected = BigUint::from(0xffffu64) << 208u32;
        assert_eq!(target, expected);
    }

    #[test]
    fn calculate_target_handles_small_exponent() {
        let devnet_bits = 505527324u64; // 0x1e21bc1c
        let devnet_target = calculate_target(devnet_bits);
        let expected_devnet = BigUint::from(0x21bc1cu64) << 216u32;
        assert_eq!(devnet_target, expected_devnet);

        assert!(BigUint::from(1u32) < devnet_target);
        assert!((BigUint::from(1u32) << 255u32) > devnet_target);
    }

    #[test]
    fn min_hash_is_close_to_two_pow_32() {
        assert!((*MIN_HASH - 2f64.powi(32)).abs() < 1.0);
    }
}
