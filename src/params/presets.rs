use std::sync::Arc;

use crate::error::Result;
use crate::params::{BfvParams, BfvParamsBuilder, CkksParams};

/// NTT-friendly primes: q ≡ 1 (mod 2n) for every ring degree used here.
/// All are < 2^60 so the lazy key-switching accumulation stays in a word.

/// 40-bit prime, ≡ 1 mod 2048.
pub const PRIME_40: u64 = 1099509805057;
/// 50-bit prime, ≡ 1 mod 2048.
pub const PRIME_50: u64 = 562949953443841;
/// 55-bit prime, ≡ 1 mod 2048.
pub const PRIME_55: u64 = 18014398509998081;
/// 56-bit prime, ≡ 1 mod 2048.
pub const PRIME_56: u64 = 36028797018972161;
/// 60-bit prime, ≡ 1 mod 2048.
pub const PRIME_60: u64 = 1152921504606830593;

/// Tiny BFV parameters matching the evaluator's reference scenarios:
/// n=8, t=65537 (so the slot rows are two rows of four), two-prime Q and a
/// comfortably oversized P. β=8 keeps key-switching noise far below Δ/2.
pub fn toy_bfv() -> Result<Arc<BfvParams>> {
    BfvParamsBuilder::new()
        .ring_degree(8)
        .plain_modulus(65537)
        .ct_moduli(vec![PRIME_40, PRIME_50])
        .aux_moduli(vec![PRIME_60, PRIME_56])
        .sigma(3.2)
        .bit_decomp(8)
        .build()
}

/// Compact BFV parameters for tests and benches: n=1024, t=65537.
pub fn compact_bfv() -> Result<Arc<BfvParams>> {
    BfvParamsBuilder::new()
        .ring_degree(1024)
        .plain_modulus(65537)
        .ct_moduli(vec![PRIME_40, PRIME_50])
        .aux_moduli(vec![PRIME_60, PRIME_56])
        .sigma(3.2)
        .bit_decomp(16)
        .build()
}

/// Tiny CKKS parameters for encoder tests: n=16, Δ=2^30, three-level chain
/// with a 60-bit q_0 so decoded coefficients stay below q_0/2.
pub fn toy_ckks() -> Result<Arc<CkksParams>> {
    CkksParams::new(
        16,
        vec![PRIME_60, PRIME_40, PRIME_50],
        (1u64 << 30) as f64,
        3.2,
    )
}

/// Compact CKKS parameters: n=1024, Δ=2^30.
pub fn compact_ckks() -> Result<Arc<CkksParams>> {
    CkksParams::new(
        1024,
        vec![PRIME_60, PRIME_40, PRIME_50],
        (1u64 << 30) as f64,
        3.2,
    )
}
