pub mod presets;

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::One;

use crate::error::{Result, TrellisError};

/// Parameters for the BFV scheme. Immutable once built.
#[derive(Clone, Debug)]
pub struct BfvParams {
    /// Ring degree n (must be power of 2).
    pub ring_degree: usize,
    /// Plaintext modulus t.
    pub plain_modulus: u64,
    /// Ciphertext modulus chain Q = ∏ q_i (NTT-friendly primes).
    pub ct_moduli: Vec<u64>,
    /// Auxiliary chain P for the tensoring basis Q·P.
    pub aux_moduli: Vec<u64>,
    /// Gaussian noise standard deviation.
    pub sigma: f64,
    /// Digit width β of the key-switching decomposition.
    pub bit_decomp: u64,
}

/// Builder for BfvParams.
pub struct BfvParamsBuilder {
    ring_degree: usize,
    plain_modulus: u64,
    ct_moduli: Vec<u64>,
    aux_moduli: Vec<u64>,
    sigma: f64,
    bit_decomp: u64,
}

impl Default for BfvParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BfvParamsBuilder {
    pub fn new() -> Self {
        Self {
            ring_degree: 4096,
            plain_modulus: 65537,
            ct_moduli: Vec::new(),
            aux_moduli: Vec::new(),
            sigma: 3.2,
            bit_decomp: 16,
        }
    }

    pub fn ring_degree(mut self, n: usize) -> Self {
        self.ring_degree = n;
        self
    }

    pub fn plain_modulus(mut self, t: u64) -> Self {
        self.plain_modulus = t;
        self
    }

    pub fn ct_moduli(mut self, moduli: Vec<u64>) -> Self {
        self.ct_moduli = moduli;
        self
    }

    pub fn aux_moduli(mut self, moduli: Vec<u64>) -> Self {
        self.aux_moduli = moduli;
        self
    }

    pub fn sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn bit_decomp(mut self, beta: u64) -> Self {
        self.bit_decomp = beta;
        self
    }

    pub fn build(self) -> Result<Arc<BfvParams>> {
        if !self.ring_degree.is_power_of_two() || self.ring_degree < 2 {
            return Err(TrellisError::InvalidRingDegree(self.ring_degree));
        }
        if self.ct_moduli.is_empty() {
            return Err(TrellisError::InvalidParam(
                "must specify at least one ciphertext modulus".into(),
            ));
        }
        if self.aux_moduli.is_empty() {
            return Err(TrellisError::InvalidParam(
                "must specify at least one auxiliary modulus (tensoring runs over Q·P)".into(),
            ));
        }
        if self.plain_modulus < 2 {
            return Err(TrellisError::InvalidParam("plaintext modulus must be >= 2".into()));
        }
        if !(1..=32).contains(&self.bit_decomp) {
            return Err(TrellisError::InvalidParam(format!(
                "bit_decomp must be in 1..=32, got {}",
                self.bit_decomp
            )));
        }
        // Key switching reduces every 8th accumulation; a window holds the
        // previous canonical value plus 8 lazy products: 17·q_i must fit a
        // 64-bit limb.
        for &q in &self.ct_moduli {
            if q >= 1u64 << 59 {
                return Err(TrellisError::InvalidParam(format!(
                    "ciphertext modulus {q} too large for the lazy-reduction window, need q < 2^59"
                )));
            }
        }

        // Tensor products of centered operands must fit in Q·P without
        // wrapping: P > (d+1)·n·Q/2 for combined degree d ≤ 4.
        let q_big = product(&self.ct_moduli);
        let p_big = product(&self.aux_moduli);
        let needed = &q_big * BigUint::from(4 * self.ring_degree as u64);
        if p_big < needed {
            return Err(TrellisError::InvalidParam(format!(
                "auxiliary chain too small: P must exceed 4·n·Q (n = {})",
                self.ring_degree
            )));
        }

        Ok(Arc::new(BfvParams {
            ring_degree: self.ring_degree,
            plain_modulus: self.plain_modulus,
            ct_moduli: self.ct_moduli,
            aux_moduli: self.aux_moduli,
            sigma: self.sigma,
            bit_decomp: self.bit_decomp,
        }))
    }
}

fn product(moduli: &[u64]) -> BigUint {
    let mut p = BigUint::one();
    for &m in moduli {
        p *= BigUint::from(m);
    }
    p
}

/// Parameters for the CKKS scheme (encoder side). Immutable once built.
#[derive(Clone, Debug)]
pub struct CkksParams {
    /// Ring degree n (must be power of 2).
    pub ring_degree: usize,
    /// Modulus chain; level ℓ uses q_0 … q_ℓ.
    pub moduli: Vec<u64>,
    /// Default plaintext scale Δ.
    pub scale: f64,
    /// Gaussian noise standard deviation (public decoding).
    pub sigma: f64,
}

impl CkksParams {
    pub fn new(ring_degree: usize, moduli: Vec<u64>, scale: f64, sigma: f64) -> Result<Arc<Self>> {
        if !ring_degree.is_power_of_two() || ring_degree < 4 {
            return Err(TrellisError::InvalidRingDegree(ring_degree));
        }
        if moduli.is_empty() {
            return Err(TrellisError::InvalidParam("empty modulus chain".into()));
        }
        if scale < 1.0 {
            return Err(TrellisError::InvalidParam(format!("invalid scale {scale}")));
        }
        Ok(Arc::new(Self {
            ring_degree,
            moduli,
            scale,
            sigma,
        }))
    }

    pub fn log_n(&self) -> u32 {
        self.ring_degree.trailing_zeros()
    }

    pub fn max_level(&self) -> usize {
        self.moduli.len() - 1
    }

    /// Number of plaintext slots, n/2.
    pub fn slots(&self) -> usize {
        self.ring_degree >> 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_bad_degree() {
        let r = BfvParamsBuilder::new()
            .ring_degree(100)
            .ct_moduli(vec![65537])
            .aux_moduli(vec![786433])
            .build();
        assert!(r.is_err());
    }

    #[test]
    fn test_builder_rejects_small_aux() {
        let r = BfvParamsBuilder::new()
            .ring_degree(16)
            .plain_modulus(257)
            .ct_moduli(vec![1099509805057])
            .aux_moduli(vec![786433])
            .build();
        assert!(r.is_err());
    }

    #[test]
    fn test_ckks_params() {
        let p = CkksParams::new(16, vec![1099509805057], (1u64 << 30) as f64, 3.2).unwrap();
        assert_eq!(p.slots(), 8);
        assert_eq!(p.max_level(), 0);
        assert_eq!(p.log_n(), 4);
    }
}
