pub mod encoding;
pub mod encrypt;
pub mod eval;
pub mod keygen;
pub mod keyswitch;
pub mod rotation;

pub use encoding::{decode_scalar, decode_simd, encode_scalar, encode_simd};
pub use encrypt::{decrypt, encrypt_pk, encrypt_sk};
pub use eval::Evaluator;
pub use keygen::{EvaluationKey, PublicKey, RotationKeys, SecretKey, SwitchingKey};

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::ToPrimitive;

use crate::error::{Result, TrellisError};
use crate::params::BfvParams;
use crate::ring::modular::mod_inv;
use crate::ring::poly::{RnsContext, RnsPoly};

/// Immutable BFV context: ring contexts for Q, P and the enlarged basis
/// Q·P, the Δ = ⌊Q/t⌋ residues, and the precomputed Galois automorphism
/// targets used by rotations. Shared read-only between evaluators.
#[derive(Debug)]
pub struct BfvContext {
    pub params: Arc<BfvParams>,
    pub ctx_q: RnsContext,
    pub ctx_p: RnsContext,
    pub ctx_qp: RnsContext,
    /// Z_t context for slot batching; present when t ≡ 1 (mod 2n).
    pub ctx_t: Option<RnsContext>,
    /// Δ mod q_i for the plaintext lift.
    pub delta_residues: Vec<u64>,
    /// Galois generator of the column-rotation subgroup (order n/2 mod 2n).
    pub gen: u64,
    pub gen_inv: u64,
    /// gal_el_rot_col_left[k] = gen^k mod 2n, k ∈ [0, n/2).
    pub gal_el_rot_col_left: Vec<u64>,
    /// gal_el_rot_col_right[k] = gen^{-k} mod 2n.
    pub gal_el_rot_col_right: Vec<u64>,
    /// The row-swap involution X → X^{2n-1}.
    pub gal_el_rot_row: u64,
}

/// The Galois element generating the slot columns; the j-th automorphism
/// maps the canonical root ζ to ζ^{5^j}.
pub const GALOIS_GEN: u64 = 5;

impl BfvContext {
    pub fn new(params: Arc<BfvParams>) -> Result<Arc<Self>> {
        let n = params.ring_degree;
        let two_n = 2 * n as u64;

        let ctx_q = RnsContext::new(params.ct_moduli.clone(), n)?;
        let ctx_p = RnsContext::new(params.aux_moduli.clone(), n)?;
        let mut qp = params.ct_moduli.clone();
        qp.extend_from_slice(&params.aux_moduli);
        let ctx_qp = RnsContext::new(qp, n)?;

        let ctx_t = if (params.plain_modulus - 1) % two_n == 0 {
            Some(RnsContext::new(vec![params.plain_modulus], n)?)
        } else {
            None
        };

        let delta_residues = compute_delta_residues(&params)?;

        let gen = GALOIS_GEN;
        let gen_inv = mod_inv(gen, two_n).ok_or_else(|| {
            TrellisError::InvalidParam("Galois generator not invertible mod 2n".into())
        })?;

        let mut gal_el_rot_col_left = vec![1u64; n >> 1];
        let mut gal_el_rot_col_right = vec![1u64; n >> 1];
        for k in 1..(n >> 1) {
            gal_el_rot_col_left[k] = gal_el_rot_col_left[k - 1] * gen % two_n;
            gal_el_rot_col_right[k] = gal_el_rot_col_right[k - 1] * gen_inv % two_n;
        }

        Ok(Arc::new(Self {
            params,
            ctx_q,
            ctx_p,
            ctx_qp,
            ctx_t,
            delta_residues,
            gen,
            gen_inv,
            gal_el_rot_col_left,
            gal_el_rot_col_right,
            gal_el_rot_row: two_n - 1,
        }))
    }

    pub fn ring_degree(&self) -> usize {
        self.params.ring_degree
    }

    pub fn plain_modulus(&self) -> u64 {
        self.params.plain_modulus
    }

    /// Allocate a zeroed element of the given degree over Q.
    pub fn new_element(&self, degree: usize) -> BfvElement {
        BfvElement {
            value: (0..=degree).map(|_| self.ctx_q.new_poly()).collect(),
            is_ntt: false,
        }
    }

    /// Allocate a zeroed element of the given degree over the enlarged
    /// basis Q·P (work-pool sizing).
    pub(crate) fn new_element_qp(&self, degree: usize) -> BfvElement {
        BfvElement {
            value: (0..=degree).map(|_| self.ctx_qp.new_poly()).collect(),
            is_ntt: false,
        }
    }

    /// Allocate a fresh zeroed ciphertext of the given degree (≥ 1).
    pub fn new_ciphertext(&self, degree: usize) -> Ciphertext {
        Ciphertext {
            el: self.new_element(degree.max(1)),
        }
    }
}

fn compute_delta_residues(params: &BfvParams) -> Result<Vec<u64>> {
    let mut q_big = BigUint::from(1u64);
    for &qi in &params.ct_moduli {
        q_big *= BigUint::from(qi);
    }
    let delta = &q_big / BigUint::from(params.plain_modulus);
    if delta == BigUint::from(0u64) {
        return Err(TrellisError::InvalidParam(
            "ciphertext modulus product Q must be >= plaintext modulus t".into(),
        ));
    }
    params
        .ct_moduli
        .iter()
        .map(|&qi| {
            (&delta % BigUint::from(qi)).to_u64().ok_or_else(|| {
                TrellisError::InvalidParam("failed to reduce Δ modulo q_i".into())
            })
        })
        .collect()
}

/// Ciphertext-like carrier: an ordered sequence of degree+1 polynomials
/// sharing the same ring, level and NTT flag. Degree 0 is a plaintext
/// lift, degree 1 a fresh ciphertext; higher degrees appear transiently
/// during multiplication.
#[derive(Clone, Debug, PartialEq)]
pub struct BfvElement {
    pub(crate) value: Vec<RnsPoly>,
    pub(crate) is_ntt: bool,
}

impl BfvElement {
    pub fn degree(&self) -> usize {
        self.value.len() - 1
    }

    pub fn value(&self) -> &[RnsPoly] {
        &self.value
    }

    pub fn is_ntt(&self) -> bool {
        self.is_ntt
    }
}

/// BFV ciphertext: an element of degree ≥ 1.
#[derive(Clone, Debug, PartialEq)]
pub struct Ciphertext {
    pub(crate) el: BfvElement,
}

impl Ciphertext {
    /// Wrap an element produced by an evaluator operation. Fails on
    /// degree 0, which is a plaintext lift, not a ciphertext.
    pub fn from_element(el: BfvElement) -> Result<Self> {
        if el.degree() < 1 {
            return Err(TrellisError::ReceiverDegreeTooSmall {
                required: 1,
                got: el.degree(),
            });
        }
        Ok(Self { el })
    }

    pub fn into_element(self) -> BfvElement {
        self.el
    }
}

/// BFV plaintext: a degree-0 element carrying the Δ·m lift of a message
/// m ∈ Z_t[X]/(X^n+1).
#[derive(Clone, Debug, PartialEq)]
pub struct Plaintext {
    pub(crate) el: BfvElement,
}

/// Any element-bearing value the evaluator accepts as an operand.
pub trait Operand {
    fn element(&self) -> &BfvElement;

    fn degree(&self) -> usize {
        self.element().degree()
    }
}

/// An operand usable as a mutable receiver.
pub trait OperandMut: Operand {
    fn element_mut(&mut self) -> &mut BfvElement;
}

impl Operand for BfvElement {
    fn element(&self) -> &BfvElement {
        self
    }
}

impl OperandMut for BfvElement {
    fn element_mut(&mut self) -> &mut BfvElement {
        self
    }
}

impl Operand for Ciphertext {
    fn element(&self) -> &BfvElement {
        &self.el
    }
}

impl OperandMut for Ciphertext {
    fn element_mut(&mut self) -> &mut BfvElement {
        &mut self.el
    }
}

impl Operand for Plaintext {
    fn element(&self) -> &BfvElement {
        &self.el
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::presets::toy_bfv;

    #[test]
    fn test_context_tables() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let n = ctx.ring_degree();
        assert_eq!(ctx.gal_el_rot_col_left.len(), n / 2);
        assert_eq!(ctx.gal_el_rot_row, 2 * n as u64 - 1);
        // gen^k · gen^{-k} ≡ 1 (mod 2n)
        for k in 0..n / 2 {
            let prod = ctx.gal_el_rot_col_left[k] * ctx.gal_el_rot_col_right[k] % (2 * n as u64);
            assert_eq!(prod, 1);
        }
        // t = 65537 ≡ 1 (mod 16): batching context available
        assert!(ctx.ctx_t.is_some());
    }

    #[test]
    fn test_element_degrees() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let el = ctx.new_element(2);
        assert_eq!(el.degree(), 2);
        assert_eq!(el.value().len(), 3);
        assert!(!el.is_ntt());
        let ct = ctx.new_ciphertext(1);
        assert_eq!(ct.degree(), 1);
    }
}
