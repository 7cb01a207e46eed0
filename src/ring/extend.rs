use num_bigint::{BigInt, BigUint};
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::{Result, TrellisError};
use crate::ring::modular::{mod_inv, mod_mul, mod_sub};
use crate::ring::poly::{RnsContext, RnsPoly};

/// Fast base extension from chain Q to the enlarged chain Q·P, after
/// Bajard et al.
///
/// Given residues x mod q_i, the lift Σ_i [x·(Q/q_i)^{-1}]_{q_i} · (Q/q_i)
/// equals x + α·Q for a small α recovered from the fractional sum
/// Σ t_i/q_i in floating point. Rounding that sum (instead of flooring it)
/// also centers the representative: inputs above Q/2 extend as x − Q, which
/// keeps tensor products within the Q·P range.
#[derive(Clone, Debug)]
pub struct BasisExtender {
    q_moduli: Vec<u64>,
    q_barrett: Vec<u64>,
    /// (Q/q_i)^{-1} mod q_i
    q_star_inv: Vec<u64>,
    /// 1/q_i in double precision, for the correction term
    q_inv_f: Vec<f64>,
    p_moduli: Vec<u64>,
    p_barrett: Vec<u64>,
    /// (Q/q_i) mod p_j, indexed [j][i]
    q_star_mod_p: Vec<Vec<u64>>,
    /// Q mod p_j
    q_mod_p: Vec<u64>,
}

impl BasisExtender {
    pub fn new(ctx_q: &RnsContext, ctx_p: &RnsContext) -> Result<Self> {
        if ctx_q.ring_degree != ctx_p.ring_degree {
            return Err(TrellisError::DimensionMismatch {
                expected: ctx_q.ring_degree,
                got: ctx_p.ring_degree,
            });
        }

        let q_moduli = ctx_q.moduli.clone();
        let q_barrett = ctx_q.barrett_ks.clone();

        let q_star_inv: Vec<u64> = (0..q_moduli.len())
            .map(|i| {
                let qi = q_moduli[i];
                let bk = q_barrett[i];
                let mut prod = 1u64;
                for (j, &qj) in q_moduli.iter().enumerate() {
                    if i != j {
                        prod = mod_mul(prod, qj % qi, qi, bk);
                    }
                }
                mod_inv(prod, qi).ok_or(TrellisError::ModulusMismatch)
            })
            .collect::<Result<Vec<_>>>()?;

        let q_inv_f = q_moduli.iter().map(|&q| 1.0 / q as f64).collect();

        let p_moduli = ctx_p.moduli.clone();
        let p_barrett = ctx_p.barrett_ks.clone();

        let q_star_mod_p: Vec<Vec<u64>> = p_moduli
            .iter()
            .zip(p_barrett.iter())
            .map(|(&pj, &bk)| {
                (0..q_moduli.len())
                    .map(|i| {
                        let mut prod = 1u64;
                        for (k, &qk) in q_moduli.iter().enumerate() {
                            if k != i {
                                prod = mod_mul(prod, qk % pj, pj, bk);
                            }
                        }
                        prod
                    })
                    .collect()
            })
            .collect();

        let q_mod_p: Vec<u64> = p_moduli
            .iter()
            .zip(p_barrett.iter())
            .map(|(&pj, &bk)| {
                let mut prod = 1u64;
                for &qk in &q_moduli {
                    prod = mod_mul(prod, qk % pj, pj, bk);
                }
                prod
            })
            .collect();

        Ok(Self {
            q_moduli,
            q_barrett,
            q_star_inv,
            q_inv_f,
            p_moduli,
            p_barrett,
            q_star_mod_p,
            q_mod_p,
        })
    }

    /// Extend `src` (coefficient domain, over Q) onto `dst` (over Q·P):
    /// the first |Q| rows are copied, the remaining rows receive the
    /// centered representative modulo each p_j.
    pub fn extend_basis(&self, src: &RnsPoly, dst: &mut RnsPoly) {
        let n = src.ring_degree();
        let kq = self.q_moduli.len();

        for i in 0..kq {
            dst.coeffs[i].copy_from_slice(&src.coeffs[i]);
        }

        let mut t = vec![0u64; kq];
        for u in 0..n {
            let mut v = 0.5f64;
            for i in 0..kq {
                t[i] = mod_mul(
                    src.coeffs[i][u],
                    self.q_star_inv[i],
                    self.q_moduli[i],
                    self.q_barrett[i],
                );
                v += t[i] as f64 * self.q_inv_f[i];
            }
            // α + centering bit in one floor
            let alpha = v as u64;

            for (j, &pj) in self.p_moduli.iter().enumerate() {
                let bk = self.p_barrett[j];
                let mut acc = 0u64;
                for i in 0..kq {
                    acc = crate::ring::modular::mod_add(
                        acc,
                        mod_mul(t[i], self.q_star_mod_p[j][i], pj, bk),
                        pj,
                    );
                }
                let corr = mod_mul(alpha % pj, self.q_mod_p[j], pj, bk);
                dst.coeffs[kq + j][u] = mod_sub(acc, corr, pj);
            }
        }
    }
}

/// Rounding rescale by the compound fraction t/Q, collapsing the basis from
/// Q·P back to Q: out ≡ round(t·x/Q) (mod Q) for the centered integer x
/// represented by the input residues.
#[derive(Clone, Debug)]
pub struct RnsScaler {
    t: BigInt,
    q_out: Vec<u64>,
    qp_big: BigUint,
    qp_half: BigUint,
    q_big: BigInt,
    q_half: BigInt,
    /// CRT reconstruction terms (QP/m_v)·[(QP/m_v)^{-1}]_{m_v} per QP row
    crt_terms: Vec<BigUint>,
}

impl RnsScaler {
    pub fn new(t: u64, ctx_q: &RnsContext, ctx_qp: &RnsContext) -> Result<Self> {
        let qp_big = ctx_qp.modulus_product(ctx_qp.num_moduli() - 1);
        let q_big_u = ctx_q.modulus_product(ctx_q.num_moduli() - 1);

        let crt_terms: Vec<BigUint> = ctx_qp
            .moduli
            .iter()
            .map(|&m| {
                let m_big = BigUint::from(m);
                let star = &qp_big / &m_big;
                let star_mod_m = (&star % &m_big).to_u64().unwrap_or(0);
                let inv = mod_inv(star_mod_m, m).ok_or(TrellisError::ModulusMismatch)?;
                Ok(star * BigUint::from(inv))
            })
            .collect::<Result<Vec<_>>>()?;

        let q_big = BigInt::from(q_big_u);
        Ok(Self {
            t: BigInt::from(t),
            q_out: ctx_q.moduli.clone(),
            qp_half: &qp_big >> 1,
            qp_big,
            q_half: &q_big >> 1,
            q_big,
            crt_terms,
        })
    }

    /// src: coefficient domain over Q·P. dst: receives the Q rows.
    pub fn scale(&self, src: &RnsPoly, dst: &mut RnsPoly) {
        let n = src.ring_degree();
        let qp_big_i = BigInt::from(self.qp_big.clone());

        for u in 0..n {
            let mut x = BigUint::zero();
            for (v, term) in self.crt_terms.iter().enumerate() {
                x += term * BigUint::from(src.coeffs[v][u]);
            }
            x %= &self.qp_big;

            // center around QP
            let mut xs = BigInt::from(x.clone());
            if x > self.qp_half {
                xs -= &qp_big_i;
            }

            // round(t·x / Q) with sign-correct rounding
            let num = &self.t * &xs;
            let y = if num.is_negative() {
                -((-&num + &self.q_half) / &self.q_big)
            } else {
                (&num + &self.q_half) / &self.q_big
            };

            for (v, &qi) in self.q_out.iter().enumerate() {
                let qi_big = BigInt::from(qi);
                let mut r = &y % &qi_big;
                if r.is_negative() {
                    r += &qi_big;
                }
                dst.coeffs[v][u] = r.to_u64().unwrap_or(0);
            }
        }
    }
}
