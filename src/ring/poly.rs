use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

use crate::error::{Result, TrellisError};
use crate::ring::modular::{
    barrett_reduce, mod_add, mod_inv, mod_mul, mod_neg, mod_sub, montgomery_inv_neg,
    montgomery_r2, montgomery_reduce, montgomery_reduce_lazy,
};
use crate::ring::ntt::{bit_reverse, NttTables};

/// Polynomial over Z_Q[X]/(X^n+1) in RNS representation: one row of n
/// residues per modulus. Pure data; whether the rows hold coefficients or
/// NTT evaluations is tracked by the owning element.
///
/// A context for a modulus chain that is a prefix of this polynomial's rows
/// may operate on it (e.g. the Q context on a QP-sized work polynomial).
#[derive(Clone, Debug, PartialEq)]
pub struct RnsPoly {
    pub coeffs: Vec<Vec<u64>>,
}

impl RnsPoly {
    pub fn num_rows(&self) -> usize {
        self.coeffs.len()
    }

    pub fn ring_degree(&self) -> usize {
        self.coeffs[0].len()
    }
}

/// Precomputed data for one RNS modulus chain: NTT tables, Barrett and
/// Montgomery constants per prime, and the elementwise operation table.
#[derive(Clone, Debug)]
pub struct RnsContext {
    pub moduli: Vec<u64>,
    pub ring_degree: usize,
    pub barrett_ks: Vec<u64>,
    mont_inv_negs: Vec<u64>,
    mont_r2s: Vec<u64>,
    ntt_tables: Vec<NttTables>,
}

impl RnsContext {
    pub fn new(moduli: Vec<u64>, ring_degree: usize) -> Result<Self> {
        if !ring_degree.is_power_of_two() || ring_degree < 2 {
            return Err(TrellisError::InvalidRingDegree(ring_degree));
        }
        if moduli.is_empty() {
            return Err(TrellisError::InvalidParam("empty modulus chain".into()));
        }
        for &q in &moduli {
            // Lazy Montgomery products live in [0, 2q); unreduced sums need
            // headroom in a 64-bit limb.
            if q >= 1u64 << 62 {
                return Err(TrellisError::InvalidParam(format!(
                    "modulus {q} too large, lazy products require q < 2^62"
                )));
            }
        }

        let ntt_tables = moduli
            .iter()
            .map(|&q| NttTables::new(ring_degree, q))
            .collect::<Result<Vec<_>>>()?;
        let barrett_ks = moduli.iter().map(|&q| crate::ring::modular::barrett_constant(q)).collect();
        let mont_inv_negs = moduli.iter().map(|&q| montgomery_inv_neg(q)).collect();
        let mont_r2s = moduli.iter().map(|&q| montgomery_r2(q)).collect();

        Ok(Self {
            moduli,
            ring_degree,
            barrett_ks,
            mont_inv_negs,
            mont_r2s,
            ntt_tables,
        })
    }

    pub fn num_moduli(&self) -> usize {
        self.moduli.len()
    }

    /// Allocate a zeroed polynomial sized to this context.
    pub fn new_poly(&self) -> RnsPoly {
        RnsPoly {
            coeffs: vec![vec![0u64; self.ring_degree]; self.moduli.len()],
        }
    }

    /// Product of the modulus chain truncated to `level` (inclusive).
    pub fn modulus_product(&self, level: usize) -> BigUint {
        let mut q = BigUint::one();
        for &qi in &self.moduli[..=level] {
            q *= BigUint::from(qi);
        }
        q
    }

    /// Map an unsigned coefficient vector into every residue row.
    pub fn poly_from_coeffs(&self, coeffs: &[u64]) -> Result<RnsPoly> {
        if coeffs.len() != self.ring_degree {
            return Err(TrellisError::DimensionMismatch {
                expected: self.ring_degree,
                got: coeffs.len(),
            });
        }
        let rows = self
            .moduli
            .iter()
            .map(|&q| coeffs.iter().map(|&c| c % q).collect())
            .collect();
        Ok(RnsPoly { coeffs: rows })
    }

    /// Map a small signed coefficient vector into every residue row.
    pub fn poly_from_signed(&self, coeffs: &[i64]) -> Result<RnsPoly> {
        if coeffs.len() != self.ring_degree {
            return Err(TrellisError::DimensionMismatch {
                expected: self.ring_degree,
                got: coeffs.len(),
            });
        }
        let rows = self
            .moduli
            .iter()
            .map(|&q| {
                coeffs
                    .iter()
                    .map(|&c| {
                        if c >= 0 {
                            c as u64 % q
                        } else {
                            (q - ((-c) as u64 % q)) % q
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(RnsPoly { coeffs: rows })
    }

    fn rows(&self) -> usize {
        self.moduli.len()
    }

    pub fn zero(&self, p: &mut RnsPoly) {
        for row in p.coeffs.iter_mut().take(self.rows()) {
            row.fill(0);
        }
    }

    pub fn copy(&self, src: &RnsPoly, dst: &mut RnsPoly) {
        self.copy_lvl(self.rows() - 1, src, dst);
    }

    pub fn copy_lvl(&self, level: usize, src: &RnsPoly, dst: &mut RnsPoly) {
        for v in 0..=level {
            dst.coeffs[v].copy_from_slice(&src.coeffs[v]);
        }
    }

    pub fn add(&self, a: &RnsPoly, b: &RnsPoly, out: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            for u in 0..self.ring_degree {
                out.coeffs[v][u] = mod_add(a.coeffs[v][u], b.coeffs[v][u], q);
            }
        }
    }

    pub fn add_assign(&self, out: &mut RnsPoly, rhs: &RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            for u in 0..self.ring_degree {
                out.coeffs[v][u] = mod_add(out.coeffs[v][u], rhs.coeffs[v][u], q);
            }
        }
    }

    /// Double every residue in place (Add of a polynomial with itself).
    pub fn double_assign(&self, p: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            for u in 0..self.ring_degree {
                p.coeffs[v][u] = mod_add(p.coeffs[v][u], p.coeffs[v][u], q);
            }
        }
    }

    /// Addition without the modular reduction; residues may leave canonical
    /// range (valid when the next operation reduces).
    pub fn add_no_mod(&self, a: &RnsPoly, b: &RnsPoly, out: &mut RnsPoly) {
        for v in 0..self.rows() {
            for u in 0..self.ring_degree {
                out.coeffs[v][u] = a.coeffs[v][u].wrapping_add(b.coeffs[v][u]);
            }
        }
    }

    pub fn sub(&self, a: &RnsPoly, b: &RnsPoly, out: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            for u in 0..self.ring_degree {
                out.coeffs[v][u] = mod_sub(a.coeffs[v][u], b.coeffs[v][u], q);
            }
        }
    }

    pub fn sub_assign(&self, out: &mut RnsPoly, rhs: &RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            for u in 0..self.ring_degree {
                out.coeffs[v][u] = mod_sub(out.coeffs[v][u], rhs.coeffs[v][u], q);
            }
        }
    }

    /// Subtraction shifted by 2q to stay positive, without reduction.
    pub fn sub_no_mod(&self, a: &RnsPoly, b: &RnsPoly, out: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            let two_q = q << 1;
            for u in 0..self.ring_degree {
                out.coeffs[v][u] = a.coeffs[v][u].wrapping_add(two_q).wrapping_sub(b.coeffs[v][u]);
            }
        }
    }

    pub fn neg(&self, a: &RnsPoly, out: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            for u in 0..self.ring_degree {
                out.coeffs[v][u] = mod_neg(a.coeffs[v][u], q);
            }
        }
    }

    /// Reduce every residue back to canonical range.
    pub fn reduce(&self, a: &RnsPoly, out: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            let bk = self.barrett_ks[v];
            for u in 0..self.ring_degree {
                out.coeffs[v][u] = barrett_reduce(a.coeffs[v][u] as u128, q, bk);
            }
        }
    }

    pub fn reduce_assign(&self, p: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            let bk = self.barrett_ks[v];
            for u in 0..self.ring_degree {
                p.coeffs[v][u] = barrett_reduce(p.coeffs[v][u] as u128, q, bk);
            }
        }
    }

    pub fn mul_scalar(&self, a: &RnsPoly, scalar: u64, out: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            let bk = self.barrett_ks[v];
            let s = scalar % q;
            for u in 0..self.ring_degree {
                out.coeffs[v][u] = mod_mul(a.coeffs[v][u], s, q, bk);
            }
        }
    }

    /// Enter Montgomery form: out = a·R mod q per residue.
    pub fn mform(&self, a: &RnsPoly, out: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            let ninv = self.mont_inv_negs[v];
            let r2 = self.mont_r2s[v];
            for u in 0..self.ring_degree {
                out.coeffs[v][u] =
                    montgomery_reduce(a.coeffs[v][u] as u128 * r2 as u128, q, ninv);
            }
        }
    }

    pub fn mform_assign(&self, p: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            let ninv = self.mont_inv_negs[v];
            let r2 = self.mont_r2s[v];
            for u in 0..self.ring_degree {
                p.coeffs[v][u] =
                    montgomery_reduce(p.coeffs[v][u] as u128 * r2 as u128, q, ninv);
            }
        }
    }

    /// out = a·b where a is in Montgomery form. Result canonical.
    pub fn mul_coeffs_montgomery(&self, a: &RnsPoly, b: &RnsPoly, out: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            let ninv = self.mont_inv_negs[v];
            for u in 0..self.ring_degree {
                out.coeffs[v][u] =
                    montgomery_reduce(a.coeffs[v][u] as u128 * b.coeffs[v][u] as u128, q, ninv);
            }
        }
    }

    /// out += a·b (a in Montgomery form), reduced.
    pub fn mul_coeffs_montgomery_and_add(&self, a: &RnsPoly, b: &RnsPoly, out: &mut RnsPoly) {
        for (v, &q) in self.moduli.iter().enumerate() {
            let ninv = self.mont_inv_negs[v];
            for u in 0..self.ring_degree {
                let p = montgomery_reduce(a.coeffs[v][u] as u128 * b.coeffs[v][u] as u128, q, ninv);
                out.coeffs[v][u] = mod_add(out.coeffs[v][u], p, q);
            }
        }
    }

    /// out += a·b (a in Montgomery form), without reduction. Each product is
    /// below 2q; the caller reduces on its own schedule.
    pub fn mul_coeffs_montgomery_and_add_no_mod(
        &self,
        a: &RnsPoly,
        b: &RnsPoly,
        out: &mut RnsPoly,
    ) {
        for (v, &q) in self.moduli.iter().enumerate() {
            let ninv = self.mont_inv_negs[v];
            for u in 0..self.ring_degree {
                let p = montgomery_reduce_lazy(
                    a.coeffs[v][u] as u128 * b.coeffs[v][u] as u128,
                    q,
                    ninv,
                );
                out.coeffs[v][u] = out.coeffs[v][u].wrapping_add(p);
            }
        }
    }

    /// Forward NTT on every row of this context, in place.
    pub fn ntt(&self, p: &mut RnsPoly) {
        self.ntt_lvl(self.rows() - 1, p);
    }

    pub fn ntt_lvl(&self, level: usize, p: &mut RnsPoly) {
        for v in 0..=level {
            self.ntt_tables[v].forward(&mut p.coeffs[v]);
        }
    }

    /// Inverse NTT on every row of this context, in place.
    pub fn inv_ntt(&self, p: &mut RnsPoly) {
        self.inv_ntt_lvl(self.rows() - 1, p);
    }

    pub fn inv_ntt_lvl(&self, level: usize, p: &mut RnsPoly) {
        for v in 0..=level {
            self.ntt_tables[v].inverse(&mut p.coeffs[v]);
        }
    }

    /// Galois automorphism X → X^gal in the coefficient domain. `gal` must
    /// be odd; since X^n = -1 this is a signed permutation of coefficients.
    pub fn permute(&self, a: &RnsPoly, gal: u64, out: &mut RnsPoly) {
        let n = self.ring_degree;
        let two_n = 2 * n as u64;
        for (v, &q) in self.moduli.iter().enumerate() {
            out.coeffs[v][..n].fill(0);
            for i in 0..n {
                let c = a.coeffs[v][i];
                if c == 0 {
                    continue;
                }
                let e = (i as u64 * gal % two_n) as usize;
                if e < n {
                    out.coeffs[v][e] = mod_add(out.coeffs[v][e], c, q);
                } else {
                    out.coeffs[v][e - n] = mod_sub(out.coeffs[v][e - n], c, q);
                }
            }
        }
    }

    /// Galois automorphism X → X^gal in the NTT domain. Relies on the NTT
    /// ordering contract (slot i holds the evaluation at ψ^{2·bitrev(i)+1}):
    /// the permuted polynomial's slot i is the input's evaluation at the
    /// gal-th power of that root.
    pub fn permute_ntt(&self, a: &RnsPoly, gal: u64, out: &mut RnsPoly) {
        let n = self.ring_degree;
        let log_n = n.trailing_zeros();
        let mask = 2 * n as u64 - 1;
        for i in 0..n {
            let e = 2 * bit_reverse(i, log_n) as u64 + 1;
            let src = bit_reverse(((e * gal & mask) as usize - 1) >> 1, log_n);
            for v in 0..self.rows() {
                out.coeffs[v][i] = a.coeffs[v][src];
            }
        }
    }

    /// CRT-lift the first level+1 rows to big integers in [0, Q_level).
    pub fn poly_to_bigint(&self, p: &RnsPoly, level: usize) -> Vec<BigUint> {
        let q_big = self.modulus_product(level);
        let crt_terms: Vec<BigUint> = self.moduli[..=level]
            .iter()
            .map(|&qi| {
                let qi_big = BigUint::from(qi);
                let q_star = &q_big / &qi_big;
                let q_star_mod_qi = (&q_star % &qi_big).to_u64().unwrap_or(0);
                // moduli are distinct primes, so the inverse exists
                let inv = mod_inv(q_star_mod_qi, qi).unwrap_or(0);
                q_star * BigUint::from(inv)
            })
            .collect();

        (0..self.ring_degree)
            .map(|u| {
                let mut x = BigUint::zero();
                for (v, term) in crt_terms.iter().enumerate() {
                    x += term * BigUint::from(p.coeffs[v][u]);
                }
                x % &q_big
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_N: usize = 16;
    // Both ≡ 1 (mod 32)
    const TEST_MODULI: [u64; 2] = [65537, 786433];

    fn test_ctx() -> RnsContext {
        RnsContext::new(TEST_MODULI.to_vec(), TEST_N).unwrap()
    }

    fn sample_poly(ctx: &RnsContext, seed: u64) -> RnsPoly {
        let coeffs: Vec<u64> = (0..ctx.ring_degree as u64)
            .map(|i| (i * 2654435761u64).wrapping_add(seed) % 60000)
            .collect();
        ctx.poly_from_coeffs(&coeffs).unwrap()
    }

    #[test]
    fn test_add_sub_roundtrip() {
        let ctx = test_ctx();
        let a = sample_poly(&ctx, 1);
        let b = sample_poly(&ctx, 2);
        let mut c = ctx.new_poly();
        let mut d = ctx.new_poly();
        ctx.add(&a, &b, &mut c);
        ctx.sub(&c, &b, &mut d);
        assert_eq!(d, a);
    }

    #[test]
    fn test_neg_cancels() {
        let ctx = test_ctx();
        let a = sample_poly(&ctx, 3);
        let mut na = ctx.new_poly();
        let mut z = ctx.new_poly();
        ctx.neg(&a, &mut na);
        ctx.add(&a, &na, &mut z);
        assert_eq!(z, ctx.new_poly());
    }

    #[test]
    fn test_no_mod_then_reduce() {
        let ctx = test_ctx();
        let a = sample_poly(&ctx, 4);
        let b = sample_poly(&ctx, 5);
        let mut fast = ctx.new_poly();
        ctx.add_no_mod(&a, &b, &mut fast);
        ctx.reduce_assign(&mut fast);
        let mut slow = ctx.new_poly();
        ctx.add(&a, &b, &mut slow);
        assert_eq!(fast, slow);

        ctx.sub_no_mod(&a, &b, &mut fast);
        ctx.reduce_assign(&mut fast);
        ctx.sub(&a, &b, &mut slow);
        assert_eq!(fast, slow);
    }

    #[test]
    fn test_montgomery_mul_matches_scalar() {
        let ctx = test_ctx();
        let a = sample_poly(&ctx, 6);
        let b = sample_poly(&ctx, 7);
        let mut am = ctx.new_poly();
        let mut prod = ctx.new_poly();
        ctx.mform(&a, &mut am);
        ctx.mul_coeffs_montgomery(&am, &b, &mut prod);
        for (v, &q) in ctx.moduli.iter().enumerate() {
            for u in 0..ctx.ring_degree {
                let expected = (a.coeffs[v][u] as u128 * b.coeffs[v][u] as u128 % q as u128) as u64;
                assert_eq!(prod.coeffs[v][u], expected);
            }
        }
    }

    #[test]
    fn test_lazy_accumulation_stays_reducible() {
        let ctx = test_ctx();
        let a = sample_poly(&ctx, 8);
        let b = sample_poly(&ctx, 9);
        let mut am = ctx.new_poly();
        ctx.mform(&a, &mut am);

        let mut acc = ctx.new_poly();
        let mut expected = ctx.new_poly();
        for _ in 0..8 {
            ctx.mul_coeffs_montgomery_and_add_no_mod(&am, &b, &mut acc);
            ctx.mul_coeffs_montgomery_and_add(&am, &b, &mut expected);
        }
        ctx.reduce_assign(&mut acc);
        assert_eq!(acc, expected);
    }

    #[test]
    fn test_permute_is_negacyclic_substitution() {
        // σ_3 on 1 + X over Z_q[X]/(X^16+1) gives 1 + X^3
        let ctx = test_ctx();
        let mut coeffs = vec![0u64; TEST_N];
        coeffs[0] = 1;
        coeffs[1] = 1;
        let a = ctx.poly_from_coeffs(&coeffs).unwrap();
        let mut out = ctx.new_poly();
        ctx.permute(&a, 3, &mut out);
        for (v, _) in ctx.moduli.iter().enumerate() {
            assert_eq!(out.coeffs[v][0], 1);
            assert_eq!(out.coeffs[v][3], 1);
            assert_eq!(out.coeffs[v][1], 0);
        }
    }

    #[test]
    fn test_permute_ntt_matches_coeff_permute() {
        let ctx = test_ctx();
        let a = sample_poly(&ctx, 10);
        for gal in [3u64, 5, 9, 31] {
            // coefficient-domain path
            let mut expected = ctx.new_poly();
            ctx.permute(&a, gal, &mut expected);

            // NTT-domain path
            let mut a_ntt = a.clone();
            ctx.ntt(&mut a_ntt);
            let mut out = ctx.new_poly();
            ctx.permute_ntt(&a_ntt, gal, &mut out);
            ctx.inv_ntt(&mut out);

            assert_eq!(out, expected, "gal = {gal}");
        }
    }

    #[test]
    fn test_poly_to_bigint_roundtrip() {
        let ctx = test_ctx();
        // value representable below both moduli products
        let coeffs: Vec<u64> = (0..TEST_N as u64).map(|i| i * 1000 + 7).collect();
        let p = ctx.poly_from_coeffs(&coeffs).unwrap();
        let lifted = ctx.poly_to_bigint(&p, 1);
        for (u, x) in lifted.iter().enumerate() {
            assert_eq!(x, &BigUint::from(coeffs[u]));
        }
    }
}
