use crate::error::{Result, TrellisError};
use crate::ring::modular::{barrett_constant, mod_add, mod_inv, mod_mul, mod_pow, mod_sub};

/// Precomputed negacyclic NTT tables for one prime modulus q ≡ 1 (mod 2n).
///
/// The forward transform maps a coefficient vector a to its evaluations at
/// the primitive 2n-th roots of unity, stored in bit-reversed order:
///
///   out[i] = a(ψ^{2·bitrev(i)+1})
///
/// This ordering is a contract, not an implementation detail: the NTT-domain
/// Galois permutation (`RnsContext::permute_ntt`) derives its index map from
/// it.
#[derive(Clone, Debug)]
pub struct NttTables {
    pub modulus: u64,
    barrett_k: u64,
    n: usize,
    /// psi_rev[i] = ψ^{bitrev(i)}, ψ a primitive 2n-th root of unity mod q.
    psi_rev: Vec<u64>,
    /// psi_inv_rev[i] = ψ^{-bitrev(i)}.
    psi_inv_rev: Vec<u64>,
    n_inv: u64,
}

/// Reverse the lowest `bits` bits of x.
#[inline]
pub fn bit_reverse(mut x: usize, bits: u32) -> usize {
    let mut r = 0usize;
    for _ in 0..bits {
        r = (r << 1) | (x & 1);
        x >>= 1;
    }
    r
}

/// Find a primitive 2n-th root of unity modulo q by exponentiating small
/// candidates. Since 2n is a power of two, ψ^n ≡ -1 certifies exact order 2n.
fn find_psi(n: usize, q: u64) -> Result<u64> {
    let two_n = 2 * n as u64;
    if (q - 1) % two_n != 0 {
        return Err(TrellisError::InvalidParam(format!(
            "cannot build NTT tables for n={n}, q={q} (need prime q ≡ 1 mod {two_n})"
        )));
    }
    let exp = (q - 1) / two_n;
    for g in 2u64..1000 {
        let psi = mod_pow(g, exp, q);
        if psi != 0 && psi != 1 && mod_pow(psi, n as u64, q) == q - 1 {
            return Ok(psi);
        }
    }
    Err(TrellisError::InvalidParam(format!(
        "no primitive 2n-th root of unity found for n={n}, q={q}"
    )))
}

impl NttTables {
    pub fn new(n: usize, modulus: u64) -> Result<Self> {
        if !n.is_power_of_two() || n < 2 {
            return Err(TrellisError::InvalidRingDegree(n));
        }
        let log_n = n.trailing_zeros();
        let bk = barrett_constant(modulus);
        let psi = find_psi(n, modulus)?;
        let psi_inv = mod_inv(psi, modulus)
            .ok_or(TrellisError::ModulusMismatch)?;

        let mut psi_pows = vec![1u64; n];
        let mut psi_inv_pows = vec![1u64; n];
        for i in 1..n {
            psi_pows[i] = mod_mul(psi_pows[i - 1], psi, modulus, bk);
            psi_inv_pows[i] = mod_mul(psi_inv_pows[i - 1], psi_inv, modulus, bk);
        }

        let mut psi_rev = vec![0u64; n];
        let mut psi_inv_rev = vec![0u64; n];
        for i in 0..n {
            let r = bit_reverse(i, log_n);
            psi_rev[i] = psi_pows[r];
            psi_inv_rev[i] = psi_inv_pows[r];
        }

        let n_inv = mod_inv(n as u64 % modulus, modulus)
            .ok_or(TrellisError::ModulusMismatch)?;

        Ok(Self {
            modulus,
            barrett_k: bk,
            n,
            psi_rev,
            psi_inv_rev,
            n_inv,
        })
    }

    pub fn ring_degree(&self) -> usize {
        self.n
    }

    /// Forward negacyclic NTT, in place. Input in standard coefficient order
    /// (canonical residues), output in bit-reversed evaluation order.
    pub fn forward(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let q = self.modulus;
        let bk = self.barrett_k;
        let mut t = self.n;
        let mut m = 1usize;
        while m < self.n {
            t >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let s = self.psi_rev[m + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = mod_mul(a[j + t], s, q, bk);
                    a[j] = mod_add(u, v, q);
                    a[j + t] = mod_sub(u, v, q);
                }
            }
            m <<= 1;
        }
    }

    /// Inverse negacyclic NTT, in place. Consumes the bit-reversed
    /// evaluation order produced by `forward`, restores coefficient order,
    /// and normalizes by n^{-1}.
    pub fn inverse(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let q = self.modulus;
        let bk = self.barrett_k;
        let mut t = 1usize;
        let mut m = self.n;
        while m > 1 {
            let h = m >> 1;
            let mut j1 = 0usize;
            for i in 0..h {
                let s = self.psi_inv_rev[h + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = a[j + t];
                    a[j] = mod_add(u, v, q);
                    a[j + t] = mod_mul(mod_sub(u, v, q), s, q, bk);
                }
                j1 += 2 * t;
            }
            t <<= 1;
            m = h;
        }
        for x in a.iter_mut() {
            *x = mod_mul(*x, self.n_inv, q, bk);
        }
    }
}
