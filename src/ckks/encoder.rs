use std::sync::Arc;

use num_bigint::{BigInt, BigUint};
use num_complex::Complex64;
use num_traits::{FromPrimitive, Signed, ToPrimitive};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::ckks::{CkksContext, Plaintext};
use crate::error::{Result, TrellisError};
use crate::ring::ntt::bit_reverse;
use crate::ring::poly::RnsPoly;
use crate::sampling::read_and_add_lvl;

/// Canonical-embedding encoder between vectors of complex slot values and
/// plaintext polynomials over R_Q.
///
/// A vector v ∈ C^slots (slots a power of two, ≤ n/2) is carried through
/// the inverse of the embedding (an iterative FFT over the subgroup
/// generated by 5 in (Z/2nZ)*), interleaved into real coefficients, scaled
/// by Δ and rounded into every residue row. Decoding runs the same pipeline
/// backwards, with an optional noise-flooding step that makes the output
/// safe to publish.
///
/// The encoder owns scratch buffers and is therefore not thread-safe; use
/// one per thread.
pub struct Encoder {
    ctx: Arc<CkksContext>,
    /// m = 2n.
    m: usize,
    /// rot_group[j] = 5^j mod m, the cyclic half of the Galois group.
    rot_group: Vec<usize>,
    /// roots[i] = e^{2πi·i/m}, with roots[m] = roots[0].
    roots: Vec<Complex64>,
    values: Vec<Complex64>,
    values_float: Vec<f64>,
    /// ∏ q_0..q_ℓ per level, for the CRT decode path.
    big_q_chain: Vec<BigUint>,
    polypool: RnsPoly,
    rng: ChaCha20Rng,
}

impl Encoder {
    pub fn new(ctx: &Arc<CkksContext>) -> Self {
        let n = ctx.params.ring_degree;
        let m = 2 * n;

        let mut rot_group = vec![0usize; n >> 1];
        let mut five_pows = 1usize;
        for slot in rot_group.iter_mut() {
            *slot = five_pows;
            five_pows = five_pows * 5 & (m - 1);
        }

        let mut roots = vec![Complex64::default(); m + 1];
        for (i, r) in roots.iter_mut().enumerate().take(m) {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / m as f64;
            *r = Complex64::new(angle.cos(), angle.sin());
        }
        roots[m] = roots[0];

        let mut big_q_chain = Vec::with_capacity(ctx.ctx_q.num_moduli());
        for level in 0..ctx.ctx_q.num_moduli() {
            big_q_chain.push(ctx.ctx_q.modulus_product(level));
        }

        Self {
            ctx: ctx.clone(),
            m,
            rot_group,
            roots,
            values: vec![Complex64::default(); n >> 1],
            values_float: vec![0.0; n],
            big_q_chain,
            polypool: ctx.ctx_q.new_poly(),
            rng: ChaCha20Rng::from_os_rng(),
        }
    }

    fn check_slots(&self, log_slots: u32) -> Result<usize> {
        let log_n = self.ctx.params.log_n();
        if log_slots >= log_n {
            return Err(TrellisError::InvalidParam(format!(
                "too many slots for the ring degree: log_slots {log_slots} >= log_n {log_n}"
            )));
        }
        Ok(1usize << log_slots)
    }

    /// Encode `values` (length ≤ 2^log_slots) onto the given plaintext.
    pub fn encode(
        &mut self,
        plaintext: &mut Plaintext,
        values: &[Complex64],
        log_slots: u32,
    ) -> Result<()> {
        self.embed(values, log_slots)?;
        self.scale_up(&mut plaintext.value, plaintext.scale, plaintext.level);
        self.wipe_internal_memory();
        plaintext.is_ntt = false;
        Ok(())
    }

    /// Encode onto a new plaintext at the maximum level with the default
    /// scale.
    pub fn encode_new(&mut self, values: &[Complex64], log_slots: u32) -> Result<Plaintext> {
        self.encode_at_lvl_new(self.ctx.params.max_level(), values, log_slots)
    }

    /// Encode onto a new plaintext at the desired level.
    pub fn encode_at_lvl_new(
        &mut self,
        level: usize,
        values: &[Complex64],
        log_slots: u32,
    ) -> Result<Plaintext> {
        let mut plaintext = self.ctx.new_plaintext(level, self.ctx.params.scale)?;
        self.encode(&mut plaintext, values, log_slots)?;
        Ok(plaintext)
    }

    /// Encode and carry the plaintext into the NTT domain.
    pub fn encode_ntt(
        &mut self,
        plaintext: &mut Plaintext,
        values: &[Complex64],
        log_slots: u32,
    ) -> Result<()> {
        self.encode(plaintext, values, log_slots)?;
        self.ctx.ctx_q.ntt_lvl(plaintext.level, &mut plaintext.value);
        plaintext.is_ntt = true;
        Ok(())
    }

    pub fn encode_ntt_new(&mut self, values: &[Complex64], log_slots: u32) -> Result<Plaintext> {
        self.encode_ntt_at_lvl_new(self.ctx.params.max_level(), values, log_slots)
    }

    pub fn encode_ntt_at_lvl_new(
        &mut self,
        level: usize,
        values: &[Complex64],
        log_slots: u32,
    ) -> Result<Plaintext> {
        let mut plaintext = self.ctx.new_plaintext(level, self.ctx.params.scale)?;
        self.encode_ntt(&mut plaintext, values, log_slots)?;
        Ok(plaintext)
    }

    /// Evaluate the inverse canonical embedding of `values` into the
    /// internal real buffer: InvFFT over the slot subgroup, then real and
    /// imaginary parts interleaved with gap (n/2)/slots.
    pub fn embed(&mut self, values: &[Complex64], log_slots: u32) -> Result<()> {
        let slots = self.check_slots(log_slots)?;
        let max_slots = self.ctx.params.ring_degree >> 1;
        if values.len() > max_slots || values.len() > slots {
            return Err(TrellisError::DimensionMismatch {
                expected: slots.min(max_slots),
                got: values.len(),
            });
        }

        self.values[..values.len()].copy_from_slice(values);
        for v in self.values[values.len()..slots].iter_mut() {
            *v = Complex64::default();
        }
        self.values_float.fill(0.0);

        invfft(
            &mut self.values,
            slots,
            self.m,
            &self.rot_group,
            &self.roots,
        );

        let gap = max_slots / slots;
        for i in 0..slots {
            self.values_float[i * gap] = self.values[i].re;
            self.values_float[max_slots + i * gap] = self.values[i].im;
        }
        Ok(())
    }

    /// Write the internally stored embedding onto a polynomial, scaled by
    /// `scale` and rounded: the rounded integer is identical across all
    /// residue rows.
    pub fn scale_up(&self, pol: &mut RnsPoly, scale: f64, level: usize) {
        scale_up_vec_exact(
            &self.values_float,
            scale,
            &self.ctx.ctx_q.moduli[..=level],
            pol,
        );
    }

    /// Zero the internal scratch buffers.
    pub fn wipe_internal_memory(&mut self) {
        for v in self.values.iter_mut() {
            *v = Complex64::default();
        }
        for v in self.values_float.iter_mut() {
            *v = 0.0;
        }
    }

    /// Decode a plaintext to its slot values.
    pub fn decode(&mut self, plaintext: &Plaintext, log_slots: u32) -> Result<Vec<Complex64>> {
        self.decode_internal(plaintext, log_slots, 0.0)
    }

    /// Decode with noise flooding: a discrete Gaussian of deviation σ and
    /// bound ⌊σ√(2π)⌋ is added to the coefficients before reconstruction,
    /// making the decoded values safe to publish.
    pub fn decode_public(
        &mut self,
        plaintext: &Plaintext,
        log_slots: u32,
        sigma: f64,
    ) -> Result<Vec<Complex64>> {
        self.decode_internal(plaintext, log_slots, sigma)
    }

    fn decode_internal(
        &mut self,
        plaintext: &Plaintext,
        log_slots: u32,
        sigma: f64,
    ) -> Result<Vec<Complex64>> {
        let slots = self.check_slots(log_slots)?;
        let q = &self.ctx.ctx_q;

        if plaintext.is_ntt {
            q.copy_lvl(plaintext.level, &plaintext.value, &mut self.polypool);
            q.inv_ntt_lvl(plaintext.level, &mut self.polypool);
        } else {
            q.copy_lvl(plaintext.level, &plaintext.value, &mut self.polypool);
        }

        if sigma != 0.0 {
            // B = ⌊σ·√(2π)⌋
            read_and_add_lvl(
                q,
                plaintext.level,
                sigma,
                (2.5066282746310002 * sigma) as u64,
                &mut self.polypool,
                &mut self.rng,
            );
        }

        self.plaintext_to_complex(plaintext.level, plaintext.scale, log_slots);

        fft(
            &mut self.values,
            slots,
            self.m,
            &self.rot_group,
            &self.roots,
        );

        let res = self.values[..slots].to_vec();
        for v in self.values.iter_mut() {
            *v = Complex64::default();
        }
        Ok(res)
    }

    /// Encode real coefficients a_0 + a_1·X + … directly (no embedding).
    pub fn encode_coeffs(&mut self, values: &[f64], plaintext: &mut Plaintext) -> Result<()> {
        let n = self.ctx.params.ring_degree;
        if values.len() > n {
            return Err(TrellisError::DimensionMismatch {
                expected: n,
                got: values.len(),
            });
        }
        let mut padded = vec![0.0; n];
        padded[..values.len()].copy_from_slice(values);
        scale_up_vec_exact(
            &padded,
            plaintext.scale,
            &self.ctx.ctx_q.moduli[..=plaintext.level],
            &mut plaintext.value,
        );
        plaintext.is_ntt = false;
        Ok(())
    }

    pub fn encode_coeffs_ntt(&mut self, values: &[f64], plaintext: &mut Plaintext) -> Result<()> {
        self.encode_coeffs(values, plaintext)?;
        self.ctx.ctx_q.ntt_lvl(plaintext.level, &mut plaintext.value);
        plaintext.is_ntt = true;
        Ok(())
    }

    /// Decode the scaled-down coefficient vector (no embedding).
    pub fn decode_coeffs(&mut self, plaintext: &Plaintext) -> Result<Vec<f64>> {
        self.decode_coeffs_internal(plaintext, 0.0)
    }

    pub fn decode_coeffs_public(&mut self, plaintext: &Plaintext, sigma: f64) -> Result<Vec<f64>> {
        self.decode_coeffs_internal(plaintext, sigma)
    }

    fn decode_coeffs_internal(&mut self, plaintext: &Plaintext, sigma: f64) -> Result<Vec<f64>> {
        let q = &self.ctx.ctx_q;
        q.copy_lvl(plaintext.level, &plaintext.value, &mut self.polypool);
        if plaintext.is_ntt {
            q.inv_ntt_lvl(plaintext.level, &mut self.polypool);
        }

        if sigma != 0.0 {
            read_and_add_lvl(
                q,
                plaintext.level,
                sigma,
                (2.5066282746310002 * sigma) as u64,
                &mut self.polypool,
                &mut self.rng,
            );
        }

        let n = self.ctx.params.ring_degree;
        let mut res = vec![0.0; n];

        if plaintext.level > 0 {
            let q_big = &self.big_q_chain[plaintext.level];
            let q_half = q_big >> 1;
            let lifted = q.poly_to_bigint(&self.polypool, plaintext.level);
            for (i, x) in lifted.into_iter().enumerate() {
                res[i] = centered_to_f64(&x, q_big, &q_half) / plaintext.scale;
            }
        } else {
            let q0 = q.moduli[0];
            for (i, &c) in self.polypool.coeffs[0].iter().enumerate() {
                res[i] = if c >= q0 >> 1 {
                    -((q0 - c) as f64)
                } else {
                    c as f64
                } / plaintext.scale;
            }
        }
        Ok(res)
    }

    /// Scaled standard deviation of the slot-domain difference of two
    /// vectors.
    pub fn err_std_freq_dom(
        &mut self,
        values_want: &[Complex64],
        values_have: &[Complex64],
        scale: f64,
    ) -> f64 {
        for i in 0..values_want.len() {
            let err = values_want[i] - values_have[i];
            self.values_float[2 * i] = err.re;
            self.values_float[2 * i + 1] = err.im;
        }
        standard_deviation(&self.values_float[..values_want.len() * 2], scale)
    }

    /// Scaled standard deviation of the coefficient-domain difference of
    /// two slot vectors.
    pub fn err_std_time_dom(
        &mut self,
        values_want: &[Complex64],
        values_have: &[Complex64],
        scale: f64,
    ) -> f64 {
        for i in 0..values_want.len() {
            self.values[i] = values_want[i] - values_have[i];
        }
        invfft(
            &mut self.values,
            values_want.len(),
            self.m,
            &self.rot_group,
            &self.roots,
        );
        for i in 0..values_want.len() {
            self.values_float[2 * i] = self.values[i].re;
            self.values_float[2 * i + 1] = self.values[i].im;
        }
        standard_deviation(&self.values_float[..values_want.len() * 2], scale)
    }

    fn plaintext_to_complex(&mut self, level: usize, scale: f64, log_slots: u32) {
        let q0 = self.ctx.ctx_q.moduli[0];
        let slots = 1usize << log_slots;
        let max_slots = self.ctx.params.ring_degree >> 1;
        let gap = max_slots / slots;

        if scale < q0 as f64 || level == 0 {
            // the coefficients fit below q_0: read them off directly
            let coeffs = &self.polypool.coeffs[0];
            for i in 0..slots {
                let idx = i * gap;
                let re = if coeffs[idx] >= q0 >> 1 {
                    -((q0 - coeffs[idx]) as f64)
                } else {
                    coeffs[idx] as f64
                };
                let im = if coeffs[idx + max_slots] >= q0 >> 1 {
                    -((q0 - coeffs[idx + max_slots]) as f64)
                } else {
                    coeffs[idx + max_slots] as f64
                };
                self.values[i] = Complex64::new(re, im) / scale;
            }
        } else {
            let q_big = self.big_q_chain[level].clone();
            let q_half = &q_big >> 1;
            let lifted = self.ctx.ctx_q.poly_to_bigint(&self.polypool, level);
            for i in 0..slots {
                let idx = i * gap;
                let re = centered_to_f64(&lifted[idx], &q_big, &q_half);
                let im = centered_to_f64(&lifted[idx + max_slots], &q_big, &q_half);
                self.values[i] = Complex64::new(re, im) / scale;
            }
        }
    }
}

/// Center x ∈ [0, Q) around Q/2 and convert to f64.
fn centered_to_f64(x: &BigUint, q: &BigUint, q_half: &BigUint) -> f64 {
    if x >= q_half {
        let neg = BigInt::from(x.clone()) - BigInt::from(q.clone());
        debug_assert!(neg.is_negative());
        neg.to_f64().unwrap_or(0.0)
    } else {
        x.to_f64().unwrap_or(0.0)
    }
}

/// Multiply by the scale, round once, and spread the rounded integer into
/// every residue row.
pub(crate) fn scale_up_vec_exact(values: &[f64], scale: f64, moduli: &[u64], pol: &mut RnsPoly) {
    for (u, &value) in values.iter().enumerate() {
        let scaled = value * scale;
        if scaled.abs() < 9.007199254740992e15 {
            // exact in f64 and in a word
            let rounded = scaled.round() as i64;
            for (v, &qi) in moduli.iter().enumerate() {
                pol.coeffs[v][u] = if rounded >= 0 {
                    rounded as u64 % qi
                } else {
                    (qi - ((-rounded) as u64 % qi)) % qi
                };
            }
        } else {
            let rounded = BigInt::from_f64(scaled.round()).unwrap_or_default();
            for (v, &qi) in moduli.iter().enumerate() {
                let qi_big = BigInt::from(qi);
                let mut r = &rounded % &qi_big;
                if r.is_negative() {
                    r += &qi_big;
                }
                pol.coeffs[v][u] = r.to_u64().unwrap_or(0);
            }
        }
    }
}

/// Iterative forward FFT over the slot subgroup: bit-reversal first, then
/// butterflies over lengths 2, 4, …, n.
pub(crate) fn fft(
    values: &mut [Complex64],
    n: usize,
    m: usize,
    rot_group: &[usize],
    roots: &[Complex64],
) {
    bit_reverse_in_place(values, n);

    let mut len = 2usize;
    while len <= n {
        let lenh = len >> 1;
        let lenq = len << 2;
        let gap = m / lenq;
        let mut i = 0;
        while i < n {
            for j in 0..lenh {
                let idx = (rot_group[j] % lenq) * gap;
                let u = values[i + j];
                let v = values[i + j + lenh] * roots[idx];
                values[i + j] = u + v;
                values[i + j + lenh] = u - v;
            }
            i += len;
        }
        len <<= 1;
    }
}

/// Inverse of `fft`: butterflies over lengths n, n/2, …, 2, then the 1/n
/// normalization and the closing bit-reversal.
pub(crate) fn invfft(
    values: &mut [Complex64],
    n: usize,
    m: usize,
    rot_group: &[usize],
    roots: &[Complex64],
) {
    let mut len = n;
    while len >= 1 {
        let lenh = len >> 1;
        let lenq = len << 2;
        let gap = m / lenq;
        let mut i = 0;
        while i < n {
            for j in 0..lenh {
                let idx = (lenq - (rot_group[j] % lenq)) * gap;
                let u = values[i + j] + values[i + j + lenh];
                let v = (values[i + j] - values[i + j + lenh]) * roots[idx];
                values[i + j] = u;
                values[i + j + lenh] = v;
            }
            i += len;
        }
        len >>= 1;
    }

    for v in values.iter_mut().take(n) {
        *v /= n as f64;
    }

    bit_reverse_in_place(values, n);
}

fn bit_reverse_in_place(values: &mut [Complex64], n: usize) {
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = bit_reverse(i, bits);
        if j > i {
            values.swap(i, j);
        }
    }
}

fn standard_deviation(vec: &[f64], scale: f64) -> f64 {
    let mean = vec.iter().sum::<f64>() / vec.len() as f64;
    let var = vec.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / vec.len() as f64;
    var.sqrt() * scale
}
