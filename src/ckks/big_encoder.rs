use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rug::{Assign, Complex, Float, Integer};

use crate::ckks::{CkksContext, Plaintext};
use crate::error::{Result, TrellisError};
use crate::ring::modular::mod_inv;
use crate::ring::poly::RnsPoly;
use crate::sampling::read_and_add_lvl;

/// π to one thousand digits; parsed at the encoder's working precision so
/// the roots of unity carry no double-rounding from f64.
const PI: &str = "3.1415926535897932384626433832795028841971693993751058209749445923078164062862089986280348253421170679821480865132823066470938446095505822317253594081284811174502841027019385211055596446229489549303819644288109756659334461284756482337867831652712019091456485669234603486104543266482133936072602491412737245870066063155881748815209209628292540917153643678925903600113305305488204665213841469519415116094330572703657595919530921861173819326117931051185480744623799627495673518857527248912279381830119491298336733624406566430860213949463952247371907021798609437027705392171762931767523846748184676694051320005681271452635608277857713427577896091736371787214684409012249534301465495853710507922796892589235420199561121290219608640344181598136297747713099605187072113499999983729780499510597317328160963185950244594553469083026425223082533446850352619311881710100031378387528865875332083814206171776691473035982534904287554687311595628638823537875937519577818577805321712268066130019278766111959092164201989";

/// Canonical-embedding encoder over arbitrary-precision complex
/// arithmetic. Behaviourally equivalent to `Encoder` in the
/// exact-arithmetic limit; used where the double-precision pipeline's
/// rounding dominates the error budget.
///
/// Holds thread-unsafe scratch, like its f64 sibling.
pub struct BigComplexEncoder {
    ctx: Arc<CkksContext>,
    prec: u32,
    m: usize,
    rot_group: Vec<usize>,
    roots: Vec<Complex>,
    values: Vec<Complex>,
    values_float: Vec<Float>,
    /// q_0…q_ℓ products and CRT reconstruction terms per level.
    big_q_chain: Vec<Integer>,
    crt_terms: Vec<Vec<Integer>>,
    polypool: RnsPoly,
    rng: ChaCha20Rng,
}

impl BigComplexEncoder {
    pub fn new(ctx: &Arc<CkksContext>, log_precision: u32) -> Result<Self> {
        let n = ctx.params.ring_degree;
        let m = 2 * n;
        let prec = log_precision;

        let mut rot_group = vec![0usize; n >> 1];
        let mut five_pows = 1usize;
        for slot in rot_group.iter_mut() {
            *slot = five_pows;
            five_pows = five_pows * 5 & (m - 1);
        }

        let pi = Float::with_val(
            prec,
            Float::parse(PI).map_err(|_| TrellisError::InvalidParam("unparsable π literal".into()))?,
        );
        let mut pi_half = pi.clone();
        pi_half /= 2u32;

        let mut roots = Vec::with_capacity(m + 1);
        for i in 0..m {
            let mut angle = Float::with_val(prec, 2u32);
            angle *= &pi;
            angle *= i as u64;
            angle /= m as u64;

            let real = angle.clone().cos();
            let mut shifted = pi_half.clone();
            shifted -= &angle;
            let imag = shifted.cos();

            roots.push(Complex::with_val(prec, (real, imag)));
        }
        roots.push(roots[0].clone());

        let k = ctx.ctx_q.num_moduli();
        let mut big_q_chain = Vec::with_capacity(k);
        let mut crt_terms = Vec::with_capacity(k);
        for level in 0..k {
            let mut q_big = Integer::from(1u32);
            for &qi in &ctx.ctx_q.moduli[..=level] {
                q_big *= qi;
            }
            let terms = ctx.ctx_q.moduli[..=level]
                .iter()
                .map(|&qi| {
                    let star = Integer::from(&q_big / qi);
                    let star_mod = Integer::from(&star % qi).to_u64().unwrap_or(0);
                    let inv = mod_inv(star_mod, qi).ok_or(TrellisError::ModulusMismatch)?;
                    Ok(star * inv)
                })
                .collect::<Result<Vec<_>>>()?;
            big_q_chain.push(q_big);
            crt_terms.push(terms);
        }

        let values = (0..n >> 1).map(|_| Complex::new(prec)).collect();
        let values_float = (0..n).map(|_| Float::new(prec)).collect();

        Ok(Self {
            ctx: ctx.clone(),
            prec,
            m,
            rot_group,
            roots,
            values,
            values_float,
            big_q_chain,
            crt_terms,
            polypool: ctx.ctx_q.new_poly(),
            rng: ChaCha20Rng::from_os_rng(),
        })
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

    /// Encode exactly 2^log_slots values onto the given plaintext.
    pub fn encode(
        &mut self,
        plaintext: &mut Plaintext,
        values: &[Complex],
        log_slots: u32,
    ) -> Result<()> {
        let slots = self.check_slots(log_slots)?;
        if values.len() != slots {
            return Err(TrellisError::DimensionMismatch {
                expected: slots,
                got: values.len(),
            });
        }

        for (dst, src) in self.values.iter_mut().zip(values.iter()) {
            dst.assign(src);
        }

        inv_fft_in_place(&mut self.values, slots, self.m, &self.rot_group, &self.roots, self.prec);

        for v in self.values_float.iter_mut() {
            v.assign(0u32);
        }
        let max_slots = self.ctx.params.ring_degree >> 1;
        let gap = max_slots / slots;
        for i in 0..slots {
            self.values_float[i * gap].assign(self.values[i].real());
            self.values_float[max_slots + i * gap].assign(self.values[i].imag());
        }

        scale_up_vec_exact_big_float(
            &self.values_float,
            plaintext.scale,
            &self.ctx.ctx_q.moduli[..=plaintext.level],
            &mut plaintext.value,
            self.prec,
        );

        self.wipe_internal_memory();
        plaintext.is_ntt = false;
        Ok(())
    }

    pub fn encode_new(&mut self, values: &[Complex], log_slots: u32) -> Result<Plaintext> {
        self.encode_at_lvl_new(self.ctx.params.max_level(), values, log_slots)
    }

    pub fn encode_at_lvl_new(
        &mut self,
        level: usize,
        values: &[Complex],
        log_slots: u32,
    ) -> Result<Plaintext> {
        let mut plaintext = self.ctx.new_plaintext(level, self.ctx.params.scale)?;
        self.encode(&mut plaintext, values, log_slots)?;
        Ok(plaintext)
    }

    pub fn encode_ntt(
        &mut self,
        plaintext: &mut Plaintext,
        values: &[Complex],
        log_slots: u32,
    ) -> Result<()> {
        self.encode(plaintext, values, log_slots)?;
        self.ctx.ctx_q.ntt_lvl(plaintext.level, &mut plaintext.value);
        plaintext.is_ntt = true;
        Ok(())
    }

    pub fn encode_ntt_at_lvl_new(
        &mut self,
        level: usize,
        values: &[Complex],
        log_slots: u32,
    ) -> Result<Plaintext> {
        let mut plaintext = self.ctx.new_plaintext(level, self.ctx.params.scale)?;
        self.encode_ntt(&mut plaintext, values, log_slots)?;
        Ok(plaintext)
    }

    pub fn decode(&mut self, plaintext: &Plaintext, log_slots: u32) -> Result<Vec<Complex>> {
        self.decode_internal(plaintext, log_slots, 0.0)
    }

    pub fn decode_public(
        &mut self,
        plaintext: &Plaintext,
        log_slots: u32,
        sigma: f64,
    ) -> Result<Vec<Complex>> {
        self.decode_internal(plaintext, log_slots, sigma)
    }

    fn decode_internal(
        &mut self,
        plaintext: &Plaintext,
        log_slots: u32,
        sigma: f64,
    ) -> Result<Vec<Complex>> {
        let slots = self.check_slots(log_slots)?;
        let q = &self.ctx.ctx_q;

        q.copy_lvl(plaintext.level, &plaintext.value, &mut self.polypool);
        if plaintext.is_ntt {
            q.inv_ntt_lvl(plaintext.level, &mut self.polypool);
        }

        if sigma != 0.0 {
            // B = ⌊σ·√(2π) + 1/2⌋
            read_and_add_lvl(
                q,
                plaintext.level,
                sigma,
                (2.5066282746310002 * sigma + 0.5) as u64,
                &mut self.polypool,
                &mut self.rng,
            );
        }

        let q_big = &self.big_q_chain[plaintext.level];
        let q_half = Integer::from(q_big >> 1u32);
        let terms = &self.crt_terms[plaintext.level];

        let max_slots = self.ctx.params.ring_degree >> 1;
        let gap = max_slots / slots;
        let scale_flo = Float::with_val(self.prec, plaintext.scale);

        for i in 0..slots {
            let idx = i * gap;
            let re = reconstruct_centered(&self.polypool, terms, q_big, &q_half, idx);
            let im = reconstruct_centered(&self.polypool, terms, q_big, &q_half, idx + max_slots);

            let mut re_f = Float::with_val(self.prec, &re);
            re_f /= &scale_flo;
            let mut im_f = Float::with_val(self.prec, &im);
            im_f /= &scale_flo;
            self.values[i].assign((re_f, im_f));
        }

        fft_in_place(&mut self.values, slots, self.m, &self.rot_group, &self.roots, self.prec);

        let res: Vec<Complex> = self.values[..slots].to_vec();
        self.wipe_internal_memory();
        Ok(res)
    }

    /// Evaluate the decoding matrix in place on 2^k values.
    pub fn fft(&self, values: &mut [Complex], n: usize) {
        fft_in_place(values, n, self.m, &self.rot_group, &self.roots, self.prec);
    }

    /// Evaluate the encoding matrix in place on 2^k values.
    pub fn inv_fft(&self, values: &mut [Complex], n: usize) {
        inv_fft_in_place(values, n, self.m, &self.rot_group, &self.roots, self.prec);
    }

    pub fn wipe_internal_memory(&mut self) {
        for v in self.values.iter_mut() {
            v.assign((0u32, 0u32));
        }
        for v in self.values_float.iter_mut() {
            v.assign(0u32);
        }
    }
}

fn reconstruct_centered(
    pool: &RnsPoly,
    terms: &[Integer],
    q_big: &Integer,
    q_half: &Integer,
    idx: usize,
) -> Integer {
    let mut x = Integer::new();
    for (v, term) in terms.iter().enumerate() {
        x += Integer::from(term * pool.coeffs[v][idx]);
    }
    x %= q_big;
    if x >= *q_half {
        x -= q_big;
    }
    x
}

fn scale_up_vec_exact_big_float(
    values: &[Float],
    scale: f64,
    moduli: &[u64],
    pol: &mut RnsPoly,
    prec: u32,
) {
    let scale_flo = Float::with_val(prec, scale);
    for (u, value) in values.iter().enumerate() {
        let mut x = value.clone();
        x *= &scale_flo;
        let rounded = x.to_integer().unwrap_or_default();
        for (v, &qi) in moduli.iter().enumerate() {
            let mut r = rounded.clone() % qi;
            if r < 0 {
                r += qi;
            }
            pol.coeffs[v][u] = r.to_u64().unwrap_or(0);
        }
    }
}

fn inv_fft_in_place(
    values: &mut [Complex],
    n: usize,
    m: usize,
    rot_group: &[usize],
    roots: &[Complex],
    prec: u32,
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
                let u = Complex::with_val(prec, &values[i + j] + &values[i + j + lenh]);
                let mut v = Complex::with_val(prec, &values[i + j] - &values[i + j + lenh]);
                v *= &roots[idx];
                values[i + j].assign(u);
                values[i + j + lenh].assign(v);
            }
            i += len;
        }
        len >>= 1;
    }

    for v in values.iter_mut().take(n) {
        *v /= n as u32;
    }

    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = crate::ring::ntt::bit_reverse(i, bits);
        if j > i {
            values.swap(i, j);
        }
    }
}

fn fft_in_place(
    values: &mut [Complex],
    n: usize,
    m: usize,
    rot_group: &[usize],
    roots: &[Complex],
    prec: u32,
) {
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = crate::ring::ntt::bit_reverse(i, bits);
        if j > i {
            values.swap(i, j);
        }
    }

    let mut len = 2usize;
    while len <= n {
        let lenh = len >> 1;
        let lenq = len << 2;
        let gap = m / lenq;
        let mut i = 0;
        while i < n {
            for j in 0..lenh {
                let idx = (rot_group[j] % lenq) * gap;
                let u = values[i + j].clone();
                let mut v = values[i + j + lenh].clone();
                v *= &roots[idx];
                values[i + j].assign(Complex::with_val(prec, &u + &v));
                values[i + j + lenh].assign(Complex::with_val(prec, &u - &v));
            }
            i += len;
        }
        len <<= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ckks::encoder::Encoder;
    use crate::params::presets::toy_ckks;
    use num_complex::Complex64;

    const PREC: u32 = 128;

    fn setup() -> (Arc<CkksContext>, BigComplexEncoder) {
        let ctx = CkksContext::new(toy_ckks().unwrap()).unwrap();
        let enc = BigComplexEncoder::new(&ctx, PREC).unwrap();
        (ctx, enc)
    }

    fn big(re: f64, im: f64) -> Complex {
        Complex::with_val(PREC, (re, im))
    }

    fn dist(a: &Complex, b: &Complex) -> f64 {
        let dr = a.real().to_f64() - b.real().to_f64();
        let di = a.imag().to_f64() - b.imag().to_f64();
        (dr * dr + di * di).sqrt()
    }

    #[test]
    fn test_roots_quarter_turn() {
        let (_, enc) = setup();
        // roots[m/4] = e^{iπ/2} = i
        let r = &enc.roots[enc.m / 4];
        assert!(r.real().to_f64().abs() < 1e-30);
        assert!((r.imag().to_f64() - 1.0).abs() < 1e-30);
    }

    #[test]
    fn test_fft_inv_fft_identity() {
        let (_, enc) = setup();
        let n = 8;
        let original: Vec<Complex> = (0..n)
            .map(|i| big(i as f64 * 0.5 - 1.0, (i * i) as f64 * 0.25))
            .collect();
        let mut work = original.clone();
        enc.inv_fft(&mut work, n);
        enc.fft(&mut work, n);
        for (w, o) in work.iter().zip(original.iter()) {
            assert!(dist(w, o) < 1e-30);
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let (_, mut enc) = setup();
        let v = vec![big(1.0, 0.0), big(0.0, 1.0), big(2.0, 3.0), big(0.5, -0.5)];
        let pt = enc.encode_new(&v, 2).unwrap();
        let decoded = enc.decode(&pt, 2).unwrap();
        for (w, h) in v.iter().zip(decoded.iter()) {
            assert!(dist(w, h) < 2.0_f64.powi(-25));
        }
    }

    #[test]
    fn test_matches_double_precision_encoder() {
        let (ctx, mut enc) = setup();
        let mut enc64 = Encoder::new(&ctx);

        let v_big = vec![big(1.25, -0.5), big(-3.0, 2.0)];
        let v64 = vec![Complex64::new(1.25, -0.5), Complex64::new(-3.0, 2.0)];

        let pt_big = enc.encode_new(&v_big, 1).unwrap();
        let decoded64 = enc64.decode(
            &crate::ckks::Plaintext {
                value: pt_big.value.clone(),
                scale: pt_big.scale,
                level: pt_big.level,
                is_ntt: pt_big.is_ntt,
            },
            1,
        )
        .unwrap();

        for (w, h) in v64.iter().zip(decoded64.iter()) {
            assert!((w - h).norm() < 2.0_f64.powi(-20), "{w} vs {h}");
        }
    }

    #[test]
    fn test_encode_requires_exact_slot_count() {
        let (_, mut enc) = setup();
        let v = vec![big(1.0, 0.0); 3];
        assert!(enc.encode_new(&v, 2).is_err());
    }
}
