use crate::bfv::eval::Evaluator;
use crate::bfv::keygen::{EvaluationKey, SwitchingKey};
use crate::bfv::{BfvElement, Ciphertext};
use crate::error::{Result, TrellisError};
use crate::ring::poly::{RnsContext, RnsPoly};

/// Accumulate the key-switched contribution of `c2` into the first two
/// polynomials of `out`:
///
///   out[0] += Σ_{i,j} evk[i][j][0] · (c2)_{i,j}
///   out[1] += Σ_{i,j} evk[i][j][1] · (c2)_{i,j}
///
/// where (c2)_{i,j} is the j-th base-2^β digit of the i-th RNS component of
/// c2, replicated across all modulus rows and carried into the NTT domain.
/// `c2` must be in coefficient form, out[0] and out[1] in NTT form.
///
/// The accumulation is lazy (no per-product reduction); every 8th product a
/// full Reduce is applied, plus a trailing Reduce unless the last window
/// just closed. The window bound (previous canonical value plus eight
/// sub-2q products) requires q_i < 2^59, enforced at parameter build.
pub(crate) fn switch_keys_core(
    ctx_q: &RnsContext,
    c2: &RnsPoly,
    key: &SwitchingKey,
    c2_digit: &mut RnsPoly,
    out: &mut BfvElement,
) {
    let n = ctx_q.ring_degree;
    let k = ctx_q.num_moduli();
    let mask = (1u64 << key.bit_decomp) - 1;
    let mut reduce = 0u64;

    for i in 0..k {
        let bit_log = key.evakey[i].len();
        for j in 0..bit_log {
            let shift = j as u64 * key.bit_decomp;
            for u in 0..n {
                let digit = (c2.coeffs[i][u] >> shift) & mask;
                for row in c2_digit.coeffs.iter_mut().take(k) {
                    row[u] = digit;
                }
            }
            ctx_q.ntt(c2_digit);

            let (evk0, evk1) = &key.evakey[i][j];
            ctx_q.mul_coeffs_montgomery_and_add_no_mod(evk0, c2_digit, &mut out.value[0]);
            ctx_q.mul_coeffs_montgomery_and_add_no_mod(evk1, c2_digit, &mut out.value[1]);

            if reduce & 7 == 7 {
                ctx_q.reduce_assign(&mut out.value[0]);
                ctx_q.reduce_assign(&mut out.value[1]);
            }
            reduce += 1;
        }
    }

    if reduce.wrapping_sub(1) & 7 != 7 {
        ctx_q.reduce_assign(&mut out.value[0]);
        ctx_q.reduce_assign(&mut out.value[1]);
    }
}

impl Evaluator {
    /// Relinearize `ct_in` of degree ≥ 2 down to degree 1.
    ///
    /// The evaluation key must cover every degree being eliminated: a
    /// degree-3 ciphertext needs the switching keys for degrees 3 and 2.
    pub fn relinearize(
        &mut self,
        ct_in: &Ciphertext,
        evk: &EvaluationKey,
        out: &mut Ciphertext,
    ) -> Result<()> {
        let d = ct_in.el.degree();
        if d < 2 {
            return Err(TrellisError::DegreeTooSmallForRelin);
        }
        if d - 1 > evk.keys.len() {
            return Err(TrellisError::DegreeTooLargeForEvalKey {
                degree: d,
                keys: evk.keys.len(),
            });
        }

        let ctx_q = &self.ctx.ctx_q;
        let c2_digit = &mut self.polypool[3];

        ctx_q.copy(&ct_in.el.value[0], &mut out.el.value[0]);
        ctx_q.copy(&ct_in.el.value[1], &mut out.el.value[1]);
        ctx_q.ntt(&mut out.el.value[0]);
        ctx_q.ntt(&mut out.el.value[1]);

        for deg in (2..=d).rev() {
            switch_keys_core(
                ctx_q,
                &ct_in.el.value[deg],
                &evk.keys[deg - 2],
                c2_digit,
                &mut out.el,
            );
        }

        out.el.value.truncate(2);
        ctx_q.inv_ntt(&mut out.el.value[0]);
        ctx_q.inv_ntt(&mut out.el.value[1]);
        out.el.is_ntt = false;
        Ok(())
    }

    /// Relinearize into a freshly allocated degree-1 ciphertext.
    pub fn relinearize_new(&mut self, ct_in: &Ciphertext, evk: &EvaluationKey) -> Result<Ciphertext> {
        let d = ct_in.el.degree();
        if d < 2 {
            return Err(TrellisError::DegreeTooSmallForRelin);
        }
        if d - 1 > evk.keys.len() {
            return Err(TrellisError::DegreeTooLargeForEvalKey {
                degree: d,
                keys: evk.keys.len(),
            });
        }
        let mut out = self.ctx.new_ciphertext(1);
        self.relinearize(ct_in, evk, &mut out)?;
        Ok(out)
    }

    /// Re-encrypt a degree-1 ciphertext under the key the switching key
    /// targets. Both input and receiver must be of degree exactly 1.
    pub fn switch_keys(
        &mut self,
        ct_in: &Ciphertext,
        key: &SwitchingKey,
        out: &mut Ciphertext,
    ) -> Result<()> {
        if ct_in.el.degree() != 1 {
            return Err(TrellisError::KeySwitchDegreeInvalid(ct_in.el.degree()));
        }
        if out.el.degree() != 1 {
            return Err(TrellisError::KeySwitchDegreeInvalid(out.el.degree()));
        }

        let ctx_q = &self.ctx.ctx_q;
        let c2_digit = &mut self.polypool[3];

        ctx_q.copy(&ct_in.el.value[0], &mut out.el.value[0]);
        ctx_q.copy(&ct_in.el.value[1], &mut out.el.value[1]);
        ctx_q.ntt(&mut out.el.value[0]);
        ctx_q.ntt(&mut out.el.value[1]);

        switch_keys_core(ctx_q, &ct_in.el.value[1], key, c2_digit, &mut out.el);

        ctx_q.inv_ntt(&mut out.el.value[0]);
        ctx_q.inv_ntt(&mut out.el.value[1]);
        out.el.is_ntt = false;
        Ok(())
    }

    /// Key-switch into a freshly allocated ciphertext. Degree 0 is
    /// rejected, same as the in-place form.
    pub fn switch_keys_new(&mut self, ct_in: &Ciphertext, key: &SwitchingKey) -> Result<Ciphertext> {
        if ct_in.el.degree() != 1 {
            return Err(TrellisError::KeySwitchDegreeInvalid(ct_in.el.degree()));
        }
        let mut out = self.ctx.new_ciphertext(1);
        self.switch_keys(ct_in, key, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfv::encoding::{decode_scalar, encode_scalar};
    use crate::bfv::encrypt::{decrypt, encrypt_sk_with_rng};
    use crate::bfv::keygen::{
        gen_key_switching_key_with_rng, gen_relin_key_with_rng, gen_secret_key_with_rng,
    };
    use crate::bfv::BfvContext;
    use crate::params::presets::toy_bfv;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_mul_then_relinearize() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let rlk = gen_relin_key_with_rng(&ctx, &sk, 2, &mut rng).unwrap();
        let mut eval = Evaluator::new(&ctx).unwrap();

        for (a, b) in [(3u64, 7u64), (10, 20), (0, 5), (255, 255)] {
            let pt_a = encode_scalar(&ctx, a).unwrap();
            let pt_b = encode_scalar(&ctx, b).unwrap();
            let ct_a = encrypt_sk_with_rng(&ctx, &pt_a, &sk, &mut rng).unwrap();
            let ct_b = encrypt_sk_with_rng(&ctx, &pt_b, &sk, &mut rng).unwrap();

            let prod = eval.mul_new(&ct_a, &ct_b).unwrap();
            let prod_ct = Ciphertext { el: prod };
            let lin = eval.relinearize_new(&prod_ct, &rlk).unwrap();
            assert_eq!(lin.el.degree(), 1);

            let dec = decrypt(&ctx, &lin, &sk).unwrap();
            assert_eq!(decode_scalar(&dec), a * b % ctx.plain_modulus());
        }
    }

    #[test]
    fn test_relinearize_rejects_linear_input() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let rlk = gen_relin_key_with_rng(&ctx, &sk, 2, &mut rng).unwrap();
        let mut eval = Evaluator::new(&ctx).unwrap();

        let pt = encode_scalar(&ctx, 5).unwrap();
        let ct = encrypt_sk_with_rng(&ctx, &pt, &sk, &mut rng).unwrap();
        assert!(matches!(
            eval.relinearize_new(&ct, &rlk),
            Err(TrellisError::DegreeTooSmallForRelin)
        ));
    }

    #[test]
    fn test_relinearize_rejects_short_key() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let rlk = gen_relin_key_with_rng(&ctx, &sk, 2, &mut rng).unwrap();
        let mut eval = Evaluator::new(&ctx).unwrap();

        // degree-3 ciphertext needs keys for degrees 3 and 2
        let ct3 = ctx.new_ciphertext(3);
        assert!(matches!(
            eval.relinearize_new(&ct3, &rlk),
            Err(TrellisError::DegreeTooLargeForEvalKey { degree: 3, keys: 1 })
        ));
    }

    #[test]
    fn test_switch_keys_changes_secret() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk1 = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let sk2 = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let swk = gen_key_switching_key_with_rng(&ctx, &sk1, &sk2, &mut rng).unwrap();
        let mut eval = Evaluator::new(&ctx).unwrap();

        let pt = encode_scalar(&ctx, 321).unwrap();
        let ct = encrypt_sk_with_rng(&ctx, &pt, &sk1, &mut rng).unwrap();
        let switched = eval.switch_keys_new(&ct, &swk).unwrap();

        let dec = decrypt(&ctx, &switched, &sk2).unwrap();
        assert_eq!(decode_scalar(&dec), 321);
    }

    #[test]
    fn test_switch_keys_rejects_degree_zero() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let swk = gen_key_switching_key_with_rng(&ctx, &sk, &sk, &mut rng).unwrap();
        let mut eval = Evaluator::new(&ctx).unwrap();

        let mut deg0 = Ciphertext {
            el: ctx.new_element(0),
        };
        let err = eval.switch_keys_new(&deg0, &swk);
        assert!(matches!(err, Err(TrellisError::KeySwitchDegreeInvalid(0))));

        let ct2 = ctx.new_ciphertext(1);
        let err = eval.switch_keys(&ct2, &swk, &mut deg0);
        assert!(matches!(err, Err(TrellisError::KeySwitchDegreeInvalid(_))));
    }
}
