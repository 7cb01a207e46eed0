use std::collections::HashMap;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use zeroize::Zeroize;

use crate::bfv::BfvContext;
use crate::error::Result;
use crate::ring::modular::{mod_add, mod_mul, mod_pow};
use crate::ring::poly::RnsPoly;
use crate::sampling::{sample_gaussian_poly, sample_ternary_poly, sample_uniform_poly};

/// BFV secret key: ternary s ∈ R_Q, stored in RNS-NTT form.
pub struct SecretKey {
    pub poly: RnsPoly,
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        // Zero out secret key material
        for row in &mut self.poly.coeffs {
            row.zeroize();
        }
    }
}

/// BFV public key: pk = (pk0, pk1) = (-(a·s + e), a), RNS-NTT form.
#[derive(Clone, Debug)]
pub struct PublicKey {
    pub pk0: RnsPoly,
    pub pk1: RnsPoly,
}

/// Digit-decomposed key-switching key from some s' to s.
///
/// `evakey[i][j]` holds the pair for RNS modulus i and digit position j;
/// for every i the digit dimension has ⌈bits(q_i)/β⌉ entries. Entry (i,j)
/// encrypts s'·2^{j·β}·u_i, u_i the CRT idempotent of q_i, so that summing
/// digit·key over the table reassembles c₂·s'. Both polynomials are stored
/// in NTT + Montgomery form, ready for the accumulation loop.
#[derive(Clone, Debug)]
pub struct SwitchingKey {
    pub evakey: Vec<Vec<(RnsPoly, RnsPoly)>>,
    pub bit_decomp: u64,
}

/// Relinearization material: keys[d-2] switches the degree-d component
/// (i.e. encrypts s^d) down to the linear part.
#[derive(Clone, Debug)]
pub struct EvaluationKey {
    pub keys: Vec<SwitchingKey>,
}

/// Galois rotation keys: column rotations by k (left and right) and the
/// row involution. The evaluator's power-of-two path requires `col_left`
/// and `col_right` to be complete over {1, 2, 4, …, n/4}.
#[derive(Clone, Debug, Default)]
pub struct RotationKeys {
    pub col_left: HashMap<u64, SwitchingKey>,
    pub col_right: HashMap<u64, SwitchingKey>,
    pub row: Option<SwitchingKey>,
}

impl RotationKeys {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Generate a secret key (ternary distribution).
pub fn gen_secret_key(ctx: &BfvContext) -> Result<SecretKey> {
    let mut rng = ChaCha20Rng::from_os_rng();
    gen_secret_key_with_rng(ctx, &mut rng)
}

pub fn gen_secret_key_with_rng<R: rand::Rng>(ctx: &BfvContext, rng: &mut R) -> Result<SecretKey> {
    let mut poly = sample_ternary_poly(&ctx.ctx_q, rng);
    ctx.ctx_q.ntt(&mut poly);
    Ok(SecretKey { poly })
}

/// Generate a public key from a secret key.
pub fn gen_public_key(ctx: &BfvContext, sk: &SecretKey) -> Result<PublicKey> {
    let mut rng = ChaCha20Rng::from_os_rng();
    gen_public_key_with_rng(ctx, sk, &mut rng)
}

pub fn gen_public_key_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    sk: &SecretKey,
    rng: &mut R,
) -> Result<PublicKey> {
    let q = &ctx.ctx_q;

    // a uniform in NTT form; e Gaussian, carried into NTT
    let a = sample_uniform_poly(q, rng);
    let mut e = sample_gaussian_poly(q, ctx.params.sigma, rng);
    q.ntt(&mut e);

    // pk0 = -(a·s + e)
    let mut a_m = q.new_poly();
    q.mform(&a, &mut a_m);
    let mut pk0 = q.new_poly();
    q.mul_coeffs_montgomery(&a_m, &sk.poly, &mut pk0);
    q.add_assign(&mut pk0, &e);
    let mut neg = q.new_poly();
    q.neg(&pk0, &mut neg);

    Ok(PublicKey { pk0: neg, pk1: a })
}

/// Generate the raw switching-key table encrypting `s_in` (NTT form)
/// under `sk`.
///
/// The accumulation in `switch_keys` lands on top of the receiver's own
/// (c0, c1) pair, whose c1·s term survives. A key that moves c2 off a
/// *different* secret s' must therefore encrypt s' − s (see
/// `gen_key_switching_key_with_rng` and the rotation key generators);
/// relinearization keys encrypt s^d directly because the eliminated
/// component is extra on top of the linear part.
pub fn gen_switching_key_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    sk: &SecretKey,
    s_in: &RnsPoly,
    rng: &mut R,
) -> Result<SwitchingKey> {
    let q = &ctx.ctx_q;
    let n = ctx.ring_degree();
    let beta = ctx.params.bit_decomp;

    let mut evakey = Vec::with_capacity(q.num_moduli());
    for (i, &qi) in q.moduli.iter().enumerate() {
        let bits = 64 - qi.leading_zeros() as u64;
        let bit_log = bits.div_ceil(beta) as usize;
        let bki = q.barrett_ks[i];

        let mut digits = Vec::with_capacity(bit_log);
        for j in 0..bit_log {
            let a = sample_uniform_poly(q, rng);
            let mut key0 = sample_gaussian_poly(q, ctx.params.sigma, rng);
            q.ntt(&mut key0);

            // key0 = e - a·s
            let mut a_s = q.new_poly();
            let mut a_m = q.new_poly();
            q.mform(&a, &mut a_m);
            q.mul_coeffs_montgomery(&a_m, &sk.poly, &mut a_s);
            q.sub_assign(&mut key0, &a_s);

            // fold s'·2^{jβ} into the q_i row only (the CRT idempotent)
            let pw2 = mod_pow(2, j as u64 * beta, qi);
            for u in 0..n {
                let w = mod_mul(s_in.coeffs[i][u], pw2, qi, bki);
                key0.coeffs[i][u] = mod_add(key0.coeffs[i][u], w, qi);
            }

            let mut key0_m = q.new_poly();
            q.mform(&key0, &mut key0_m);
            digits.push((key0_m, a_m));
        }
        evakey.push(digits);
    }

    Ok(SwitchingKey {
        evakey,
        bit_decomp: beta,
    })
}

/// Generate a key re-encrypting ciphertexts from `sk_in` to `sk_out`.
pub fn gen_key_switching_key(
    ctx: &BfvContext,
    sk_in: &SecretKey,
    sk_out: &SecretKey,
) -> Result<SwitchingKey> {
    let mut rng = ChaCha20Rng::from_os_rng();
    gen_key_switching_key_with_rng(ctx, sk_in, sk_out, &mut rng)
}

pub fn gen_key_switching_key_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    sk_in: &SecretKey,
    sk_out: &SecretKey,
    rng: &mut R,
) -> Result<SwitchingKey> {
    let q = &ctx.ctx_q;
    let mut delta = sk_in.poly.clone();
    q.sub_assign(&mut delta, &sk_out.poly);
    gen_switching_key_with_rng(ctx, sk_out, &delta, rng)
}

/// Generate an evaluation key covering ciphertext degrees 2..=max_degree.
pub fn gen_relin_key(ctx: &BfvContext, sk: &SecretKey, max_degree: usize) -> Result<EvaluationKey> {
    let mut rng = ChaCha20Rng::from_os_rng();
    gen_relin_key_with_rng(ctx, sk, max_degree, &mut rng)
}

pub fn gen_relin_key_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    sk: &SecretKey,
    max_degree: usize,
    rng: &mut R,
) -> Result<EvaluationKey> {
    let q = &ctx.ctx_q;
    let mut sk_m = q.new_poly();
    q.mform(&sk.poly, &mut sk_m);

    // s^d for d = 2..=max_degree, in NTT form
    let mut s_pow = sk.poly.clone();
    let mut keys = Vec::with_capacity(max_degree.saturating_sub(1));
    for _d in 2..=max_degree.max(2) {
        let mut next = q.new_poly();
        q.mul_coeffs_montgomery(&sk_m, &s_pow, &mut next);
        s_pow = next;
        keys.push(gen_switching_key_with_rng(ctx, sk, &s_pow, rng)?);
    }

    Ok(EvaluationKey { keys })
}

/// Generate the column rotation key by k to the left.
pub fn gen_rotation_key_left_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    sk: &SecretKey,
    k: u64,
    keys: &mut RotationKeys,
    rng: &mut R,
) -> Result<()> {
    let gal = ctx.gal_el_rot_col_left[(k as usize) & ((ctx.ring_degree() >> 1) - 1)];
    let mut s_rot = ctx.ctx_q.new_poly();
    ctx.ctx_q.permute_ntt(&sk.poly, gal, &mut s_rot);
    ctx.ctx_q.sub_assign(&mut s_rot, &sk.poly);
    keys.col_left
        .insert(k, gen_switching_key_with_rng(ctx, sk, &s_rot, rng)?);
    Ok(())
}

/// Generate the column rotation key by k to the right.
pub fn gen_rotation_key_right_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    sk: &SecretKey,
    k: u64,
    keys: &mut RotationKeys,
    rng: &mut R,
) -> Result<()> {
    let gal = ctx.gal_el_rot_col_right[(k as usize) & ((ctx.ring_degree() >> 1) - 1)];
    let mut s_rot = ctx.ctx_q.new_poly();
    ctx.ctx_q.permute_ntt(&sk.poly, gal, &mut s_rot);
    ctx.ctx_q.sub_assign(&mut s_rot, &sk.poly);
    keys.col_right
        .insert(k, gen_switching_key_with_rng(ctx, sk, &s_rot, rng)?);
    Ok(())
}

/// Generate the row-swap key (X → X^{2n-1}).
pub fn gen_rotation_key_row_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    sk: &SecretKey,
    keys: &mut RotationKeys,
    rng: &mut R,
) -> Result<()> {
    let mut s_rot = ctx.ctx_q.new_poly();
    ctx.ctx_q.permute_ntt(&sk.poly, ctx.gal_el_rot_row, &mut s_rot);
    ctx.ctx_q.sub_assign(&mut s_rot, &sk.poly);
    keys.row = Some(gen_switching_key_with_rng(ctx, sk, &s_rot, rng)?);
    Ok(())
}

/// Generate the full power-of-two rotation key set (left and right for
/// k = 1, 2, 4, …, n/4) plus the row key: everything InnerSum and the
/// generic column rotation need.
pub fn gen_rotation_keys_pow2(ctx: &BfvContext, sk: &SecretKey) -> Result<RotationKeys> {
    let mut rng = ChaCha20Rng::from_os_rng();
    gen_rotation_keys_pow2_with_rng(ctx, sk, &mut rng)
}

pub fn gen_rotation_keys_pow2_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    sk: &SecretKey,
    rng: &mut R,
) -> Result<RotationKeys> {
    let mut keys = RotationKeys::new();
    let mut k = 1u64;
    while k < (ctx.ring_degree() as u64) >> 1 {
        gen_rotation_key_left_with_rng(ctx, sk, k, &mut keys, rng)?;
        gen_rotation_key_right_with_rng(ctx, sk, k, &mut keys, rng)?;
        k <<= 1;
    }
    gen_rotation_key_row_with_rng(ctx, sk, &mut keys, rng)?;
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::presets::toy_bfv;

    #[test]
    fn test_keygen_shapes() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let pk = gen_public_key_with_rng(&ctx, &sk, &mut rng).unwrap();
        assert_eq!(sk.poly.num_rows(), ctx.ctx_q.num_moduli());
        assert_eq!(pk.pk0.num_rows(), ctx.ctx_q.num_moduli());
    }

    #[test]
    fn test_switching_key_digit_widths() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let rlk = gen_relin_key_with_rng(&ctx, &sk, 2, &mut rng).unwrap();
        assert_eq!(rlk.keys.len(), 1);

        let swk = &rlk.keys[0];
        assert_eq!(swk.evakey.len(), ctx.ctx_q.num_moduli());
        for (i, &qi) in ctx.ctx_q.moduli.iter().enumerate() {
            let bits = 64 - qi.leading_zeros() as u64;
            let expected = bits.div_ceil(swk.bit_decomp) as usize;
            assert_eq!(swk.evakey[i].len(), expected, "modulus {qi}");
        }
    }

    #[test]
    fn test_pow2_rotation_key_coverage() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let keys = gen_rotation_keys_pow2_with_rng(&ctx, &sk, &mut rng).unwrap();

        let mut k = 1u64;
        while k < (ctx.ring_degree() as u64) >> 1 {
            assert!(keys.col_left.contains_key(&k));
            assert!(keys.col_right.contains_key(&k));
            k <<= 1;
        }
        assert!(keys.row.is_some());
    }
}
