use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::bfv::keygen::{PublicKey, SecretKey};
use crate::bfv::{BfvContext, BfvElement, Ciphertext, Operand, Plaintext};
use crate::error::{Result, TrellisError};
use crate::sampling::{sample_binary_poly, sample_gaussian_poly, sample_uniform_poly};

/// Encrypt a plaintext lift using the public key:
/// ct = (pk0·u + e1 + Δ·m, pk1·u + e2), coefficient form.
pub fn encrypt_pk(ctx: &BfvContext, pt: &Plaintext, pk: &PublicKey) -> Result<Ciphertext> {
    let mut rng = ChaCha20Rng::from_os_rng();
    encrypt_pk_with_rng(ctx, pt, pk, &mut rng)
}

pub fn encrypt_pk_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    pt: &Plaintext,
    pk: &PublicKey,
    rng: &mut R,
) -> Result<Ciphertext> {
    let q = &ctx.ctx_q;

    let mut dm = pt.el.value[0].clone();
    q.ntt(&mut dm);

    let mut u = sample_binary_poly(q, rng);
    q.ntt(&mut u);
    let mut u_m = q.new_poly();
    q.mform(&u, &mut u_m);

    let mut e1 = sample_gaussian_poly(q, ctx.params.sigma, rng);
    q.ntt(&mut e1);
    let mut e2 = sample_gaussian_poly(q, ctx.params.sigma, rng);
    q.ntt(&mut e2);

    // c0 = pk0·u + e1 + Δ·m
    let mut c0 = e1;
    q.mul_coeffs_montgomery_and_add(&u_m, &pk.pk0, &mut c0);
    q.add_assign(&mut c0, &dm);

    // c1 = pk1·u + e2
    let mut c1 = e2;
    q.mul_coeffs_montgomery_and_add(&u_m, &pk.pk1, &mut c1);

    q.inv_ntt(&mut c0);
    q.inv_ntt(&mut c1);

    Ok(Ciphertext {
        el: BfvElement {
            value: vec![c0, c1],
            is_ntt: false,
        },
    })
}

/// Encrypt a plaintext lift using the secret key:
/// ct = (-(a·s) + e + Δ·m, a), coefficient form.
pub fn encrypt_sk(ctx: &BfvContext, pt: &Plaintext, sk: &SecretKey) -> Result<Ciphertext> {
    let mut rng = ChaCha20Rng::from_os_rng();
    encrypt_sk_with_rng(ctx, pt, sk, &mut rng)
}

pub fn encrypt_sk_with_rng<R: rand::Rng>(
    ctx: &BfvContext,
    pt: &Plaintext,
    sk: &SecretKey,
    rng: &mut R,
) -> Result<Ciphertext> {
    let q = &ctx.ctx_q;

    let mut dm = pt.el.value[0].clone();
    q.ntt(&mut dm);

    let a = sample_uniform_poly(q, rng);
    let mut a_m = q.new_poly();
    q.mform(&a, &mut a_m);

    let mut e = sample_gaussian_poly(q, ctx.params.sigma, rng);
    q.ntt(&mut e);

    // c0 = -(a·s) + e + Δ·m
    let mut a_s = q.new_poly();
    q.mul_coeffs_montgomery(&a_m, &sk.poly, &mut a_s);
    let mut c0 = q.new_poly();
    q.neg(&a_s, &mut c0);
    q.add_assign(&mut c0, &e);
    q.add_assign(&mut c0, &dm);

    let mut c1 = a;
    q.inv_ntt(&mut c0);
    q.inv_ntt(&mut c1);

    Ok(Ciphertext {
        el: BfvElement {
            value: vec![c0, c1],
            is_ntt: false,
        },
    })
}

/// Decrypt a ciphertext (or any element-bearing operand) of any degree:
/// accumulate the phase c0 + c1·s + c2·s² + …, CRT-lift it and round by
/// t/Q. Returns the message polynomial coefficients mod t.
pub fn decrypt(ctx: &BfvContext, ct: &impl Operand, sk: &SecretKey) -> Result<Vec<u64>> {
    let q = &ctx.ctx_q;
    let el = ct.element();

    let mut s_m = q.new_poly();
    q.mform(&sk.poly, &mut s_m);

    // phase accumulation in the NTT domain
    let mut phase = el.value[0].clone();
    if !el.is_ntt {
        q.ntt(&mut phase);
    }
    let mut s_pow_m = s_m.clone();
    for i in 1..el.value.len() {
        let mut ci = el.value[i].clone();
        if !el.is_ntt {
            q.ntt(&mut ci);
        }
        q.mul_coeffs_montgomery_and_add(&s_pow_m, &ci, &mut phase);
        if i + 1 < el.value.len() {
            let mut next = q.new_poly();
            q.mul_coeffs_montgomery(&s_m, &s_pow_m, &mut next);
            s_pow_m = next;
        }
    }
    q.inv_ntt(&mut phase);

    // m_i = round(t · phase_i / Q) mod t
    let t = ctx.plain_modulus();
    let t_big = BigUint::from(t);
    let level = q.num_moduli() - 1;
    let q_big = q.modulus_product(level);
    let half_q = &q_big >> 1;

    let lifted = q.poly_to_bigint(&phase, level);
    lifted
        .into_iter()
        .map(|x| {
            let scaled: BigUint = (&x * &t_big + &half_q) / &q_big;
            (scaled % &t_big).to_u64().ok_or_else(|| {
                TrellisError::InvalidParam("decrypted coefficient does not fit in u64".into())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfv::encoding::{decode_scalar, decode_simd, encode_scalar, encode_simd};
    use crate::bfv::keygen::{gen_public_key_with_rng, gen_secret_key_with_rng};
    use crate::params::presets::{compact_bfv, toy_bfv};

    #[test]
    fn test_encrypt_decrypt_sk() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);

        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        for value in [0u64, 1, 42, 65536] {
            let pt = encode_scalar(&ctx, value).unwrap();
            let ct = encrypt_sk_with_rng(&ctx, &pt, &sk, &mut rng).unwrap();
            let decrypted = decrypt(&ctx, &ct, &sk).unwrap();
            assert_eq!(decode_scalar(&decrypted), value);
        }
    }

    #[test]
    fn test_encrypt_decrypt_pk() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);

        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let pk = gen_public_key_with_rng(&ctx, &sk, &mut rng).unwrap();

        let pt = encode_scalar(&ctx, 100).unwrap();
        let ct = encrypt_pk_with_rng(&ctx, &pt, &pk, &mut rng).unwrap();
        let decrypted = decrypt(&ctx, &ct, &sk).unwrap();
        assert_eq!(decode_scalar(&decrypted), 100);
    }

    #[test]
    fn test_encrypt_decrypt_simd() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(7);

        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let values = vec![1u64, 2, 3, 4, 10, 20, 30, 40];
        let pt = encode_simd(&ctx, &values).unwrap();
        let ct = encrypt_sk_with_rng(&ctx, &pt, &sk, &mut rng).unwrap();
        let decrypted = decrypt(&ctx, &ct, &sk).unwrap();
        let decoded = decode_simd(&ctx, &decrypted, values.len()).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_encrypt_decrypt_larger_ring() {
        let ctx = BfvContext::new(compact_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(31415);

        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let pt = encode_scalar(&ctx, 12345).unwrap();
        let ct = encrypt_sk_with_rng(&ctx, &pt, &sk, &mut rng).unwrap();
        let decrypted = decrypt(&ctx, &ct, &sk).unwrap();
        assert_eq!(decode_scalar(&decrypted), 12345);
    }
}
