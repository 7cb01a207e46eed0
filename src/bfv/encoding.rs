use crate::bfv::{BfvContext, BfvElement, Plaintext};
use crate::error::{Result, TrellisError};
use crate::ring::modular::mod_mul;
use crate::ring::ntt::bit_reverse;
use crate::ring::poly::RnsPoly;

/// Encode a scalar m ∈ Z_t as the constant polynomial and lift it.
pub fn encode_scalar(ctx: &BfvContext, m: u64) -> Result<Plaintext> {
    if m >= ctx.plain_modulus() {
        return Err(TrellisError::InvalidParam(format!(
            "plaintext {} >= plain_modulus {}",
            m,
            ctx.plain_modulus()
        )));
    }
    let mut coeffs = vec![0u64; ctx.ring_degree()];
    coeffs[0] = m;
    lift_to_plaintext(ctx, &coeffs)
}

/// Decode a scalar from a decrypted message polynomial (coefficient 0).
pub fn decode_scalar(msg: &[u64]) -> u64 {
    msg[0]
}

/// Encode a vector into the plaintext slots (SIMD batching).
///
/// The ring Z_t[X]/(X^n+1) with t ≡ 1 (mod 2n) splits into n slots laid
/// out as two rows of n/2; column rotations shift each row cyclically and
/// the row rotation swaps them. Values are placed at the bit-reversed
/// positions of the powers of the Galois generator, then carried out of
/// the evaluation domain by an inverse NTT over Z_t.
pub fn encode_simd(ctx: &BfvContext, values: &[u64]) -> Result<Plaintext> {
    let n = ctx.ring_degree();
    let t = ctx.plain_modulus();
    if values.len() > n {
        return Err(TrellisError::DimensionMismatch {
            expected: n,
            got: values.len(),
        });
    }
    for &v in values {
        if v >= t {
            return Err(TrellisError::InvalidParam(format!(
                "plaintext {v} >= plain_modulus {t}"
            )));
        }
    }
    let ctx_t = batching_context(ctx)?;
    let index = index_matrix(ctx);

    let mut slots = vec![0u64; n];
    for (i, &v) in values.iter().enumerate() {
        slots[index[i]] = v;
    }
    let mut msg = RnsPoly {
        coeffs: vec![slots],
    };
    ctx_t.inv_ntt(&mut msg);
    lift_to_plaintext(ctx, &msg.coeffs[0])
}

/// Decode the first `num_slots` slot values from a decrypted message
/// polynomial.
pub fn decode_simd(ctx: &BfvContext, msg: &[u64], num_slots: usize) -> Result<Vec<u64>> {
    let ctx_t = batching_context(ctx)?;
    let index = index_matrix(ctx);

    let mut p = RnsPoly {
        coeffs: vec![msg.to_vec()],
    };
    ctx_t.ntt(&mut p);
    Ok((0..num_slots).map(|i| p.coeffs[0][index[i]]).collect())
}

/// Lift a message polynomial m ∈ Z_t[X]/(X^n+1) to the degree-0 element
/// Δ·m over Q (coefficient domain).
pub fn lift_to_plaintext(ctx: &BfvContext, msg: &[u64]) -> Result<Plaintext> {
    let n = ctx.ring_degree();
    if msg.len() != n {
        return Err(TrellisError::DimensionMismatch {
            expected: n,
            got: msg.len(),
        });
    }
    let q = &ctx.ctx_q;
    let rows: Vec<Vec<u64>> = q
        .moduli
        .iter()
        .enumerate()
        .map(|(i, &qi)| {
            let delta_i = ctx.delta_residues[i];
            let bk = q.barrett_ks[i];
            msg.iter().map(|&m| mod_mul(m % qi, delta_i, qi, bk)).collect()
        })
        .collect();
    Ok(Plaintext {
        el: BfvElement {
            value: vec![RnsPoly { coeffs: rows }],
            is_ntt: false,
        },
    })
}

fn batching_context(ctx: &BfvContext) -> Result<&crate::ring::poly::RnsContext> {
    ctx.ctx_t.as_ref().ok_or_else(|| {
        TrellisError::InvalidParam(format!(
            "batching requires t ≡ 1 (mod {}), got t = {}",
            2 * ctx.ring_degree(),
            ctx.plain_modulus()
        ))
    })
}

/// Slot i ↔ NTT position of the i-th power of the Galois generator: the
/// first row walks gen^i, the second its negated coset.
fn index_matrix(ctx: &BfvContext) -> Vec<usize> {
    let n = ctx.ring_degree();
    let log_n = n.trailing_zeros();
    let m = 2 * n as u64;
    let row_size = n >> 1;

    let mut index = vec![0usize; n];
    let mut pos = 1u64;
    for i in 0..row_size {
        let index1 = ((pos - 1) >> 1) as usize;
        let index2 = ((m - pos - 1) >> 1) as usize;
        index[i] = bit_reverse(index1, log_n);
        index[i | row_size] = bit_reverse(index2, log_n);
        pos = pos * ctx.gen % m;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::presets::toy_bfv;

    #[test]
    fn test_index_matrix_is_permutation() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut index = index_matrix(&ctx);
        index.sort_unstable();
        let expected: Vec<usize> = (0..ctx.ring_degree()).collect();
        assert_eq!(index, expected);
    }

    #[test]
    fn test_simd_roundtrip_through_message_domain() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let values = vec![1u64, 2, 3, 4, 5, 6, 7, 8];

        // encode, then undo the Δ-lift by reading the message back out of
        // the slot transform only
        let ctx_t = ctx.ctx_t.as_ref().unwrap();
        let index = index_matrix(&ctx);
        let mut slots = vec![0u64; ctx.ring_degree()];
        for (i, &v) in values.iter().enumerate() {
            slots[index[i]] = v;
        }
        let mut msg = RnsPoly { coeffs: vec![slots] };
        ctx_t.inv_ntt(&mut msg);
        let decoded = decode_simd(&ctx, &msg.coeffs[0], values.len()).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_scalar_rejects_out_of_range() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        assert!(encode_scalar(&ctx, 70000).is_err());
    }

    #[test]
    fn test_lift_scales_by_delta() {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut msg = vec![0u64; ctx.ring_degree()];
        msg[0] = 3;
        let pt = lift_to_plaintext(&ctx, &msg).unwrap();
        for (i, &qi) in ctx.ctx_q.moduli.iter().enumerate() {
            let expected =
                (3u128 * ctx.delta_residues[i] as u128 % qi as u128) as u64;
            assert_eq!(pt.el.value[0].coeffs[i][0], expected);
        }
    }
}
