use rand::Rng;

use crate::ring::poly::{RnsContext, RnsPoly};

/// Sample a polynomial with independently uniform residues in [0, q_v) for
/// every modulus row. By CRT this is the uniform distribution over R_Q.
pub fn sample_uniform_poly<R: Rng>(ctx: &RnsContext, rng: &mut R) -> RnsPoly {
    let rows = ctx
        .moduli
        .iter()
        .map(|&q| {
            // Rejection sampling to avoid bias
            let mask = if q.is_power_of_two() {
                q - 1
            } else {
                (1u64 << (64 - q.leading_zeros())) - 1
            };
            (0..ctx.ring_degree)
                .map(|_| loop {
                    let val = rng.random::<u64>() & mask;
                    if val < q {
                        break val;
                    }
                })
                .collect()
        })
        .collect();
    RnsPoly { coeffs: rows }
}

/// Sample a polynomial with ternary coefficients {-1, 0, 1}, each with
/// probability 1/3, replicated across all modulus rows.
pub fn sample_ternary_poly<R: Rng>(ctx: &RnsContext, rng: &mut R) -> RnsPoly {
    let signed: Vec<i64> = (0..ctx.ring_degree)
        .map(|_| {
            // Rejection sampling on 2 bits for uniform {0,1,2}
            let val = loop {
                let r = rng.random::<u8>() & 0x03;
                if r < 3 {
                    break r;
                }
            };
            val as i64 - 1
        })
        .collect();
    signed_to_rns(ctx, &signed)
}

/// Sample a polynomial with binary coefficients {0, 1}.
pub fn sample_binary_poly<R: Rng>(ctx: &RnsContext, rng: &mut R) -> RnsPoly {
    let bits: Vec<u64> = (0..ctx.ring_degree).map(|_| rng.random::<u64>() & 1).collect();
    let rows = ctx.moduli.iter().map(|_| bits.clone()).collect();
    RnsPoly { coeffs: rows }
}

pub(crate) fn signed_to_rns(ctx: &RnsContext, signed: &[i64]) -> RnsPoly {
    let rows = ctx
        .moduli
        .iter()
        .map(|&q| {
            signed
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
    RnsPoly { coeffs: rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn ctx() -> RnsContext {
        RnsContext::new(vec![65537, 786433], 1024).unwrap()
    }

    #[test]
    fn test_uniform_in_range() {
        let ctx = ctx();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let poly = sample_uniform_poly(&ctx, &mut rng);
        for (v, &q) in ctx.moduli.iter().enumerate() {
            for &c in &poly.coeffs[v] {
                assert!(c < q);
            }
        }
    }

    #[test]
    fn test_ternary_balance() {
        let ctx = ctx();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let q = ctx.moduli[0];
        let poly = sample_ternary_poly(&ctx, &mut rng);
        let mut zeros = 0;
        let mut ones = 0;
        let mut neg_ones = 0;
        for &c in &poly.coeffs[0] {
            match c {
                0 => zeros += 1,
                1 => ones += 1,
                c if c == q - 1 => neg_ones += 1,
                c => panic!("invalid ternary coeff: {c}"),
            }
        }
        assert!(zeros > 200 && zeros < 500, "zeros = {zeros}");
        assert!(ones > 200 && ones < 500, "ones = {ones}");
        assert!(neg_ones > 200 && neg_ones < 500, "neg_ones = {neg_ones}");
        // rows agree as ring elements
        for u in 0..ctx.ring_degree {
            let c0 = poly.coeffs[0][u];
            let c1 = poly.coeffs[1][u];
            let want = match c0 {
                0 => 0,
                1 => 1,
                _ => ctx.moduli[1] - 1,
            };
            assert_eq!(c1, want);
        }
    }

    #[test]
    fn test_binary() {
        let ctx = ctx();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let poly = sample_binary_poly(&ctx, &mut rng);
        for &c in &poly.coeffs[0] {
            assert!(c == 0 || c == 1);
        }
    }
}
