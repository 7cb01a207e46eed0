use rand::Rng;

use crate::ring::modular::mod_add;
use crate::ring::poly::{RnsContext, RnsPoly};
use crate::sampling::uniform::signed_to_rns;

/// Sample a polynomial with coefficients from a discrete Gaussian
/// distribution with standard deviation σ, mapped into every residue row.
pub fn sample_gaussian_poly<R: Rng>(ctx: &RnsContext, sigma: f64, rng: &mut R) -> RnsPoly {
    let signed: Vec<i64> = (0..ctx.ring_degree)
        .map(|_| sample_discrete_gaussian(sigma, rng))
        .collect();
    signed_to_rns(ctx, &signed)
}

/// Sample a discrete Gaussian polynomial truncated to |x| ≤ bound and add it
/// in place to the first level+1 rows of `p`. Used for noise flooding in
/// public decoding, where the bound is ⌊σ·√(2π)⌋.
pub fn read_and_add_lvl<R: Rng>(
    ctx: &RnsContext,
    level: usize,
    sigma: f64,
    bound: u64,
    p: &mut RnsPoly,
    rng: &mut R,
) {
    for u in 0..ctx.ring_degree {
        let x = loop {
            let s = sample_discrete_gaussian(sigma, rng);
            if s.unsigned_abs() <= bound {
                break s;
            }
        };
        for (v, &q) in ctx.moduli.iter().enumerate().take(level + 1) {
            let r = if x >= 0 {
                x as u64 % q
            } else {
                (q - ((-x) as u64 % q)) % q
            };
            p.coeffs[v][u] = mod_add(p.coeffs[v][u], r, q);
        }
    }
}

/// Sample a single value from the discrete Gaussian distribution over Z
/// with standard deviation σ, centered at 0.
///
/// Uses a constant-time CDT (cumulative distribution table) approach for
/// small σ. For σ = 3.2, we only need to consider values in [-19, 19].
///
/// The scan is branchless: every CDF entry is visited and a conditional
/// select (using bitwise ops on integer masks) determines the result,
/// avoiding data-dependent branches that could leak timing information.
pub fn sample_discrete_gaussian<R: Rng>(sigma: f64, rng: &mut R) -> i64 {
    let tail = (6.0 * sigma).ceil() as i64;

    // CDT: precompute cumulative probabilities (unnormalized)
    let table_size = (2 * tail + 1) as usize;
    let mut cdf = Vec::with_capacity(table_size);
    let mut cumulative = 0.0f64;
    let two_sigma_sq = 2.0 * sigma * sigma;

    for x in -tail..=tail {
        let prob = (-((x * x) as f64) / two_sigma_sq).exp();
        cumulative += prob;
        cdf.push(cumulative);
    }

    let total = cumulative;
    let u: f64 = rng.random::<f64>() * total;

    // Branchless constant-time scan: iterate in reverse, always selecting
    // the lowest index i where u < cdf[i].
    let mut result = tail;
    for i in (0..table_size).rev() {
        let cmp = u < cdf[i];
        let mask = (cmp as i64).wrapping_neg(); // 0 → 0, 1 → -1 (all bits set)
        let candidate = -tail + i as i64;
        result = (candidate & mask) | (result & !mask);
    }

    result
}
