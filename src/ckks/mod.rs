pub mod big_encoder;
pub mod encoder;

pub use big_encoder::BigComplexEncoder;
pub use encoder::Encoder;

use std::sync::Arc;

use crate::error::{Result, TrellisError};
use crate::params::CkksParams;
use crate::ring::poly::{RnsContext, RnsPoly};

/// Immutable CKKS context: the ring context for the modulus chain Q.
/// Shared read-only between encoders.
#[derive(Debug)]
pub struct CkksContext {
    pub params: Arc<CkksParams>,
    pub ctx_q: RnsContext,
}

impl CkksContext {
    pub fn new(params: Arc<CkksParams>) -> Result<Arc<Self>> {
        let ctx_q = RnsContext::new(params.moduli.clone(), params.ring_degree)?;
        Ok(Arc::new(Self { params, ctx_q }))
    }

    /// Allocate a zeroed plaintext at the given level carrying the given
    /// scale.
    pub fn new_plaintext(&self, level: usize, scale: f64) -> Result<Plaintext> {
        if level > self.params.max_level() {
            return Err(TrellisError::InvalidParam(format!(
                "level {level} exceeds the modulus chain (max {})",
                self.params.max_level()
            )));
        }
        Ok(Plaintext {
            value: RnsPoly {
                coeffs: vec![vec![0u64; self.params.ring_degree]; level + 1],
            },
            scale,
            level,
            is_ntt: false,
        })
    }
}

/// CKKS plaintext: a polynomial over the chain truncated to `level`, with
/// the scale Δ the decoder divides back out.
#[derive(Clone, Debug, PartialEq)]
pub struct Plaintext {
    pub value: RnsPoly,
    pub scale: f64,
    pub level: usize,
    pub is_ntt: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::presets::toy_ckks;

    #[test]
    fn test_plaintext_levels() {
        let ctx = CkksContext::new(toy_ckks().unwrap()).unwrap();
        let pt = ctx.new_plaintext(1, (1u64 << 30) as f64).unwrap();
        assert_eq!(pt.value.num_rows(), 2);
        assert_eq!(pt.level, 1);
        assert!(!pt.is_ntt);
        assert!(ctx.new_plaintext(10, 1.0).is_err());
    }
}
