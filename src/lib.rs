//! # Trellis: BFV + CKKS homomorphic evaluation core
//!
//! Arithmetic engine for two RLWE schemes over the negacyclic ring
//! R_Q = Z_Q[X]/(X^N+1) in RNS (multi-modulus residue) representation:
//!
//! - **BFV** (exact integers mod t): ciphertext addition, scalar
//!   multiplication, tensor-and-rescale multiplication, relinearization,
//!   key switching, Galois slot rotations and inner sums.
//! - **CKKS** (approximate complex numbers): the canonical-embedding
//!   encoder/decoder between C^{N/2} and R_Q, in double and arbitrary
//!   precision.
//!
//! ## Quick Start
//!
//! ```no_run
//! use trellis::prelude::*;
//!
//! let params = trellis::params::presets::toy_bfv().unwrap();
//! let ctx = BfvContext::new(params).unwrap();
//!
//! let sk = trellis::bfv::keygen::gen_secret_key(&ctx).unwrap();
//! let rlk = trellis::bfv::keygen::gen_relin_key(&ctx, &sk, 2).unwrap();
//!
//! let pt1 = encode_scalar(&ctx, 3).unwrap();
//! let pt2 = encode_scalar(&ctx, 7).unwrap();
//! let ct1 = encrypt_sk(&ctx, &pt1, &sk).unwrap();
//! let ct2 = encrypt_sk(&ctx, &pt2, &sk).unwrap();
//!
//! let mut eval = Evaluator::new(&ctx).unwrap();
//! let prod = eval.mul_new(&ct1, &ct2).unwrap();
//! let prod = Ciphertext::from_element(prod).unwrap();
//! let prod = eval.relinearize_new(&prod, &rlk).unwrap();
//!
//! let decrypted = decrypt(&ctx, &prod, &sk).unwrap();
//! assert_eq!(decode_scalar(&decrypted), 21);
//! ```

pub mod error;
pub mod params;
pub mod ring;
pub mod sampling;
pub mod bfv;
pub mod ckks;

/// Convenient re-exports for common types and functions.
pub mod prelude {
    pub use crate::error::{Result, TrellisError};
    pub use crate::params::{BfvParams, BfvParamsBuilder, CkksParams};
    pub use crate::ring::{RnsContext, RnsPoly};
    pub use crate::bfv::{
        BfvContext, BfvElement, Ciphertext, Operand, Plaintext,
        encoding::{decode_scalar, decode_simd, encode_scalar, encode_simd},
        encrypt::{decrypt, encrypt_pk, encrypt_sk},
        eval::Evaluator,
        keygen::{EvaluationKey, PublicKey, RotationKeys, SecretKey, SwitchingKey},
    };
    pub use crate::ckks::{
        encoder::Encoder,
        CkksContext,
    };
}
