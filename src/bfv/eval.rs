use std::sync::Arc;

use crate::bfv::{BfvContext, BfvElement, Operand, OperandMut};
use crate::error::{Result, TrellisError};
use crate::ring::extend::{BasisExtender, RnsScaler};
use crate::ring::poly::{RnsContext, RnsPoly};

/// Homomorphic evaluator for BFV ciphertexts and plaintext lifts.
///
/// Owns a small memory pool (four Q·P-sized work polynomials and three work
/// elements of degree capacity 4) that every operation stages through, so
/// the hot path never allocates. An Evaluator is single-threaded: all
/// operations take `&mut self`. Run independent Evaluators for parallelism;
/// the context and all keys are shared read-only.
pub struct Evaluator {
    pub(crate) ctx: Arc<BfvContext>,
    pub(crate) basis_extender: BasisExtender,
    pub(crate) scaler: RnsScaler,
    pub(crate) polypool: [RnsPoly; 4],
    pub(crate) ctpool: [BfvElement; 3],
}

impl Evaluator {
    pub fn new(ctx: &Arc<BfvContext>) -> Result<Self> {
        let basis_extender = BasisExtender::new(&ctx.ctx_q, &ctx.ctx_p)?;
        let scaler = RnsScaler::new(ctx.plain_modulus(), &ctx.ctx_q, &ctx.ctx_qp)?;
        let polypool = [
            ctx.ctx_qp.new_poly(),
            ctx.ctx_qp.new_poly(),
            ctx.ctx_qp.new_poly(),
            ctx.ctx_qp.new_poly(),
        ];
        let ctpool = [
            ctx.new_element_qp(4),
            ctx.new_element_qp(4),
            ctx.new_element_qp(4),
        ];
        Ok(Self {
            ctx: ctx.clone(),
            basis_extender,
            scaler,
            polypool,
            ctpool,
        })
    }

    pub fn context(&self) -> &Arc<BfvContext> {
        &self.ctx
    }

    fn check_binary(&self, op0: &BfvElement, op1: &BfvElement, out: &BfvElement) -> Result<()> {
        let required = op0.degree().max(op1.degree());
        if out.degree() < required {
            return Err(TrellisError::ReceiverDegreeTooSmall {
                required,
                got: out.degree(),
            });
        }
        Ok(())
    }

    fn check_unary(&self, op0: &BfvElement, out: &BfvElement) -> Result<()> {
        if out.degree() < op0.degree() {
            return Err(TrellisError::ReceiverDegreeTooSmall {
                required: op0.degree(),
                got: out.degree(),
            });
        }
        Ok(())
    }

    /// Apply `f` componentwise over the common degree, then copy the tail
    /// of the higher-degree operand: degree-mixed operations behave as if
    /// the shorter operand were zero-padded.
    fn evaluate_binary(
        ctx_q: &RnsContext,
        el0: &BfvElement,
        el1: &BfvElement,
        out: &mut BfvElement,
        f: impl Fn(&RnsContext, &RnsPoly, &RnsPoly, &mut RnsPoly),
    ) {
        let min_degree = el0.degree().min(el1.degree());
        for i in 0..=min_degree {
            f(ctx_q, &el0.value[i], &el1.value[i], &mut out.value[i]);
        }
        let largest = if el0.degree() > el1.degree() {
            Some(el0)
        } else if el1.degree() > el0.degree() {
            Some(el1)
        } else {
            None
        };
        if let Some(largest) = largest {
            for i in min_degree + 1..=largest.degree() {
                ctx_q.copy(&largest.value[i], &mut out.value[i]);
            }
        }
        out.is_ntt = el0.is_ntt;
    }

    fn evaluate_unary(
        ctx_q: &RnsContext,
        el0: &BfvElement,
        out: &mut BfvElement,
        f: impl Fn(&RnsContext, &RnsPoly, &mut RnsPoly),
    ) {
        for i in 0..=el0.degree() {
            f(ctx_q, &el0.value[i], &mut out.value[i]);
        }
        out.is_ntt = el0.is_ntt;
    }

    /// out = op0 + op1.
    pub fn add(
        &mut self,
        op0: &impl Operand,
        op1: &impl Operand,
        out: &mut impl OperandMut,
    ) -> Result<()> {
        let (el0, el1) = (op0.element(), op1.element());
        self.check_binary(el0, el1, out.element())?;
        Self::evaluate_binary(&self.ctx.ctx_q, el0, el1, out.element_mut(), |c, a, b, o| {
            c.add(a, b, o)
        });
        Ok(())
    }

    /// out = op0 + op1, allocating the receiver.
    pub fn add_new(&mut self, op0: &impl Operand, op1: &impl Operand) -> Result<BfvElement> {
        let mut out = self.ctx.new_element(op0.degree().max(op1.degree()));
        self.add(op0, op1, &mut out)?;
        Ok(out)
    }

    /// out = op0 + op1 without modular reduction.
    pub fn add_no_mod(
        &mut self,
        op0: &impl Operand,
        op1: &impl Operand,
        out: &mut impl OperandMut,
    ) -> Result<()> {
        let (el0, el1) = (op0.element(), op1.element());
        self.check_binary(el0, el1, out.element())?;
        Self::evaluate_binary(&self.ctx.ctx_q, el0, el1, out.element_mut(), |c, a, b, o| {
            c.add_no_mod(a, b, o)
        });
        Ok(())
    }

    pub fn add_no_mod_new(&mut self, op0: &impl Operand, op1: &impl Operand) -> Result<BfvElement> {
        let mut out = self.ctx.new_element(op0.degree().max(op1.degree()));
        self.add_no_mod(op0, op1, &mut out)?;
        Ok(out)
    }

    /// out = op0 - op1.
    pub fn sub(
        &mut self,
        op0: &impl Operand,
        op1: &impl Operand,
        out: &mut impl OperandMut,
    ) -> Result<()> {
        let (el0, el1) = (op0.element(), op1.element());
        self.check_binary(el0, el1, out.element())?;
        Self::evaluate_binary(&self.ctx.ctx_q, el0, el1, out.element_mut(), |c, a, b, o| {
            c.sub(a, b, o)
        });
        Ok(())
    }

    pub fn sub_new(&mut self, op0: &impl Operand, op1: &impl Operand) -> Result<BfvElement> {
        let mut out = self.ctx.new_element(op0.degree().max(op1.degree()));
        self.sub(op0, op1, &mut out)?;
        Ok(out)
    }

    /// out = op0 - op1 without modular reduction (residues shifted by 2q).
    pub fn sub_no_mod(
        &mut self,
        op0: &impl Operand,
        op1: &impl Operand,
        out: &mut impl OperandMut,
    ) -> Result<()> {
        let (el0, el1) = (op0.element(), op1.element());
        self.check_binary(el0, el1, out.element())?;
        Self::evaluate_binary(&self.ctx.ctx_q, el0, el1, out.element_mut(), |c, a, b, o| {
            c.sub_no_mod(a, b, o)
        });
        Ok(())
    }

    pub fn sub_no_mod_new(&mut self, op0: &impl Operand, op1: &impl Operand) -> Result<BfvElement> {
        let mut out = self.ctx.new_element(op0.degree().max(op1.degree()));
        self.sub_no_mod(op0, op1, &mut out)?;
        Ok(out)
    }

    /// out = -op0.
    pub fn neg(&mut self, op0: &impl Operand, out: &mut impl OperandMut) -> Result<()> {
        let el0 = op0.element();
        self.check_unary(el0, out.element())?;
        Self::evaluate_unary(&self.ctx.ctx_q, el0, out.element_mut(), |c, a, o| c.neg(a, o));
        Ok(())
    }

    pub fn neg_new(&mut self, op0: &impl Operand) -> Result<BfvElement> {
        let mut out = self.ctx.new_element(op0.degree());
        self.neg(op0, &mut out)?;
        Ok(out)
    }

    /// Reduce every residue of op0 back to canonical range.
    pub fn reduce(&mut self, op0: &impl Operand, out: &mut impl OperandMut) -> Result<()> {
        let el0 = op0.element();
        self.check_unary(el0, out.element())?;
        Self::evaluate_unary(&self.ctx.ctx_q, el0, out.element_mut(), |c, a, o| {
            c.reduce(a, o)
        });
        Ok(())
    }

    pub fn reduce_new(&mut self, op0: &impl Operand) -> Result<BfvElement> {
        let mut out = self.ctx.new_element(op0.degree());
        self.reduce(op0, &mut out)?;
        Ok(out)
    }

    /// out = scalar · op0.
    pub fn mul_scalar(
        &mut self,
        op0: &impl Operand,
        scalar: u64,
        out: &mut impl OperandMut,
    ) -> Result<()> {
        let el0 = op0.element();
        self.check_unary(el0, out.element())?;
        Self::evaluate_unary(&self.ctx.ctx_q, el0, out.element_mut(), |c, a, o| {
            c.mul_scalar(a, scalar, o)
        });
        Ok(())
    }

    pub fn mul_scalar_new(&mut self, op0: &impl Operand, scalar: u64) -> Result<BfvElement> {
        let mut out = self.ctx.new_element(op0.degree());
        self.mul_scalar(op0, scalar, &mut out)?;
        Ok(out)
    }

    /// out = op0 · op1 (tensor-and-rescale). The receiver ends with degree
    /// deg(op0)+deg(op1); no relinearization is performed.
    pub fn mul(
        &mut self,
        op0: &impl Operand,
        op1: &impl Operand,
        out: &mut impl OperandMut,
    ) -> Result<()> {
        let (el0, el1) = (op0.element(), op1.element());
        let combined = el0.degree() + el1.degree();
        if combined > 4 {
            return Err(TrellisError::MulDegreeTooLarge(combined));
        }
        if out.element().degree() < combined {
            return Err(TrellisError::ReceiverDegreeTooSmall {
                required: combined,
                got: out.element().degree(),
            });
        }
        self.tensor_and_rescale(el0, el1, out.element_mut());
        Ok(())
    }

    pub fn mul_new(&mut self, op0: &impl Operand, op1: &impl Operand) -> Result<BfvElement> {
        let combined = op0.degree() + op1.degree();
        if combined > 4 {
            return Err(TrellisError::MulDegreeTooLarge(combined));
        }
        let mut out = self.ctx.new_element(combined);
        self.mul(op0, op1, &mut out)?;
        Ok(out)
    }

    /// Compute (op0 ⊗ op1) · (t/Q): lift both operands to the enlarged
    /// basis Q·P, tensor them in the NTT domain with Montgomery
    /// multiplications, then rescale each component back to Q.
    ///
    /// Squaring is detected by pointer identity of the operands and skips
    /// the second basis extension entirely.
    fn tensor_and_rescale(&mut self, ct0: &BfvElement, ct1: &BfvElement, out: &mut BfvElement) {
        let same = std::ptr::eq(ct0, ct1);
        let ctx = &self.ctx;
        let qp = &ctx.ctx_qp;
        let [c0, c1, tmp_out] = &mut self.ctpool;
        let [pp0, pp1, pp2, _] = &mut self.polypool;

        // Extend from Q to Q·P and enter the NTT domain
        for i in 0..=ct0.degree() {
            self.basis_extender.extend_basis(&ct0.value[i], &mut c0.value[i]);
            qp.ntt(&mut c0.value[i]);
        }
        if !same {
            for i in 0..=ct1.degree() {
                self.basis_extender.extend_basis(&ct1.value[i], &mut c1.value[i]);
                qp.ntt(&mut c1.value[i]);
            }
        }

        let combined = ct0.degree() + ct1.degree();

        if ct0.degree() == 1 && ct1.degree() == 1 {
            // degree-1 × degree-1 fast path
            qp.mform(&c0.value[0], pp0);
            qp.mform(&c0.value[1], pp1);

            if same {
                // d0 = a0·a0, d1 = 2·a0·a1, d2 = a1·a1
                let (head, tail) = tmp_out.value.split_at_mut(2);
                qp.mul_coeffs_montgomery(pp0, &c0.value[0], &mut head[0]);
                qp.mul_coeffs_montgomery(pp0, &c0.value[1], &mut head[1]);
                qp.double_assign(&mut head[1]);
                qp.mul_coeffs_montgomery(pp1, &c0.value[1], &mut tail[0]);
            } else {
                // d0 = a0·b0, d1 = a0·b1 + a1·b0, d2 = a1·b1
                let (head, tail) = tmp_out.value.split_at_mut(2);
                qp.mul_coeffs_montgomery(pp0, &c1.value[0], &mut head[0]);
                qp.mul_coeffs_montgomery(pp0, &c1.value[1], &mut head[1]);
                qp.mul_coeffs_montgomery_and_add_no_mod(pp1, &c1.value[0], &mut head[1]);
                // the transforms below expect canonical residues
                qp.reduce_assign(&mut head[1]);
                qp.mul_coeffs_montgomery(pp1, &c1.value[1], &mut tail[0]);
            }
        } else {
            for k in 0..=combined {
                qp.zero(&mut tmp_out.value[k]);
            }

            if same {
                // c1 doubles as the Montgomery-form copy of c0
                for i in 0..=ct0.degree() {
                    qp.mform(&c0.value[i], &mut c1.value[i]);
                }

                // cross terms, doubled before the diagonal is folded in
                for i in 0..=ct0.degree() {
                    for j in i + 1..=ct0.degree() {
                        qp.mul_coeffs_montgomery(&c1.value[i], &c0.value[j], pp2);
                        qp.double_assign(pp2);
                        qp.add_assign(&mut tmp_out.value[i + j], pp2);
                    }
                }
                for i in 0..=ct0.degree() {
                    qp.mul_coeffs_montgomery_and_add(
                        &c1.value[i],
                        &c0.value[i],
                        &mut tmp_out.value[i << 1],
                    );
                }
            } else {
                for i in 0..=ct0.degree() {
                    qp.mform_assign(&mut c0.value[i]);
                    for j in 0..=ct1.degree() {
                        qp.mul_coeffs_montgomery_and_add(
                            &c0.value[i],
                            &c1.value[j],
                            &mut tmp_out.value[i + j],
                        );
                    }
                }
            }
        }

        // Leave the NTT domain, rescale by t/Q and collapse the basis to Q
        for k in 0..=combined {
            qp.inv_ntt(&mut tmp_out.value[k]);
            self.scaler.scale(&tmp_out.value[k], &mut out.value[k]);
        }
        for k in combined + 1..=out.degree() {
            ctx.ctx_q.zero(&mut out.value[k]);
        }
        out.is_ntt = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfv::encoding::{decode_scalar, encode_scalar};
    use crate::bfv::encrypt::{decrypt, encrypt_sk_with_rng};
    use crate::bfv::keygen::gen_secret_key_with_rng;
    use crate::bfv::Ciphertext;
    use crate::params::presets::toy_bfv;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn setup() -> (
        Arc<BfvContext>,
        crate::bfv::keygen::SecretKey,
        Evaluator,
        ChaCha20Rng,
    ) {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let eval = Evaluator::new(&ctx).unwrap();
        (ctx, sk, eval, rng)
    }

    fn enc(ctx: &BfvContext, sk: &crate::bfv::keygen::SecretKey, rng: &mut ChaCha20Rng, m: u64) -> Ciphertext {
        let pt = encode_scalar(ctx, m).unwrap();
        encrypt_sk_with_rng(ctx, &pt, sk, rng).unwrap()
    }

    #[test]
    fn test_homomorphic_add() {
        let (ctx, sk, mut eval, mut rng) = setup();
        let ct1 = enc(&ctx, &sk, &mut rng, 10);
        let ct2 = enc(&ctx, &sk, &mut rng, 20);

        let sum = eval.add_new(&ct1, &ct2).unwrap();
        let sum_ct = Ciphertext { el: sum };
        let dec = decrypt(&ctx, &sum_ct, &sk).unwrap();
        assert_eq!(decode_scalar(&dec), 30);
    }

    #[test]
    fn test_homomorphic_sub() {
        let (ctx, sk, mut eval, mut rng) = setup();
        let ct1 = enc(&ctx, &sk, &mut rng, 50);
        let ct2 = enc(&ctx, &sk, &mut rng, 20);

        let diff = eval.sub_new(&ct1, &ct2).unwrap();
        let dec = decrypt(&ctx, &Ciphertext { el: diff }, &sk).unwrap();
        assert_eq!(decode_scalar(&dec), 30);
    }

    #[test]
    fn test_homomorphic_neg() {
        let (ctx, sk, mut eval, mut rng) = setup();
        let t = ctx.plain_modulus();
        let ct = enc(&ctx, &sk, &mut rng, 7);

        let neg = eval.neg_new(&ct).unwrap();
        let dec = decrypt(&ctx, &Ciphertext { el: neg }, &sk).unwrap();
        assert_eq!(decode_scalar(&dec), t - 7);
    }

    #[test]
    fn test_homomorphic_mul_scalar() {
        let (ctx, sk, mut eval, mut rng) = setup();
        let ct = enc(&ctx, &sk, &mut rng, 9);

        let scaled = eval.mul_scalar_new(&ct, 11).unwrap();
        let dec = decrypt(&ctx, &Ciphertext { el: scaled }, &sk).unwrap();
        assert_eq!(decode_scalar(&dec), 99);
    }

    #[test]
    fn test_add_no_mod_then_reduce() {
        let (ctx, sk, mut eval, mut rng) = setup();
        let ct1 = enc(&ctx, &sk, &mut rng, 3);
        let ct2 = enc(&ctx, &sk, &mut rng, 4);

        let lazy = eval.add_no_mod_new(&ct1, &ct2).unwrap();
        let reduced = eval.reduce_new(&lazy).unwrap();
        let strict = eval.add_new(&ct1, &ct2).unwrap();
        assert_eq!(reduced, strict);

        let dec = decrypt(&ctx, &Ciphertext { el: reduced }, &sk).unwrap();
        assert_eq!(decode_scalar(&dec), 7);
    }

    #[test]
    fn test_mul_yields_degree_two_product() {
        let (ctx, sk, mut eval, mut rng) = setup();
        let ct1 = enc(&ctx, &sk, &mut rng, 12);
        let ct2 = enc(&ctx, &sk, &mut rng, 13);

        let prod = eval.mul_new(&ct1, &ct2).unwrap();
        assert_eq!(prod.degree(), 2);
        // decryption accumulates phase over s powers, so degree 2 decrypts
        let dec = decrypt(&ctx, &Ciphertext { el: prod }, &sk).unwrap();
        assert_eq!(decode_scalar(&dec), 156);
    }

    #[test]
    fn test_squaring_fast_path_matches_copy() {
        let (ctx, sk, mut eval, mut rng) = setup();
        let ct = enc(&ctx, &sk, &mut rng, 14);
        let ct_copy = ct.clone();

        let sq = eval.mul_new(&ct, &ct).unwrap();
        let cross = eval.mul_new(&ct, &ct_copy).unwrap();
        assert_eq!(sq, cross);

        let dec = decrypt(&ctx, &Ciphertext { el: sq }, &sk).unwrap();
        assert_eq!(decode_scalar(&dec), 196);
    }

    #[test]
    fn test_degree_mixed_add_copies_tail() {
        let (ctx, sk, mut eval, mut rng) = setup();
        let ct1 = enc(&ctx, &sk, &mut rng, 2);
        let ct2 = enc(&ctx, &sk, &mut rng, 3);
        let ct3 = enc(&ctx, &sk, &mut rng, 5);

        // degree-2 + degree-1
        let prod = eval.mul_new(&ct1, &ct2).unwrap();
        let sum = eval.add_new(&prod, &ct3).unwrap();
        assert_eq!(sum.degree(), 2);
        let dec = decrypt(&ctx, &Ciphertext { el: sum }, &sk).unwrap();
        assert_eq!(decode_scalar(&dec), 11);
    }

    #[test]
    fn test_receiver_degree_checked_before_mutation() {
        let (ctx, _sk, mut eval, _rng) = setup();
        let a = ctx.new_element(1);
        let b = ctx.new_element(2);
        let mut small = ctx.new_element(1);
        let err = eval.add(&a, &b, &mut small);
        assert!(matches!(
            err,
            Err(TrellisError::ReceiverDegreeTooSmall { required: 2, got: 1 })
        ));
    }

    #[test]
    fn test_mul_degree_cap() {
        let (ctx, _sk, mut eval, _rng) = setup();
        let a = ctx.new_element(3);
        let b = ctx.new_element(2);
        assert!(matches!(
            eval.mul_new(&a, &b),
            Err(TrellisError::MulDegreeTooLarge(5))
        ));
    }
}
