use std::collections::HashMap;

use crate::bfv::eval::Evaluator;
use crate::bfv::keygen::{RotationKeys, SwitchingKey};
use crate::bfv::keyswitch::switch_keys_core;
use crate::bfv::{BfvElement, Ciphertext, Operand, OperandMut};
use crate::error::{Result, TrellisError};

impl Evaluator {
    /// Rotate the plaintext slot columns of `op` by k positions to the
    /// left.
    ///
    /// The rotation keys must either hold the specific key for k, or the
    /// complete left and right power-of-two sets; in the latter case k is
    /// decomposed in base 2 and the direction with the smaller Hamming
    /// weight (k left vs n/2−k right, ties to the left) is applied.
    pub fn rotate_columns(
        &mut self,
        op: &impl Operand,
        k: u64,
        keys: &RotationKeys,
        out: &mut impl OperandMut,
    ) -> Result<()> {
        let n = self.ctx.ring_degree() as u64;
        let half = n >> 1;
        let k = k & (half - 1);

        let el = op.element();

        if k == 0 {
            let is_ntt = el.is_ntt;
            let out_el = out.element_mut();
            for i in 0..=el.degree().min(out_el.degree()) {
                self.ctx.ctx_q.copy(&el.value[i], &mut out_el.value[i]);
            }
            out_el.is_ntt = is_ntt;
            return Ok(());
        }

        if out.element().degree() != el.degree() {
            return Err(TrellisError::RotationDegreeMismatch);
        }
        if el.degree() > 1 {
            return Err(TrellisError::RotationDegreeOutOfRange);
        }

        let gal = self.ctx.gal_el_rot_col_left[k as usize];

        if el.degree() == 0 {
            self.permute_degree_zero(el, gal, out.element_mut());
            return Ok(());
        }

        if let Some(key) = keys.col_left.get(&k) {
            return self.rotate_with_key(el, gal, key, out.element_mut());
        }

        if has_pow2_rotations(keys, n) {
            if k.count_ones() <= (half - k).count_ones() {
                self.rotate_columns_pow2(el, self.ctx.gen, k, &keys.col_left, out.element_mut())
            } else {
                self.rotate_columns_pow2(
                    el,
                    self.ctx.gen_inv,
                    half - k,
                    &keys.col_right,
                    out.element_mut(),
                )
            }
        } else {
            Err(TrellisError::RotationKeyMissing(k))
        }
    }

    /// Rotate columns into a freshly allocated receiver.
    pub fn rotate_columns_new(
        &mut self,
        op: &impl Operand,
        k: u64,
        keys: &RotationKeys,
    ) -> Result<BfvElement> {
        let mut out = self.ctx.new_element(op.degree());
        self.rotate_columns(op, k, keys, &mut out)?;
        Ok(out)
    }

    /// Swap the two slot rows (the Galois involution X → X^{2n-1}).
    pub fn rotate_rows(
        &mut self,
        op: &impl Operand,
        keys: &RotationKeys,
        out: &mut impl OperandMut,
    ) -> Result<()> {
        let el = op.element();
        if out.element().degree() != el.degree() {
            return Err(TrellisError::RotationDegreeMismatch);
        }
        if el.degree() > 1 {
            return Err(TrellisError::RotationDegreeOutOfRange);
        }
        let row_key = keys.row.as_ref().ok_or(TrellisError::RowRotationKeyMissing)?;
        let gal = self.ctx.gal_el_rot_row;

        if el.degree() == 0 {
            self.permute_degree_zero(el, gal, out.element_mut());
            return Ok(());
        }
        self.rotate_with_key(el, gal, row_key, out.element_mut())
    }

    pub fn rotate_rows_new(&mut self, op: &impl Operand, keys: &RotationKeys) -> Result<BfvElement> {
        let mut out = self.ctx.new_element(op.degree());
        self.rotate_rows(op, keys, &mut out)?;
        Ok(out)
    }

    /// Sum every slot of `op` into every slot of `out`: a log-depth
    /// reduction of rotate-and-add over the columns, closed by one row
    /// rotation. Requires the full left power-of-two set and the row key.
    pub fn inner_sum(
        &mut self,
        op: &Ciphertext,
        keys: &RotationKeys,
        out: &mut Ciphertext,
    ) -> Result<()> {
        if op.el.degree() != 1 || out.el.degree() != 1 {
            return Err(TrellisError::RotationDegreeOutOfRange);
        }

        let mut c_tmp = self.ctx.new_ciphertext(1);

        for i in 0..=1 {
            self.ctx.ctx_q.copy(&op.el.value[i], &mut out.el.value[i]);
        }
        out.el.is_ntt = op.el.is_ntt;

        let half = (self.ctx.ring_degree() as u64) >> 1;
        let mut i = 1u64;
        while i < half {
            self.rotate_columns(&*out, i, keys, &mut c_tmp)?;
            for j in 0..=1 {
                self.ctx.ctx_q.add_assign(&mut out.el.value[j], &c_tmp.el.value[j]);
            }
            i <<= 1;
        }

        self.rotate_rows(&*out, keys, &mut c_tmp)?;
        for j in 0..=1 {
            self.ctx.ctx_q.add_assign(&mut out.el.value[j], &c_tmp.el.value[j]);
        }
        Ok(())
    }

    /// Degree-0 rotation: a pure permutation, no key switching.
    fn permute_degree_zero(&mut self, el: &BfvElement, gal: u64, out: &mut BfvElement) {
        let ctx_q = &self.ctx.ctx_q;
        if el.is_ntt {
            ctx_q.permute_ntt(&el.value[0], gal, &mut out.value[0]);
        } else {
            ctx_q.permute(&el.value[0], gal, &mut out.value[0]);
        }
        out.is_ntt = el.is_ntt;
    }

    /// Apply σ_gal to a degree-1 element and key-switch back to the
    /// original key. The caller's NTT domain is preserved.
    fn rotate_with_key(
        &mut self,
        el: &BfvElement,
        gal: u64,
        key: &SwitchingKey,
        out: &mut BfvElement,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let ctx_q = &ctx.ctx_q;
        let [pp0, pp1, _, pp3] = &mut self.polypool;

        if el.is_ntt {
            ctx_q.permute_ntt(&el.value[0], gal, &mut out.value[0]);
            ctx_q.permute_ntt(&el.value[1], gal, &mut out.value[1]);

            ctx_q.copy(&out.value[1], pp1);
            ctx_q.inv_ntt(pp1);

            switch_keys_core(ctx_q, pp1, key, pp3, out);
        } else {
            ctx_q.permute(&el.value[0], gal, pp0);
            ctx_q.permute(&el.value[1], gal, pp1);

            ctx_q.copy(pp0, &mut out.value[0]);
            ctx_q.copy(pp1, &mut out.value[1]);
            ctx_q.ntt(&mut out.value[0]);
            ctx_q.ntt(&mut out.value[1]);

            switch_keys_core(ctx_q, pp1, key, pp3, out);

            ctx_q.inv_ntt(&mut out.value[0]);
            ctx_q.inv_ntt(&mut out.value[1]);
        }
        out.is_ntt = el.is_ntt;
        Ok(())
    }

    /// Walk the bits of k from least to most significant, squaring the
    /// generator and doubling the key index at each step; every set bit
    /// applies one permutation plus key switch in the NTT domain.
    fn rotate_columns_pow2(
        &mut self,
        el: &BfvElement,
        mut generator: u64,
        mut k: u64,
        keys: &HashMap<u64, SwitchingKey>,
        out: &mut BfvElement,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let ctx_q = &ctx.ctx_q;
        let mask = (2 * ctx.ring_degree() as u64) - 1;
        let mut evk_index = 1u64;

        let was_ntt = el.is_ntt;
        for i in 0..=el.degree() {
            ctx_q.copy(&el.value[i], &mut out.value[i]);
            if !was_ntt {
                ctx_q.ntt(&mut out.value[i]);
            }
        }

        while k > 0 {
            if k & 1 == 1 {
                let key = keys
                    .get(&evk_index)
                    .ok_or(TrellisError::RotationKeyMissing(evk_index))?;
                let [pp0, pp1, pp2, pp3] = &mut self.polypool;

                ctx_q.permute_ntt(&out.value[0], generator, pp0);
                ctx_q.permute_ntt(&out.value[1], generator, pp1);

                ctx_q.copy(pp0, &mut out.value[0]);
                ctx_q.copy(pp1, &mut out.value[1]);
                ctx_q.copy(pp1, pp2);
                ctx_q.inv_ntt(pp2);

                switch_keys_core(ctx_q, pp2, key, pp3, out);
            }

            generator = generator * generator & mask;
            evk_index <<= 1;
            k >>= 1;
        }

        if !was_ntt {
            for i in 0..=el.degree() {
                ctx_q.inv_ntt(&mut out.value[i]);
            }
        }
        out.is_ntt = was_ntt;
        Ok(())
    }
}

fn has_pow2_rotations(keys: &RotationKeys, n: u64) -> bool {
    let mut i = 1u64;
    while i < n >> 1 {
        if !keys.col_left.contains_key(&i) || !keys.col_right.contains_key(&i) {
            return false;
        }
        i <<= 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfv::encoding::{decode_simd, encode_simd};
    use crate::bfv::encrypt::{decrypt, encrypt_sk_with_rng};
    use crate::bfv::keygen::{
        gen_rotation_key_left_with_rng, gen_rotation_keys_pow2_with_rng, gen_secret_key_with_rng,
        SecretKey,
    };
    use crate::bfv::BfvContext;
    use crate::params::presets::toy_bfv;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::sync::Arc;

    fn setup() -> (Arc<BfvContext>, SecretKey, RotationKeys, Evaluator, ChaCha20Rng) {
        let ctx = BfvContext::new(toy_bfv().unwrap()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = gen_secret_key_with_rng(&ctx, &mut rng).unwrap();
        let keys = gen_rotation_keys_pow2_with_rng(&ctx, &sk, &mut rng).unwrap();
        let eval = Evaluator::new(&ctx).unwrap();
        (ctx, sk, keys, eval, rng)
    }

    fn enc_slots(
        ctx: &BfvContext,
        sk: &SecretKey,
        rng: &mut ChaCha20Rng,
        slots: &[u64],
    ) -> Ciphertext {
        let pt = encode_simd(ctx, slots).unwrap();
        encrypt_sk_with_rng(ctx, &pt, sk, rng).unwrap()
    }

    fn dec_slots(ctx: &BfvContext, sk: &SecretKey, ct: &Ciphertext, n: usize) -> Vec<u64> {
        let msg = decrypt(ctx, ct, sk).unwrap();
        decode_simd(ctx, &msg, n).unwrap()
    }

    #[test]
    fn test_rotate_columns_by_one() {
        let (ctx, sk, keys, mut eval, mut rng) = setup();
        // two rows of four: [a b c d | e f g h]
        let ct = enc_slots(&ctx, &sk, &mut rng, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let rot = eval.rotate_columns_new(&ct, 1, &keys).unwrap();
        let got = dec_slots(&ctx, &sk, &Ciphertext { el: rot }, 8);
        assert_eq!(got, vec![2, 3, 4, 1, 6, 7, 8, 5]);
    }

    #[test]
    fn test_rotate_columns_specific_key() {
        let (ctx, sk, _keys, mut eval, mut rng) = setup();
        // keys holding only the specific k=3 entry
        let mut keys = RotationKeys::new();
        gen_rotation_key_left_with_rng(&ctx, &sk, 3, &mut keys, &mut rng).unwrap();

        let ct = enc_slots(&ctx, &sk, &mut rng, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let rot = eval.rotate_columns_new(&ct, 3, &keys).unwrap();
        let got = dec_slots(&ctx, &sk, &Ciphertext { el: rot }, 8);
        assert_eq!(got, vec![4, 1, 2, 3, 8, 5, 6, 7]);
    }

    #[test]
    fn test_rotate_columns_pow2_decomposition() {
        let (ctx, sk, keys, mut eval, mut rng) = setup();
        let ct = enc_slots(&ctx, &sk, &mut rng, &[10, 20, 30, 40, 50, 60, 70, 80]);

        // k=3 = 0b11 has no specific key: decomposed as either 3 left
        // rotations or 1 right (n/2-k = 1, lighter), chosen by popcount
        let rot = eval.rotate_columns_new(&ct, 3, &keys).unwrap();
        let got = dec_slots(&ctx, &sk, &Ciphertext { el: rot }, 8);
        assert_eq!(got, vec![40, 10, 20, 30, 80, 50, 60, 70]);
    }

    #[test]
    fn test_rotate_group_law() {
        let (ctx, sk, keys, mut eval, mut rng) = setup();
        let half = (ctx.ring_degree() as u64) >> 1;
        let ct = enc_slots(&ctx, &sk, &mut rng, &[1, 2, 3, 4, 5, 6, 7, 8]);

        for (k1, k2) in [(1u64, 1u64), (1, 2), (2, 3), (3, 3)] {
            let r1 = eval.rotate_columns_new(&ct, k1, &keys).unwrap();
            let r1 = Ciphertext { el: r1 };
            let r12 = eval.rotate_columns_new(&r1, k2, &keys).unwrap();
            let combined = eval
                .rotate_columns_new(&ct, (k1 + k2) % half, &keys)
                .unwrap();
            assert_eq!(
                dec_slots(&ctx, &sk, &Ciphertext { el: r12 }, 8),
                dec_slots(&ctx, &sk, &Ciphertext { el: combined }, 8),
                "k1={k1} k2={k2}"
            );
        }
    }

    #[test]
    fn test_rotate_rows_swaps_and_involutes() {
        let (ctx, sk, keys, mut eval, mut rng) = setup();
        let ct = enc_slots(&ctx, &sk, &mut rng, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let swapped = eval.rotate_rows_new(&ct, &keys).unwrap();
        let swapped = Ciphertext { el: swapped };
        assert_eq!(
            dec_slots(&ctx, &sk, &swapped, 8),
            vec![5, 6, 7, 8, 1, 2, 3, 4]
        );

        let back = eval.rotate_rows_new(&swapped, &keys).unwrap();
        assert_eq!(
            dec_slots(&ctx, &sk, &Ciphertext { el: back }, 8),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn test_rotate_zero_is_copy() {
        let (ctx, sk, keys, mut eval, mut rng) = setup();
        let ct = enc_slots(&ctx, &sk, &mut rng, &[9, 8, 7, 6, 5, 4, 3, 2]);
        let rot = eval.rotate_columns_new(&ct, 0, &keys).unwrap();
        assert_eq!(rot, ct.el);
    }

    #[test]
    fn test_inner_sum() {
        let (ctx, sk, keys, mut eval, mut rng) = setup();
        let ct = enc_slots(&ctx, &sk, &mut rng, &[1, 1, 1, 1, 1, 1, 1, 1]);
        let mut out = ctx.new_ciphertext(1);
        eval.inner_sum(&ct, &keys, &mut out).unwrap();
        assert_eq!(dec_slots(&ctx, &sk, &out, 8), vec![8; 8]);

        let ct = enc_slots(&ctx, &sk, &mut rng, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut out = ctx.new_ciphertext(1);
        eval.inner_sum(&ct, &keys, &mut out).unwrap();
        assert_eq!(dec_slots(&ctx, &sk, &out, 8), vec![36; 8]);
    }

    #[test]
    fn test_missing_keys_error() {
        let (ctx, sk, _keys, mut eval, mut rng) = setup();
        let empty = RotationKeys::new();
        let ct = enc_slots(&ctx, &sk, &mut rng, &[1, 2, 3, 4]);

        assert!(matches!(
            eval.rotate_columns_new(&ct, 2, &empty),
            Err(TrellisError::RotationKeyMissing(2))
        ));
        assert!(matches!(
            eval.rotate_rows_new(&ct, &empty),
            Err(TrellisError::RowRotationKeyMissing)
        ));
    }

    #[test]
    fn test_rotation_degree_checks() {
        let (ctx, _sk, keys, mut eval, _rng) = setup();
        let ct1 = ctx.new_ciphertext(1);
        let mut ct2 = ctx.new_ciphertext(2);
        assert!(matches!(
            eval.rotate_columns(&ct1, 1, &keys, &mut ct2),
            Err(TrellisError::RotationDegreeMismatch)
        ));

        let ct2b = ctx.new_ciphertext(2);
        let mut out2 = ctx.new_ciphertext(2);
        assert!(matches!(
            eval.rotate_columns(&ct2b, 1, &keys, &mut out2),
            Err(TrellisError::RotationDegreeOutOfRange)
        ));
    }
}
