//! The correction engine run by the trusted first party.
//!
//! Holding the seeds of all parties, the trusted party replays every array that the parties drew
//! for an operation, reconstructs the shared values and computes the adjustment that makes the
//! correlation hold once it is applied to its own share.

use tracing::trace;

use crate::{
    prg::{ArrayDesc, Seed, replay_array},
    ring::{RecOp, RingArray, RingError, reconstruct},
};

/// The aggregator role of a session: the seeds of all parties, indexed by rank.
pub(crate) struct TrustedParty {
    seeds: Vec<Seed>,
}

impl TrustedParty {
    pub(crate) fn new(seeds: Vec<Seed>) -> Self {
        TrustedParty { seeds }
    }

    #[cfg(test)]
    pub(crate) fn seeds(&self) -> &[Seed] {
        &self.seeds
    }

    /// Replays the share of every party for `desc` and combines them.
    fn value(&self, op: RecOp, desc: &ArrayDesc) -> Result<RingArray, RingError> {
        let shares: Vec<RingArray> = self
            .seeds
            .iter()
            .map(|&seed| replay_array(seed, desc))
            .collect();
        trace!(
            "Reconstructed {} elements from {} shares",
            desc.shape.numel(),
            shares.len()
        );
        reconstruct(op, &shares)
    }

    /// `a * b - c`
    pub(crate) fn adjust_mul(&self, [a, b, c]: [&ArrayDesc; 3]) -> Result<RingArray, RingError> {
        let (a, b, c) = (
            self.value(RecOp::Add, a)?,
            self.value(RecOp::Add, b)?,
            self.value(RecOp::Add, c)?,
        );
        a.mul(&b)?.sub(&c)
    }

    /// `a x b - c`
    pub(crate) fn adjust_dot(
        &self,
        [a, b, c]: [&ArrayDesc; 3],
        m: usize,
        n: usize,
        k: usize,
    ) -> Result<RingArray, RingError> {
        let (a, b, c) = (
            self.value(RecOp::Add, a)?,
            self.value(RecOp::Add, b)?,
            self.value(RecOp::Add, c)?,
        );
        a.matmul(&b, m, n, k)?.sub(&c)
    }

    /// `(a & b) ^ c`, over xor shares.
    pub(crate) fn adjust_and(&self, [a, b, c]: [&ArrayDesc; 3]) -> Result<RingArray, RingError> {
        let (a, b, c) = (
            self.value(RecOp::Xor, a)?,
            self.value(RecOp::Xor, b)?,
            self.value(RecOp::Xor, c)?,
        );
        a.and(&b)?.xor(&c)
    }

    /// `(a >> bits) - b`, arithmetic shift.
    pub(crate) fn adjust_trunc(
        &self,
        [a, b]: [&ArrayDesc; 2],
        bits: usize,
    ) -> Result<RingArray, RingError> {
        let (a, b) = (self.value(RecOp::Add, a)?, self.value(RecOp::Add, b)?);
        a.arshift(bits).sub(&b)
    }

    /// `((r << 1) >> (bits + 1)) - rc` and `(r >> (k - 1)) - rb`, logical shifts.
    pub(crate) fn adjust_trunc_pr(
        &self,
        [r, rc, rb]: [&ArrayDesc; 3],
        bits: usize,
    ) -> Result<(RingArray, RingArray), RingError> {
        let (r, rc, rb) = (
            self.value(RecOp::Add, r)?,
            self.value(RecOp::Add, rc)?,
            self.value(RecOp::Add, rb)?,
        );
        let k = r.field().bits();
        let adjust_rc = r.lshift(1).rshift(bits + 1).sub(&rc)?;
        let adjust_rb = r.rshift(k - 1).sub(&rb)?;
        Ok((adjust_rc, adjust_rb))
    }

    /// `bits - a` for freshly sampled random bits.
    pub(crate) fn adjust_rand_bit(&self, a: &ArrayDesc) -> Result<RingArray, RingError> {
        let bits = RingArray::random_bits(a.field, a.shape.clone(), &mut rand::rng());
        bits.sub(&self.value(RecOp::Add, a)?)
    }

    /// `a ^ b`, where `a` is reconstructed additively and `b` with xor.
    pub(crate) fn adjust_eqz(&self, [a, b]: [&ArrayDesc; 2]) -> Result<RingArray, RingError> {
        let (a, b) = (self.value(RecOp::Add, a)?, self.value(RecOp::Xor, b)?);
        a.xor(&b)
    }

    /// `permute(a, perm) - b`
    pub(crate) fn adjust_perm(
        &self,
        [a, b]: [&ArrayDesc; 2],
        perm: &[usize],
    ) -> Result<RingArray, RingError> {
        let (a, b) = (self.value(RecOp::Add, a)?, self.value(RecOp::Add, b)?);
        a.permute(perm)?.sub(&b)
    }
}
