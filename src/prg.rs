//! Deterministic share generation from a seed and a counter.
//!
//! Arrays are expanded with AES-128 in counter mode, keyed by the party's [`Seed`]. Element `j`
//! of an array drawn at counter `c` is the low `k` bits of `AES_seed(c + j)`, so an array is a
//! pure function of (seed, counter, shape, field) and can be replayed by anyone who holds the
//! seed and the [`ArrayDesc`] of the draw.
use std::{fmt, ops::Range};

use aes::{
    Aes128,
    cipher::{BlockCipherEncrypt, KeyInit},
};
use serde::{Deserialize, Serialize};

use crate::ring::{FieldType, RingArray, Shape};

/// The root of a party's pseudo-random stream.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed(u128);

impl Seed {
    /// Samples a fresh seed from the thread-local CSPRNG.
    pub fn random() -> Self {
        Seed(rand::random())
    }
}

impl From<u128> for Seed {
    fn from(seed: u128) -> Self {
        Seed(seed)
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(..)")
    }
}

/// Everything needed to regenerate a drawn array, except the seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDesc {
    /// The ring of the array.
    pub field: FieldType,
    /// The shape of the array.
    pub shape: Shape,
    /// The counter value at which the draw started.
    pub prg_counter: u128,
}

impl ArrayDesc {
    /// The counter units consumed by the draw.
    pub fn counter_range(&self) -> Range<u128> {
        self.prg_counter..self.prg_counter + self.shape.numel() as u128
    }
}

/// The counter can not advance without repeating a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterExhausted;

/// Draws `shape.numel()` ring elements at `*counter` and advances the counter past them.
pub fn create_array(
    field: FieldType,
    shape: &Shape,
    seed: Seed,
    counter: &mut u128,
) -> Result<(RingArray, ArrayDesc), CounterExhausted> {
    let numel = shape.numel() as u128;
    let next = counter.checked_add(numel).ok_or(CounterExhausted)?;
    let desc = ArrayDesc {
        field,
        shape: shape.clone(),
        prg_counter: *counter,
    };
    *counter = next;
    Ok((replay_array(seed, &desc), desc))
}

/// Regenerates the array described by `desc` under `seed`.
pub fn replay_array(seed: Seed, desc: &ArrayDesc) -> RingArray {
    let mut array = RingArray::zeros(desc.field, desc.shape.clone());
    let data = array.as_mut_slice();
    fill_prand(seed, desc.prg_counter, data);
    let mask = desc.field.mask();
    data.iter_mut().for_each(|x| *x &= mask);
    array
}

/// Fills `out` with `AES_seed(start), AES_seed(start + 1), ...`.
fn fill_prand(seed: Seed, start: u128, out: &mut [u128]) {
    let aes = Aes128::new(&aes::cipher::Array(seed.0.to_le_bytes()));
    for (i, x) in out.iter_mut().enumerate() {
        *x = start.wrapping_add(i as u128).to_le();
    }
    let blocks = bytemuck::cast_slice_mut::<_, aes::Block>(out);
    aes.encrypt_blocks(blocks);
    for x in out.iter_mut() {
        *x = u128::from_le(*x);
    }
}

/// The mutable generator state owned by one session: its seed and the next unused counter.
#[derive(Debug, Clone)]
pub struct PrgState {
    seed: Seed,
    counter: u128,
}

impl PrgState {
    /// A fresh stream starting at counter zero.
    pub fn new(seed: Seed) -> Self {
        PrgState { seed, counter: 0 }
    }

    /// The next unused counter value.
    pub fn counter(&self) -> u128 {
        self.counter
    }

    /// Draws the next array of the stream.
    pub fn draw(
        &mut self,
        field: FieldType,
        shape: &Shape,
    ) -> Result<(RingArray, ArrayDesc), CounterExhausted> {
        create_array(field, shape, self.seed, &mut self.counter)
    }
}
