//! Dense arrays of fixed-width modular integers.
//!
//! Elements of a [`RingArray`] live in `Z/2^k` for `k` in {32, 64, 128}. They are stored as
//! `u128` and every operation re-masks its result, so the low `k` bits are always the canonical
//! representative.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by ring operations on malformed or mismatched arrays.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RingError {
    /// A dimension of the shape is zero.
    #[error("invalid shape {0:?}, every dimension must be positive")]
    InvalidShape(Vec<usize>),
    /// The number of elements of the shape does not fit into `usize`.
    #[error("shape {0:?} holds too many elements")]
    ShapeOverflow(Vec<usize>),
    /// The number of elements does not match the shape.
    #[error("shape {shape} holds {expected} elements, got {actual}")]
    LengthMismatch {
        /// The declared shape.
        shape: Shape,
        /// The number of elements implied by the shape.
        expected: usize,
        /// The number of elements provided.
        actual: usize,
    },
    /// The operands live in rings of different width.
    #[error("field mismatch: {0:?} vs {1:?}")]
    FieldMismatch(FieldType, FieldType),
    /// The operands have different shapes.
    #[error("shape mismatch: {0} vs {1}")]
    ShapeMismatch(Shape, Shape),
    /// The operands of a matrix product do not have shapes `(m, k)` and `(k, n)`.
    #[error("cannot multiply {lhs} by {rhs} as ({m}x{k}) * ({k}x{n})")]
    DimensionMismatch {
        /// Shape of the left operand.
        lhs: Shape,
        /// Shape of the right operand.
        rhs: Shape,
        /// Rows of the product.
        m: usize,
        /// Columns of the product.
        n: usize,
        /// Shared inner dimension.
        k: usize,
    },
    /// The permutation is not a bijection on `0..len`.
    #[error("not a permutation of {len} elements: {reason}")]
    InvalidPermutation {
        /// The number of elements to permute.
        len: usize,
        /// What is wrong with the permutation.
        reason: String,
    },
    /// There were no shares to reconstruct from.
    #[error("cannot reconstruct a value from zero shares")]
    NoShares,
}

/// The bit width of the ring `Z/2^k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// `Z/2^32`
    Fm32,
    /// `Z/2^64`
    Fm64,
    /// `Z/2^128`
    Fm128,
}

impl FieldType {
    /// The number of bits `k` of a ring element.
    pub const fn bits(self) -> usize {
        match self {
            FieldType::Fm32 => 32,
            FieldType::Fm64 => 64,
            FieldType::Fm128 => 128,
        }
    }

    /// `2^k - 1`
    pub const fn mask(self) -> u128 {
        match self {
            FieldType::Fm32 => u32::MAX as u128,
            FieldType::Fm64 => u64::MAX as u128,
            FieldType::Fm128 => u128::MAX,
        }
    }
}

/// Row-major dimensions of a [`RingArray`]. An empty shape denotes a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct Shape {
    dims: Vec<usize>,
    numel: usize,
}

impl Shape {
    /// Creates a shape, rejecting zero-sized dimensions and element counts beyond `usize`.
    pub fn new(dims: impl Into<Vec<usize>>) -> Result<Self, RingError> {
        let dims = dims.into();
        if dims.contains(&0) {
            return Err(RingError::InvalidShape(dims));
        }
        match dims.iter().try_fold(1usize, |n, &d| n.checked_mul(d)) {
            Some(numel) => Ok(Shape { dims, numel }),
            None => Err(RingError::ShapeOverflow(dims)),
        }
    }

    /// A `rows x cols` matrix shape.
    pub fn matrix(rows: usize, cols: usize) -> Result<Self, RingError> {
        Self::new(vec![rows, cols])
    }

    /// The dimensions of the shape.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// The number of elements of an array of this shape.
    pub fn numel(&self) -> usize {
        self.numel
    }
}

impl TryFrom<Vec<usize>> for Shape {
    type Error = RingError;

    fn try_from(dims: Vec<usize>) -> Result<Self, RingError> {
        Shape::new(dims)
    }
}

impl From<Shape> for Vec<usize> {
    fn from(shape: Shape) -> Self {
        shape.dims
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

/// How shares are combined into the value they share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecOp {
    /// Arithmetic sharing, shares are added modulo `2^k`.
    Add,
    /// Boolean sharing, shares are xored.
    Xor,
}

/// A dense array of elements of `Z/2^k`, annotated with its field and shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingArray {
    field: FieldType,
    shape: Shape,
    data: Vec<u128>,
}

impl RingArray {
    /// An array of zeros.
    pub fn zeros(field: FieldType, shape: Shape) -> Self {
        let data = vec![0; shape.numel()];
        RingArray { field, shape, data }
    }

    /// Wraps `data` (reduced modulo `2^k`) into an array of the given shape.
    pub fn from_vec(field: FieldType, shape: Shape, data: Vec<u128>) -> Result<Self, RingError> {
        if data.len() != shape.numel() {
            return Err(RingError::LengthMismatch {
                expected: shape.numel(),
                actual: data.len(),
                shape,
            });
        }
        let mask = field.mask();
        let data = data.into_iter().map(|x| x & mask).collect();
        Ok(RingArray { field, shape, data })
    }

    /// An array of uniformly random bits, each embedded as `0` or `1` in the ring.
    pub fn random_bits(field: FieldType, shape: Shape, rng: &mut impl Rng) -> Self {
        let data = (0..shape.numel())
            .map(|_| u128::from(rng.random::<bool>()))
            .collect();
        RingArray { field, shape, data }
    }

    /// The ring this array lives in.
    pub fn field(&self) -> FieldType {
        self.field
    }

    /// The shape of the array.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// The elements in row-major order.
    pub fn as_slice(&self) -> &[u128] {
        &self.data
    }

    /// Mutable access to the raw elements. Callers must keep them reduced modulo `2^k`.
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u128] {
        &mut self.data
    }

    /// Consumes the array, returning its elements in row-major order.
    pub fn into_vec(self) -> Vec<u128> {
        self.data
    }

    fn check_compatible(&self, rhs: &RingArray) -> Result<(), RingError> {
        if self.field != rhs.field {
            return Err(RingError::FieldMismatch(self.field, rhs.field));
        }
        if self.shape != rhs.shape {
            return Err(RingError::ShapeMismatch(
                self.shape.clone(),
                rhs.shape.clone(),
            ));
        }
        Ok(())
    }

    fn map(&self, f: impl Fn(u128) -> u128) -> RingArray {
        let mask = self.field.mask();
        RingArray {
            field: self.field,
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x) & mask).collect(),
        }
    }

    fn zip_with(
        &self,
        rhs: &RingArray,
        f: impl Fn(u128, u128) -> u128,
    ) -> Result<RingArray, RingError> {
        self.check_compatible(rhs)?;
        let mask = self.field.mask();
        Ok(RingArray {
            field: self.field,
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(&rhs.data)
                .map(|(&x, &y)| f(x, y) & mask)
                .collect(),
        })
    }

    /// `self + rhs`, elementwise modulo `2^k`.
    pub fn add(&self, rhs: &RingArray) -> Result<RingArray, RingError> {
        self.zip_with(rhs, u128::wrapping_add)
    }

    /// `self - rhs`, elementwise modulo `2^k`.
    pub fn sub(&self, rhs: &RingArray) -> Result<RingArray, RingError> {
        self.zip_with(rhs, u128::wrapping_sub)
    }

    /// `self * rhs`, elementwise modulo `2^k`.
    pub fn mul(&self, rhs: &RingArray) -> Result<RingArray, RingError> {
        self.zip_with(rhs, u128::wrapping_mul)
    }

    /// `self ^ rhs`, elementwise.
    pub fn xor(&self, rhs: &RingArray) -> Result<RingArray, RingError> {
        self.zip_with(rhs, |x, y| x ^ y)
    }

    /// `self & rhs`, elementwise.
    pub fn and(&self, rhs: &RingArray) -> Result<RingArray, RingError> {
        self.zip_with(rhs, |x, y| x & y)
    }

    /// Adds `delta` to this array in place.
    pub fn add_in_place(&mut self, delta: &RingArray) -> Result<(), RingError> {
        self.check_compatible(delta)?;
        let mask = self.field.mask();
        for (x, d) in self.data.iter_mut().zip(&delta.data) {
            *x = x.wrapping_add(*d) & mask;
        }
        Ok(())
    }

    /// Xors `delta` into this array in place.
    pub fn xor_in_place(&mut self, delta: &RingArray) -> Result<(), RingError> {
        self.check_compatible(delta)?;
        for (x, d) in self.data.iter_mut().zip(&delta.data) {
            *x ^= *d;
        }
        Ok(())
    }

    /// Logical left shift by `bits`, dropping bits beyond the ring width.
    pub fn lshift(&self, bits: usize) -> RingArray {
        self.map(|x| shl(x, bits))
    }

    /// Logical right shift by `bits`.
    pub fn rshift(&self, bits: usize) -> RingArray {
        self.map(|x| shr(x, bits))
    }

    /// Arithmetic right shift by `bits`, treating elements as two's complement `k`-bit integers.
    pub fn arshift(&self, bits: usize) -> RingArray {
        let spare = 128 - self.field.bits();
        let bits = bits.min(127);
        self.map(|x| {
            let signed = ((x << spare) as i128) >> spare;
            (signed >> bits) as u128
        })
    }

    /// The matrix product of `self` with shape `(m, k)` and `rhs` with shape `(k, n)`.
    pub fn matmul(
        &self,
        rhs: &RingArray,
        m: usize,
        n: usize,
        k: usize,
    ) -> Result<RingArray, RingError> {
        if self.field != rhs.field {
            return Err(RingError::FieldMismatch(self.field, rhs.field));
        }
        if self.shape.dims() != [m, k] || rhs.shape.dims() != [k, n] {
            return Err(RingError::DimensionMismatch {
                lhs: self.shape.clone(),
                rhs: rhs.shape.clone(),
                m,
                n,
                k,
            });
        }
        let shape = Shape::matrix(m, n)?;
        let mask = self.field.mask();
        let mut data = vec![0u128; shape.numel()];
        for i in 0..m {
            for l in 0..k {
                let a = self.data[i * k + l];
                let row = &rhs.data[l * n..(l + 1) * n];
                for (c, b) in data[i * n..(i + 1) * n].iter_mut().zip(row) {
                    *c = c.wrapping_add(a.wrapping_mul(*b));
                }
            }
        }
        data.iter_mut().for_each(|c| *c &= mask);
        Ok(RingArray {
            field: self.field,
            shape,
            data,
        })
    }

    /// Gathers the elements of the flattened array by `perm`: `out[i] = self[perm[i]]`.
    pub fn permute(&self, perm: &[usize]) -> Result<RingArray, RingError> {
        validate_permutation(perm, self.numel())?;
        Ok(RingArray {
            field: self.field,
            shape: self.shape.clone(),
            data: perm.iter().map(|&p| self.data[p]).collect(),
        })
    }
}

/// Checks that `perm` is a bijection on `0..len`.
pub fn validate_permutation(perm: &[usize], len: usize) -> Result<(), RingError> {
    let invalid = |reason: String| RingError::InvalidPermutation { len, reason };
    if perm.len() != len {
        return Err(invalid(format!("has {} entries", perm.len())));
    }
    let mut seen = vec![false; len];
    for &p in perm {
        match seen.get_mut(p) {
            None => return Err(invalid(format!("index {p} is out of range"))),
            Some(true) => return Err(invalid(format!("index {p} occurs twice"))),
            Some(s) => *s = true,
        }
    }
    Ok(())
}

/// Combines the shares of all parties into the shared value.
pub fn reconstruct(op: RecOp, shares: &[RingArray]) -> Result<RingArray, RingError> {
    let (first, rest) = shares.split_first().ok_or(RingError::NoShares)?;
    let mut value = first.clone();
    for share in rest {
        match op {
            RecOp::Add => value.add_in_place(share)?,
            RecOp::Xor => value.xor_in_place(share)?,
        }
    }
    Ok(value)
}

fn shl(x: u128, bits: usize) -> u128 {
    u32::try_from(bits)
        .ok()
        .and_then(|b| x.checked_shl(b))
        .unwrap_or(0)
}

fn shr(x: u128, bits: usize) -> u128 {
    u32::try_from(bits)
        .ok()
        .and_then(|b| x.checked_shr(b))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arr(field: FieldType, data: Vec<u128>) -> RingArray {
        let shape = Shape::new([data.len()]).unwrap();
        RingArray::from_vec(field, shape, data).unwrap()
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert_eq!(
            Shape::new([3, 0]),
            Err(RingError::InvalidShape(vec![3, 0]))
        );
        assert_eq!(Shape::new(Vec::new()).unwrap().numel(), 1);
    }

    #[test]
    fn element_count_must_fit() {
        assert_eq!(
            Shape::new([usize::MAX, 2]),
            Err(RingError::ShapeOverflow(vec![usize::MAX, 2]))
        );
        assert_eq!(
            Shape::matrix(1 << 40, 1 << 40),
            Err(RingError::ShapeOverflow(vec![1 << 40, 1 << 40]))
        );
        assert_eq!(Shape::new([usize::MAX, 1]).unwrap().numel(), usize::MAX);
    }

    #[test]
    fn deserialized_shapes_are_validated() {
        let shape = Shape::new([2, 3]).unwrap();
        let bytes = bincode::serialize(&shape).unwrap();
        assert_eq!(bincode::deserialize::<Shape>(&bytes).unwrap(), shape);

        let bytes = bincode::serialize(&vec![4usize, 0]).unwrap();
        assert!(bincode::deserialize::<Shape>(&bytes).is_err());
    }

    #[test]
    fn from_vec_reduces_and_checks_length() {
        let a = arr(FieldType::Fm32, vec![u128::MAX, 1 << 32]);
        assert_eq!(a.as_slice(), &[u32::MAX as u128, 0]);

        let shape = Shape::new([3]).unwrap();
        assert!(matches!(
            RingArray::from_vec(FieldType::Fm64, shape, vec![1, 2]),
            Err(RingError::LengthMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn add_wraps_around() {
        let a = arr(FieldType::Fm64, vec![u64::MAX as u128, 5]);
        let b = arr(FieldType::Fm64, vec![2, 7]);
        assert_eq!(a.add(&b).unwrap().as_slice(), &[1, 12]);
        assert_eq!(b.sub(&a).unwrap().as_slice(), &[3, 2]);
    }

    #[test]
    fn mismatched_operands_are_rejected() {
        let a = arr(FieldType::Fm64, vec![1, 2]);
        let b = arr(FieldType::Fm32, vec![1, 2]);
        let c = arr(FieldType::Fm64, vec![1, 2, 3]);
        assert_eq!(
            a.add(&b),
            Err(RingError::FieldMismatch(FieldType::Fm64, FieldType::Fm32))
        );
        assert!(matches!(a.mul(&c), Err(RingError::ShapeMismatch(_, _))));
    }

    #[test]
    fn arshift_keeps_sign() {
        let minus_eight = (-8i64) as u64 as u128;
        let a = arr(FieldType::Fm64, vec![minus_eight, 8]);
        let shifted = a.arshift(2);
        assert_eq!(shifted.as_slice(), &[(-2i64) as u64 as u128, 2]);

        let a = arr(FieldType::Fm128, vec![(-8i128) as u128]);
        assert_eq!(a.arshift(3).as_slice(), &[u128::MAX]);
    }

    #[test]
    fn shifts_beyond_width_are_zero() {
        let a = arr(FieldType::Fm128, vec![u128::MAX]);
        assert_eq!(a.rshift(128).as_slice(), &[0]);
        assert_eq!(a.lshift(200).as_slice(), &[0]);
        assert_eq!(a.rshift(127).as_slice(), &[1]);
    }

    #[test]
    fn matmul_non_square() {
        // (2x3) * (3x1)
        let a = RingArray::from_vec(
            FieldType::Fm32,
            Shape::matrix(2, 3).unwrap(),
            vec![1, 2, 3, 4, 5, 6],
        )
        .unwrap();
        let b =
            RingArray::from_vec(FieldType::Fm32, Shape::matrix(3, 1).unwrap(), vec![1, 0, 2])
                .unwrap();
        let c = a.matmul(&b, 2, 1, 3).unwrap();
        assert_eq!(c.shape().dims(), &[2, 1]);
        assert_eq!(c.as_slice(), &[7, 16]);

        assert!(matches!(
            b.matmul(&a, 3, 3, 1),
            Err(RingError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn permute_gathers() {
        let a = arr(FieldType::Fm64, vec![10, 20, 30]);
        assert_eq!(a.permute(&[2, 0, 1]).unwrap().as_slice(), &[30, 10, 20]);
        assert!(a.permute(&[0, 0, 1]).is_err());
        assert!(a.permute(&[0, 1, 3]).is_err());
        assert!(a.permute(&[0, 1]).is_err());
    }

    #[test]
    fn reconstruct_needs_shares() {
        assert_eq!(reconstruct(RecOp::Add, &[]), Err(RingError::NoShares));
        let a = arr(FieldType::Fm32, vec![0b1100]);
        let b = arr(FieldType::Fm32, vec![0b1010]);
        let shares = [a, b];
        assert_eq!(reconstruct(RecOp::Xor, &shares).unwrap().as_slice(), &[0b0110]);
        assert_eq!(reconstruct(RecOp::Add, &shares).unwrap().as_slice(), &[22]);
    }

    #[test]
    fn random_bits_are_bits() {
        use rand::SeedableRng;
        use rand_chacha::ChaCha20Rng;

        let shape = Shape::new([4, 64]).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(17);
        let bits = RingArray::random_bits(FieldType::Fm128, shape.clone(), &mut rng);
        assert!(bits.as_slice().iter().all(|&b| b <= 1));
        assert!(bits.as_slice().contains(&0) && bits.as_slice().contains(&1));

        let mut rng = ChaCha20Rng::seed_from_u64(17);
        let again = RingArray::random_bits(FieldType::Fm128, shape, &mut rng);
        assert_eq!(bits, again);
    }

    proptest! {
        #[test]
        fn ring64_matches_native_wrapping(x in any::<u64>(), y in any::<u64>(), bits in 0usize..64) {
            let a = arr(FieldType::Fm64, vec![x as u128]);
            let b = arr(FieldType::Fm64, vec![y as u128]);
            prop_assert_eq!(a.add(&b).unwrap().as_slice()[0], x.wrapping_add(y) as u128);
            prop_assert_eq!(a.sub(&b).unwrap().as_slice()[0], x.wrapping_sub(y) as u128);
            prop_assert_eq!(a.mul(&b).unwrap().as_slice()[0], x.wrapping_mul(y) as u128);
            prop_assert_eq!(a.arshift(bits).as_slice()[0], ((x as i64) >> bits) as u64 as u128);
            prop_assert_eq!(a.rshift(bits).as_slice()[0], (x >> bits) as u128);
        }

        #[test]
        fn ring32_matches_native_wrapping(x in any::<u32>(), y in any::<u32>(), bits in 0usize..32) {
            let a = arr(FieldType::Fm32, vec![x as u128]);
            let b = arr(FieldType::Fm32, vec![y as u128]);
            prop_assert_eq!(a.mul(&b).unwrap().as_slice()[0], x.wrapping_mul(y) as u128);
            prop_assert_eq!(a.arshift(bits).as_slice()[0], ((x as i32) >> bits) as u32 as u128);
            prop_assert_eq!(a.lshift(bits).as_slice()[0], (x << bits) as u128);
        }
    }
}
