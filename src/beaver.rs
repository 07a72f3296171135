//! The Beaver-triple generation contract used by the secret-sharing protocol layer.
//!
//! [`Beaver`] is backend-agnostic: the protocol layer only depends on this trait. The
//! [`tfp::BeaverTfp`] backend implements it with a trusted first party (rank 0) that learns the
//! seeds of all parties and corrects its own shares so that the correlations hold. It is meant
//! for testing and benchmarking protocols built on Beaver triples and provides **no**
//! confidentiality against rank 0.

use std::future::Future;

use crate::{
    channel,
    prg::CounterExhausted,
    ring::{FieldType, RingArray, RingError, Shape},
};

pub mod tfp;
mod trusted_party;

/// The local shares `(a, b, c)` of one party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    /// The first share.
    pub a: RingArray,
    /// The second share.
    pub b: RingArray,
    /// The third share.
    pub c: RingArray,
}

/// The local shares `(a, b)` of one party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    /// The first share.
    pub a: RingArray,
    /// The second share.
    pub b: RingArray,
}

/// A generator of correlated randomness for secret-sharing based MPC.
///
/// Every party calls the same operations with the same arguments in the same order. Unless
/// stated otherwise, shares are additive modulo `2^k`.
pub trait Beaver: Sized {
    /// A multiplication triple with `c = a * b` elementwise.
    fn mul(
        &mut self,
        field: FieldType,
        shape: &Shape,
    ) -> impl Future<Output = Result<Triple, Error>> + Send;

    /// A matrix triple with `a: (m, k)`, `b: (k, n)` and `c = a x b: (m, n)`.
    fn dot(
        &mut self,
        field: FieldType,
        m: usize,
        n: usize,
        k: usize,
    ) -> impl Future<Output = Result<Triple, Error>> + Send;

    /// A boolean (xor-shared) triple with `c = a & b` bitwise.
    fn and(
        &mut self,
        field: FieldType,
        shape: &Shape,
    ) -> impl Future<Output = Result<Triple, Error>> + Send;

    /// A truncation pair with `b = a >> bits` (arithmetic shift of the shared value).
    fn trunc(
        &mut self,
        field: FieldType,
        shape: &Shape,
        bits: usize,
    ) -> impl Future<Output = Result<Pair, Error>> + Send;

    /// A probabilistic truncation triple `(r, rc, rb)`.
    ///
    /// `rc` shares bits `[bits, k-2]` of `r` (shifted down to the least significant position)
    /// and `rb` shares the most significant bit of `r`.
    fn trunc_pr(
        &mut self,
        field: FieldType,
        shape: &Shape,
        bits: usize,
    ) -> impl Future<Output = Result<Triple, Error>> + Send;

    /// Additive shares of uniformly random bits.
    fn rand_bit(
        &mut self,
        field: FieldType,
        shape: &Shape,
    ) -> impl Future<Output = Result<RingArray, Error>> + Send;

    /// A permutation pair with `b = permute(a, perm)`, i.e. `b[i] = a[perm[i]]`.
    ///
    /// `perm` is public to the party `perm_rank`, which must pass `Some`. All other parties
    /// pass `None`. The permutation acts on the flattened array.
    fn perm_pair(
        &mut self,
        field: FieldType,
        shape: &Shape,
        perm_rank: usize,
        perm: Option<&[usize]>,
    ) -> impl Future<Output = Result<Pair, Error>> + Send;

    /// A zero-test pair: `a` is shared additively, `b` shares the same value with xor.
    fn eqz(
        &mut self,
        field: FieldType,
        shape: &Shape,
    ) -> impl Future<Output = Result<Pair, Error>> + Send;

    /// Derives an independent generator with its own randomness and communication context.
    ///
    /// This is a collective operation, all parties must spawn together.
    fn spawn(&mut self) -> impl Future<Output = Result<Self, Error>> + Send;
}

/// Errors that can occur while generating correlated randomness.
#[derive(Debug)]
pub enum Error {
    /// A message could not be sent or received.
    ChannelError(channel::Error),
    /// The arrays are malformed or do not fit together.
    RingError(RingError),
    /// The shift amount does not fit into the ring.
    InvalidBits {
        /// The requested shift.
        bits: usize,
        /// The ring of the operation.
        field: FieldType,
    },
    /// The specified party does not exist.
    PartyDoesNotExist(usize),
    /// The party owning the permutation did not provide it.
    MissingPermutation,
    /// The seed exchange did not yield one seed per party.
    RosterSize {
        /// The number of parties.
        expected: usize,
        /// The number of seeds received.
        actual: usize,
    },
    /// The pseudo-random stream of the session is used up.
    CounterExhausted,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ChannelError(e) => write!(f, "Channel error: {e}"),
            Error::RingError(e) => write!(f, "Ring error: {e}"),
            Error::InvalidBits { bits, field } => {
                write!(f, "Cannot shift by {bits} bits in a {}-bit ring", field.bits())
            }
            Error::PartyDoesNotExist(p) => write!(f, "Party {p} does not exist"),
            Error::MissingPermutation => {
                f.write_str("The party owning the permutation did not provide it")
            }
            Error::RosterSize { expected, actual } => {
                write!(f, "Expected {expected} seeds, received {actual}")
            }
            Error::CounterExhausted => f.write_str("The pseudo-random counter is exhausted"),
        }
    }
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        Self::ChannelError(e)
    }
}

impl From<RingError> for Error {
    fn from(e: RingError) -> Self {
        Self::RingError(e)
    }
}

impl From<CounterExhausted> for Error {
    fn from(_: CounterExhausted) -> Self {
        Self::CounterExhausted
    }
}
