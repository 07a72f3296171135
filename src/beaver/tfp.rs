//! Beaver triples generated with the help of a trusted first party.
//!
//! Every party expands its shares locally from its own [`Seed`]. During construction all seeds
//! are gathered at the [`AGGREGATOR`], which from then on replays the draws of all parties and
//! corrects its own shares so that the requested correlation holds for the reconstructed values.
//! Apart from the seed exchange, only [`Beaver::perm_pair`] communicates, and only if the
//! permutation is not known to the aggregator already.
//!
//! The aggregator learns every share of every party. Use this backend for tests and benchmarks of
//! protocols, not to protect data.

use futures::future::try_join_all;
use tracing::{Level, debug, instrument};

use super::{Beaver, Error, Pair, Triple, trusted_party::TrustedParty};
use crate::{
    channel::{Channel, SimpleChannel, gather, recv_from, send_to},
    prg::{PrgState, Seed},
    ring::{FieldType, RingArray, Shape, validate_permutation},
};

/// The rank that collects all seeds and corrects its shares.
pub const AGGREGATOR: usize = 0;

const SEEDS_TAG: &str = "BEAVER_TFP:SYNC_SEEDS";
const PERM_TAG: &str = "BEAVER_TFP:PERM";

/// A Beaver session of one party, see the [module docs](self).
pub struct BeaverTfp<C: Channel> {
    channel: C,
    prg: PrgState,
    dealer: Option<TrustedParty>,
}

impl<C: Channel> std::fmt::Debug for BeaverTfp<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaverTfp")
            .field("rank", &self.channel.rank())
            .field("world_size", &self.channel.world_size())
            .field("counter", &self.prg.counter())
            .finish_non_exhaustive()
    }
}

impl<C: Channel + Send + Sync> BeaverTfp<C> {
    /// Joins a session with a freshly sampled seed.
    ///
    /// All parties connected by `channel` must call this (or [`BeaverTfp::with_seed`]) together.
    pub async fn new(channel: C) -> Result<Self, Error> {
        Self::with_seed(channel, Seed::random()).await
    }

    /// Joins a session using the given seed.
    ///
    /// Reusing a seed across sessions repeats all shares, so this is meant for reproducible
    /// simulations.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub async fn with_seed(channel: C, seed: Seed) -> Result<Self, Error> {
        let parties = channel.world_size();
        let rank = channel.rank();
        if rank >= parties {
            return Err(Error::PartyDoesNotExist(rank));
        }
        let dealer = match gather(&channel, &seed, AGGREGATOR, SEEDS_TAG).await? {
            Some(seeds) if seeds.len() != parties => {
                return Err(Error::RosterSize {
                    expected: parties,
                    actual: seeds.len(),
                });
            }
            Some(seeds) => {
                debug!("Aggregator received the seeds of {parties} parties");
                Some(TrustedParty::new(seeds))
            }
            None => None,
        };
        Ok(BeaverTfp {
            channel,
            prg: PrgState::new(seed),
            dealer,
        })
    }
}

impl<C: Channel> BeaverTfp<C> {
    /// The rank of the local party.
    pub fn rank(&self) -> usize {
        self.channel.rank()
    }

    /// The number of parties in the session.
    pub fn world_size(&self) -> usize {
        self.channel.world_size()
    }

    /// The next unused counter of the local pseudo-random stream.
    pub fn counter(&self) -> u128 {
        self.prg.counter()
    }

    /// The seeds of all parties, only known to the aggregator.
    #[cfg(test)]
    pub(crate) fn seed_roster(&self) -> Option<&[Seed]> {
        self.dealer.as_ref().map(TrustedParty::seeds)
    }
}

fn check_bits(field: FieldType, bits: usize) -> Result<(), Error> {
    if bits < field.bits() {
        Ok(())
    } else {
        Err(Error::InvalidBits { bits, field })
    }
}

impl<C: Channel + Send + Sync> Beaver for BeaverTfp<C> {
    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn mul(&mut self, field: FieldType, shape: &Shape) -> Result<Triple, Error> {
        debug!("Mul triple of shape {shape}");
        let (a, da) = self.prg.draw(field, shape)?;
        let (b, db) = self.prg.draw(field, shape)?;
        let (mut c, dc) = self.prg.draw(field, shape)?;
        if let Some(dealer) = &self.dealer {
            c.add_in_place(&dealer.adjust_mul([&da, &db, &dc])?)?;
        }
        Ok(Triple { a, b, c })
    }

    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn dot(&mut self, field: FieldType, m: usize, n: usize, k: usize) -> Result<Triple, Error> {
        debug!("Dot triple ({m}x{k}) * ({k}x{n})");
        let shapes = [
            Shape::matrix(m, k)?,
            Shape::matrix(k, n)?,
            Shape::matrix(m, n)?,
        ];
        let (a, da) = self.prg.draw(field, &shapes[0])?;
        let (b, db) = self.prg.draw(field, &shapes[1])?;
        let (mut c, dc) = self.prg.draw(field, &shapes[2])?;
        if let Some(dealer) = &self.dealer {
            c.add_in_place(&dealer.adjust_dot([&da, &db, &dc], m, n, k)?)?;
        }
        Ok(Triple { a, b, c })
    }

    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn and(&mut self, field: FieldType, shape: &Shape) -> Result<Triple, Error> {
        debug!("And triple of shape {shape}");
        let (a, da) = self.prg.draw(field, shape)?;
        let (b, db) = self.prg.draw(field, shape)?;
        let (mut c, dc) = self.prg.draw(field, shape)?;
        if let Some(dealer) = &self.dealer {
            c.xor_in_place(&dealer.adjust_and([&da, &db, &dc])?)?;
        }
        Ok(Triple { a, b, c })
    }

    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn trunc(&mut self, field: FieldType, shape: &Shape, bits: usize) -> Result<Pair, Error> {
        check_bits(field, bits)?;
        debug!("Trunc pair of shape {shape} by {bits} bits");
        let (a, da) = self.prg.draw(field, shape)?;
        let (mut b, db) = self.prg.draw(field, shape)?;
        if let Some(dealer) = &self.dealer {
            b.add_in_place(&dealer.adjust_trunc([&da, &db], bits)?)?;
        }
        Ok(Pair { a, b })
    }

    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn trunc_pr(
        &mut self,
        field: FieldType,
        shape: &Shape,
        bits: usize,
    ) -> Result<Triple, Error> {
        check_bits(field, bits)?;
        debug!("TruncPr triple of shape {shape} by {bits} bits");
        let (r, dr) = self.prg.draw(field, shape)?;
        let (mut rc, drc) = self.prg.draw(field, shape)?;
        let (mut rb, drb) = self.prg.draw(field, shape)?;
        if let Some(dealer) = &self.dealer {
            let (adjust_rc, adjust_rb) = dealer.adjust_trunc_pr([&dr, &drc, &drb], bits)?;
            rc.add_in_place(&adjust_rc)?;
            rb.add_in_place(&adjust_rb)?;
        }
        Ok(Triple {
            a: r,
            b: rc,
            c: rb,
        })
    }

    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn rand_bit(&mut self, field: FieldType, shape: &Shape) -> Result<RingArray, Error> {
        debug!("Random bits of shape {shape}");
        let (mut a, da) = self.prg.draw(field, shape)?;
        if let Some(dealer) = &self.dealer {
            a.add_in_place(&dealer.adjust_rand_bit(&da)?)?;
        }
        Ok(a)
    }

    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn perm_pair(
        &mut self,
        field: FieldType,
        shape: &Shape,
        perm_rank: usize,
        perm: Option<&[usize]>,
    ) -> Result<Pair, Error> {
        if perm_rank >= self.world_size() {
            return Err(Error::PartyDoesNotExist(perm_rank));
        }
        let owner = self.rank() == perm_rank;
        let perm = if owner {
            let perm = perm.ok_or(Error::MissingPermutation)?;
            validate_permutation(perm, shape.numel())?;
            Some(perm)
        } else {
            None
        };
        debug!("Permutation pair of shape {shape} owned by party {perm_rank}");
        let (a, da) = self.prg.draw(field, shape)?;
        let (mut b, db) = self.prg.draw(field, shape)?;

        if let Some(perm) = perm.filter(|_| perm_rank != AGGREGATOR) {
            send_to(&self.channel, AGGREGATOR, PERM_TAG, &perm).await?;
        }
        if let Some(dealer) = &self.dealer {
            let received;
            let perm = match perm {
                Some(perm) => perm,
                None => {
                    received = recv_from::<Vec<usize>>(&self.channel, perm_rank, PERM_TAG).await?;
                    validate_permutation(&received, shape.numel())?;
                    received.as_slice()
                }
            };
            b.add_in_place(&dealer.adjust_perm([&da, &db], perm)?)?;
        }
        Ok(Pair { a, b })
    }

    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn eqz(&mut self, field: FieldType, shape: &Shape) -> Result<Pair, Error> {
        debug!("Eqz pair of shape {shape}");
        let (a, da) = self.prg.draw(field, shape)?;
        let (mut b, db) = self.prg.draw(field, shape)?;
        if let Some(dealer) = &self.dealer {
            b.xor_in_place(&dealer.adjust_eqz([&da, &db])?)?;
        }
        Ok(Pair { a, b })
    }

    async fn spawn(&mut self) -> Result<Self, Error> {
        debug!("Spawning a child session of party {}", self.rank());
        Self::new(self.channel.spawn()).await
    }
}

/// Connects `parties` in-memory sessions with random seeds, indexed by rank.
pub async fn simulate(parties: usize) -> Result<Vec<BeaverTfp<SimpleChannel>>, Error> {
    let seeds: Vec<Seed> = (0..parties).map(|_| Seed::random()).collect();
    simulate_with_seeds(&seeds).await
}

/// Connects one in-memory session per seed, indexed by rank.
pub async fn simulate_with_seeds(seeds: &[Seed]) -> Result<Vec<BeaverTfp<SimpleChannel>>, Error> {
    let channels = SimpleChannel::channels(seeds.len());
    try_join_all(
        channels
            .into_iter()
            .zip(seeds)
            .map(|(channel, &seed)| BeaverTfp::with_seed(channel, seed)),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{RecOp, RingError, reconstruct};

    fn seeds(n: u128) -> Vec<Seed> {
        (0..n).map(|i| Seed::from(1000 + i)).collect()
    }

    #[tokio::test]
    async fn only_the_aggregator_holds_the_roster() -> Result<(), Error> {
        let seeds = seeds(4);
        let sessions = simulate_with_seeds(&seeds).await?;
        assert_eq!(sessions[AGGREGATOR].seed_roster(), Some(seeds.as_slice()));
        for session in &sessions[1..] {
            assert_eq!(session.seed_roster(), None);
        }
        Ok(())
    }

    #[tokio::test]
    async fn counters_advance_by_the_drawn_elements() -> Result<(), Error> {
        let mut sessions = simulate(3).await?;
        let shape = Shape::new([4])?;
        try_join_all(sessions.iter_mut().map(|s| s.mul(FieldType::Fm64, &shape))).await?;
        assert!(sessions.iter().all(|s| s.counter() == 12));
        try_join_all(sessions.iter_mut().map(|s| s.dot(FieldType::Fm32, 2, 3, 4))).await?;
        assert!(sessions.iter().all(|s| s.counter() == 12 + 8 + 12 + 6));
        try_join_all(sessions.iter_mut().map(|s| s.rand_bit(FieldType::Fm128, &shape))).await?;
        assert!(sessions.iter().all(|s| s.counter() == 42));
        Ok(())
    }

    #[tokio::test]
    async fn non_aggregators_only_keep_their_draws() -> Result<(), Error> {
        let seeds = seeds(2);
        let mut sessions = simulate_with_seeds(&seeds).await?;
        let shape = Shape::new([3, 2])?;
        let triples =
            try_join_all(sessions.iter_mut().map(|s| s.mul(FieldType::Fm64, &shape))).await?;
        let mut prg = PrgState::new(seeds[1]);
        let (a, _) = prg.draw(FieldType::Fm64, &shape)?;
        let (b, _) = prg.draw(FieldType::Fm64, &shape)?;
        let (c, _) = prg.draw(FieldType::Fm64, &shape)?;
        assert_eq!(triples[1], Triple { a, b, c });
        Ok(())
    }

    #[tokio::test]
    async fn permutation_is_relayed_to_the_aggregator() -> Result<(), Error> {
        let mut sessions = simulate(3).await?;
        let shape = Shape::new([5])?;
        let perm = [4, 2, 0, 1, 3];
        let pairs = try_join_all(sessions.iter_mut().map(|s| {
            let perm = (s.rank() == 2).then_some(perm.as_slice());
            s.perm_pair(FieldType::Fm64, &shape, 2, perm)
        }))
        .await?;
        let a = reconstruct(
            RecOp::Add,
            &pairs.iter().map(|p| p.a.clone()).collect::<Vec<_>>(),
        )?;
        let b = reconstruct(
            RecOp::Add,
            &pairs.iter().map(|p| p.b.clone()).collect::<Vec<_>>(),
        )?;
        assert_eq!(b, a.permute(&perm)?);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_drawing() -> Result<(), Error> {
        let mut sessions = simulate(2).await?;
        let shape = Shape::new([4])?;
        let session = &mut sessions[1];

        let err = session.trunc(FieldType::Fm32, &shape, 32).await.unwrap_err();
        assert!(matches!(err, Error::InvalidBits { bits: 32, .. }));
        let err = session.trunc_pr(FieldType::Fm64, &shape, 64).await.unwrap_err();
        assert!(matches!(err, Error::InvalidBits { bits: 64, .. }));
        let err = session
            .perm_pair(FieldType::Fm64, &shape, 2, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PartyDoesNotExist(2)));
        let err = session
            .perm_pair(FieldType::Fm64, &shape, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingPermutation));
        let err = session
            .perm_pair(FieldType::Fm64, &shape, 1, Some(&[0, 1, 1, 3]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RingError(RingError::InvalidPermutation { len: 4, .. })
        ));
        let err = session.dot(FieldType::Fm64, 2, 0, 3).await.unwrap_err();
        assert!(matches!(err, Error::RingError(RingError::InvalidShape(_))));
        let err = session
            .dot(FieldType::Fm64, 1 << 40, 1, 1 << 40)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RingError(RingError::ShapeOverflow(_))));
        let err = session
            .dot(FieldType::Fm64, 1 << 40, 1 << 40, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RingError(RingError::ShapeOverflow(_))));

        assert_eq!(session.counter(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn single_party_is_its_own_aggregator() -> Result<(), Error> {
        let mut sessions = simulate(1).await?;
        let session = &mut sessions[0];
        let shape = Shape::new([8])?;
        let Triple { a, b, c } = session.mul(FieldType::Fm128, &shape).await?;
        assert_eq!(c, a.mul(&b)?);
        let bits = session.rand_bit(FieldType::Fm32, &shape).await?;
        assert!(bits.as_slice().iter().all(|&x| x <= 1));
        Ok(())
    }
}
