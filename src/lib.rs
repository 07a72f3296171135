//! Correlated randomness (Beaver triples and friends) for secret-sharing based multi-party
//! computation, generated with the help of a trusted first party.
//!
//! Protocols built on additive or xor secret sharing consume large amounts of preprocessed
//! randomness: multiplication and matrix triples, boolean AND triples, truncation pairs, random
//! bits, permutation pairs and zero-test pairs. This crate provides them behind the
//! backend-agnostic [`beaver::Beaver`] trait.
//!
//! ## Main Components
//!
//! * [`beaver`]: The [`beaver::Beaver`] contract and the trusted-first-party backend
//!   [`beaver::tfp::BeaverTfp`].
//! * [`channel`]: Communication abstractions for exchanging tagged messages between parties.
//! * [`prg`]: Deterministic expansion of shares from a seed and a counter.
//! * [`ring`]: Arrays over `Z/2^k` for `k` in {32, 64, 128}.
//!
//! ## Basic Usage
//!
//! Every party connects a [`channel::Channel`] to the other parties and joins a session with
//! [`beaver::tfp::BeaverTfp::new`]. The parties then request the same correlations in the same
//! order. For simulated environments (testing/development), [`beaver::tfp::simulate`] connects
//! all parties in memory:
//!
//! ```
//! use beaver_tfp::{
//!     beaver::{Beaver, tfp},
//!     ring::{FieldType, RecOp, RingArray, Shape, reconstruct},
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sessions = tfp::simulate(3).await?;
//! let shape = Shape::new([4])?;
//! let triples = futures::future::try_join_all(
//!     sessions.iter_mut().map(|s| s.mul(FieldType::Fm64, &shape)),
//! )
//! .await?;
//!
//! let open = |shares: Vec<RingArray>| reconstruct(RecOp::Add, &shares);
//! let a = open(triples.iter().map(|t| t.a.clone()).collect())?;
//! let b = open(triples.iter().map(|t| t.b.clone()).collect())?;
//! let c = open(triples.iter().map(|t| t.c.clone()).collect())?;
//! assert_eq!(c, a.mul(&b)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! The trusted first party (rank 0) learns the seeds, and therefore all shares, of every party.
//! The backend is meant for testing and benchmarking protocols and provides **no** confidentiality
//! against rank 0.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod beaver;
pub mod channel;
pub mod prg;
pub mod ring;
