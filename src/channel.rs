//! A communication channel used to send/receive tagged messages to/from the other parties.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::future::try_join_all;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{
    self,
    mpsc::{Receiver, Sender, channel, error::SendError},
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug)]
pub struct Error {
    /// The tag of the message exchange during which the error occurred.
    pub tag: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    SendError(String),
    /// The message could not be (de-)serialized.
    SerdeError(String),
    /// The addressed party is not part of the channel.
    InvalidParty(usize),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = &self.tag;
        match &self.reason {
            ErrorKind::RecvError(e) => write!(f, "Could not receive '{tag}': {e}"),
            ErrorKind::SendError(e) => write!(f, "Could not send '{tag}': {e}"),
            ErrorKind::SerdeError(e) => write!(f, "Could not (de-)serialize '{tag}': {e}"),
            ErrorKind::InvalidParty(p) => write!(f, "Party {p} is not part of '{tag}'"),
        }
    }
}

/// A communication channel connecting a fixed set of parties ranked `0..world_size()`.
///
/// Messages between two parties are delivered in order. Every message carries a tag, the
/// receiver names the tag it expects so that unrelated traffic is never mistaken for it.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// The rank of the local party.
    fn rank(&self) -> usize;

    /// The number of parties connected by the channel.
    fn world_size(&self) -> usize;

    /// Sends a message to the party with the given rank.
    fn send_bytes_to(
        &self,
        party: usize,
        tag: &str,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits the next message with the given tag from the party with the given rank.
    fn recv_bytes_from(
        &self,
        party: usize,
        tag: &str,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;

    /// Derives an independent channel between the same parties.
    ///
    /// Every party must spawn its sub-contexts in the same order, the n-th spawned channel of one
    /// party is connected to the n-th spawned channel of every other party.
    fn spawn(&self) -> Self
    where
        Self: Sized;
}

fn check_party(channel: &impl Channel, party: usize, tag: &str) -> Result<(), Error> {
    if party < channel.world_size() && party != channel.rank() {
        Ok(())
    } else {
        Err(Error {
            tag: tag.to_string(),
            reason: ErrorKind::InvalidParty(party),
        })
    }
}

/// Serializes and sends a message to the other party.
pub(crate) async fn send_to(
    channel: &impl Channel,
    party: usize,
    tag: &str,
    msg: &impl Serialize,
) -> Result<(), Error> {
    check_party(channel, party, tag)?;
    let msg = bincode::serialize(msg).map_err(|e| Error {
        tag: tag.to_string(),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    trace!("Sending '{tag}' to party {party} ({} bytes)", msg.len());
    channel
        .send_bytes_to(party, tag, msg)
        .await
        .map_err(|e| Error {
            tag: tag.to_string(),
            reason: ErrorKind::SendError(format!("{e:?}")),
        })
}

/// Receives and deserializes a message from the other party.
pub(crate) async fn recv_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    tag: &str,
) -> Result<T, Error> {
    check_party(channel, party, tag)?;
    let msg = channel
        .recv_bytes_from(party, tag)
        .await
        .map_err(|e| Error {
            tag: tag.to_string(),
            reason: ErrorKind::RecvError(format!("{e:?}")),
        })?;
    trace!("Received '{tag}' from party {party} ({} bytes)", msg.len());
    bincode::deserialize(&msg).map_err(|e| Error {
        tag: tag.to_string(),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// Collects one value from every party at `root`.
///
/// Every party must call this. The root receives `Some` of all values indexed by rank, all other
/// parties receive `None`.
pub(crate) async fn gather<T: Serialize + DeserializeOwned + Clone>(
    channel: &impl Channel,
    value: &T,
    root: usize,
    tag: &str,
) -> Result<Option<Vec<T>>, Error> {
    let me = channel.rank();
    if me != root {
        send_to(channel, root, tag, value).await?;
        return Ok(None);
    }
    let mut values = try_join_all((0..channel.world_size()).filter(|&p| p != me).map(
        async |p| recv_from::<T>(channel, p, tag).await.map(|v| (p, v)),
    ))
    .await?;
    values.push((me, value.clone()));
    values.sort_by_key(|(p, _)| *p);
    Ok(Some(values.into_iter().map(|(_, v)| v).collect()))
}

type Envelope = (String, Vec<u8>);

struct Link {
    sender: Option<Sender<Envelope>>,
    receiver: Option<Receiver<Envelope>>,
}

/// The point-to-point links of a simulated network that are not fully connected yet, keyed by
/// (context, from, to). The sending and the receiving party each take their half of a link, the
/// entry is dropped once both halves are gone.
#[derive(Default)]
struct Links(Mutex<HashMap<(String, usize, usize), Link>>);

impl Links {
    fn take<T>(
        &self,
        key: (String, usize, usize),
        f: impl FnOnce(&mut Link) -> Option<T>,
    ) -> Option<T> {
        let mut links = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let link = links.entry(key.clone()).or_insert_with(|| {
            let (sender, receiver) = channel(BUFFER_CAPACITY);
            Link {
                sender: Some(sender),
                receiver: Some(receiver),
            }
        });
        let half = f(link);
        if link.sender.is_none() && link.receiver.is_none() {
            links.remove(&key);
        }
        half
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

const BUFFER_CAPACITY: usize = 1024;

/// A simple in-memory channel using [`Sender`] and [`Receiver`], for simulations and tests.
pub struct SimpleChannel {
    rank: usize,
    parties: usize,
    context: String,
    links: Arc<Links>,
    s: Vec<Option<Sender<Envelope>>>,
    r: Vec<Option<sync::Mutex<Receiver<Envelope>>>>,
    spawned: AtomicUsize,
}

impl fmt::Debug for SimpleChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleChannel")
            .field("rank", &self.rank)
            .field("parties", &self.parties)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        let links = Arc::new(Links::default());
        (0..parties)
            .map(|rank| Self::connect(Arc::clone(&links), "root".to_string(), rank, parties))
            .collect()
    }

    fn connect(links: Arc<Links>, context: String, rank: usize, parties: usize) -> Self {
        let mut s = vec![];
        let mut r = vec![];
        for p in 0..parties {
            if p == rank {
                s.push(None);
                r.push(None);
                continue;
            }
            s.push(links.take((context.clone(), rank, p), |l| l.sender.take()));
            r.push(
                links
                    .take((context.clone(), p, rank), |l| l.receiver.take())
                    .map(sync::Mutex::new),
            );
        }
        SimpleChannel {
            rank,
            parties,
            context,
            links,
            s,
            r,
            spawned: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug)]
/// The error raised by `recv` calls of a [`SimpleChannel`].
pub enum SimpleRecvError {
    /// The channel has been closed.
    Closed,
    /// The next message from the party carries a different tag.
    UnexpectedTag {
        /// The tag the receiver asked for.
        expected: String,
        /// The tag of the message that arrived.
        received: String,
    },
    /// There is no link to the party.
    NoLink(usize),
}

impl Channel for SimpleChannel {
    type SendError = SendError<Envelope>;
    type RecvError = SimpleRecvError;

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.parties
    }

    async fn send_bytes_to(
        &self,
        p: usize,
        tag: &str,
        msg: Vec<u8>,
    ) -> Result<(), SendError<Envelope>> {
        let envelope = (tag.to_string(), msg);
        match self.s.get(p).and_then(Option::as_ref) {
            Some(sender) => sender.send(envelope).await,
            None => Err(SendError(envelope)),
        }
    }

    async fn recv_bytes_from(&self, p: usize, tag: &str) -> Result<Vec<u8>, SimpleRecvError> {
        let receiver = self
            .r
            .get(p)
            .and_then(Option::as_ref)
            .ok_or(SimpleRecvError::NoLink(p))?;
        let (received, msg) = receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or(SimpleRecvError::Closed)?;
        if received != tag {
            return Err(SimpleRecvError::UnexpectedTag {
                expected: tag.to_string(),
                received,
            });
        }
        Ok(msg)
    }

    fn spawn(&self) -> Self {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let context = format!("{}/{n}", self.context);
        Self::connect(Arc::clone(&self.links), context, self.rank, self.parties)
    }
}
