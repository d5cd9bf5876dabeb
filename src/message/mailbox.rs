//! Selective receive on top of a link's inbound channel.

use super::link::{Channel, Envelope, Inbound};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{trace, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Which sender a receive is willing to match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    Rank(usize),
    Any,
}

impl Source {
    fn admits(&self, rank: usize) -> bool {
        match self {
            Source::Rank(r) => *r == rank,
            Source::Any => true,
        }
    }
}

impl From<usize> for Source {
    fn from(rank: usize) -> Self {
        Source::Rank(rank)
    }
}

/// Holds messages that arrived before anyone asked for them.
///
/// Arrivals that do not match the pending request are kept in arrival order,
/// so that among all buffered messages matching a later request the earliest
/// one is delivered first. Combined with in-order delivery per peer, this
/// gives FIFO order per (source, channel).
pub struct Mailbox {
    rank: usize,
    undelivered: VecDeque<Envelope>,
    lost: Vec<bool>,
}

impl Mailbox {
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            undelivered: VecDeque::new(),
            lost: vec![false; size],
        }
    }

    /// The number of messages received but not yet matched.
    pub fn pending(&self) -> usize {
        self.undelivered.len()
    }

    /// Block until a message matching `(source, channel)` is available and
    /// return it. Waiting is bounded by `timeout` if one is given.
    pub fn take(
        &mut self,
        inbound: &Receiver<Inbound>,
        source: Source,
        channel: Channel,
        timeout: Option<Duration>,
    ) -> Result<Envelope> {
        let matches = |e: &Envelope| e.channel == channel && source.admits(e.source);

        if let Some(envelope) = self
            .undelivered
            .iter()
            .position(matches)
            .and_then(|index| self.undelivered.remove(index))
        {
            return Ok(envelope);
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            self.check_reachable(source)?;

            let next = match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    inbound.recv_deadline(deadline).map_err(|e| match e {
                        RecvTimeoutError::Timeout => Error::Timeout(timeout),
                        RecvTimeoutError::Disconnected => disconnected(),
                    })?
                }
                _ => inbound.recv().map_err(|_| disconnected())?,
            };
            match next {
                Inbound::Message(envelope) if matches(&envelope) => return Ok(envelope),
                Inbound::Message(envelope) => {
                    trace!(
                        "rank {} buffering message from {} on {:?}",
                        self.rank,
                        envelope.source,
                        envelope.channel
                    );
                    self.undelivered.push_back(envelope)
                }
                Inbound::Lost(peer) => {
                    warn!("rank {} lost its channel from rank {}", self.rank, peer);
                    if let Some(flag) = self.lost.get_mut(peer) {
                        *flag = true;
                    }
                }
            }
        }
    }

    /// Drop every buffered message, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.undelivered.len();
        self.undelivered.clear();
        count
    }

    fn check_reachable(&self, source: Source) -> Result<()> {
        match source {
            Source::Rank(peer) if self.lost.get(peer).copied().unwrap_or(true) => {
                Err(Error::Connection(format!(
                    "rank {} can no longer deliver to rank {}",
                    peer, self.rank
                )))
            }
            Source::Any
                if self
                    .lost
                    .iter()
                    .enumerate()
                    .all(|(peer, lost)| peer == self.rank || *lost) =>
            {
                Err(Error::Connection(format!(
                    "no peer can deliver to rank {} any more",
                    self.rank
                )))
            }
            _ => Ok(()),
        }
    }
}

fn disconnected() -> Error {
    Error::Connection("all inbound channels are closed".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Sender};
    use proptest::prelude::*;

    fn deliver(sender: &Sender<Inbound>, source: usize, tag: u32, bytes: &[u8]) {
        sender
            .send(Inbound::Message(Envelope {
                source,
                channel: Channel::User(tag),
                bytes: bytes.to_vec(),
            }))
            .unwrap();
    }

    #[test]
    fn out_of_order_tags_are_buffered_until_asked_for() {
        let (sender, inbound) = unbounded();
        let mut mailbox = Mailbox::new(0, 3);
        deliver(&sender, 1, 5, b"five");
        deliver(&sender, 1, 6, b"six");

        let six = mailbox.take(&inbound, Source::Rank(1), Channel::User(6), None).unwrap();
        assert_eq!(six.bytes, b"six");
        assert_eq!(mailbox.pending(), 1);

        let five = mailbox.take(&inbound, Source::Any, Channel::User(5), None).unwrap();
        assert_eq!((five.source, five.bytes), (1, b"five".to_vec()));
        assert_eq!(mailbox.pending(), 0);
    }

    #[test]
    fn wildcard_takes_the_earliest_match_exactly_once() {
        let (sender, inbound) = unbounded();
        let mut mailbox = Mailbox::new(0, 3);
        deliver(&sender, 2, 0, b"from two");
        deliver(&sender, 1, 0, b"from one");

        let first = mailbox.take(&inbound, Source::Any, Channel::User(0), None).unwrap();
        let second = mailbox.take(&inbound, Source::Any, Channel::User(0), None).unwrap();
        assert_eq!(first.source, 2);
        assert_eq!(second.source, 1);

        let timeout = Duration::from_millis(20);
        assert!(matches!(
            mailbox.take(&inbound, Source::Any, Channel::User(0), Some(timeout)),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn user_and_collective_channels_never_match_each_other() {
        let (sender, inbound) = unbounded();
        let mut mailbox = Mailbox::new(0, 2);
        sender
            .send(Inbound::Message(Envelope {
                source: 1,
                channel: Channel::Collective(0),
                bytes: vec![1],
            }))
            .unwrap();
        let timeout = Some(Duration::from_millis(20));
        assert!(mailbox.take(&inbound, Source::Rank(1), Channel::User(0), timeout).is_err());
        assert_eq!(mailbox.pending(), 1);
    }

    #[test]
    fn waiting_on_a_lost_peer_is_a_connection_error() {
        let (sender, inbound) = unbounded();
        let mut mailbox = Mailbox::new(0, 3);
        deliver(&sender, 1, 0, b"last words");
        sender.send(Inbound::Lost(1)).unwrap();

        assert_eq!(
            mailbox.take(&inbound, Source::Rank(1), Channel::User(0), None).unwrap().bytes,
            b"last words"
        );
        assert!(matches!(
            mailbox.take(&inbound, Source::Rank(1), Channel::User(0), None),
            Err(Error::Connection(_))
        ));
    }

    #[test]
    fn closed_inbound_channel_is_a_connection_error() {
        let (sender, inbound) = unbounded::<Inbound>();
        drop(sender);
        let mut mailbox = Mailbox::new(0, 2);
        assert!(matches!(
            mailbox.take(&inbound, Source::Any, Channel::User(0), None),
            Err(Error::Connection(_))
        ));
    }

    proptest! {
        #[test]
        fn delivery_is_fifo_per_source_and_tag(
            arrivals in prop::collection::vec((1usize..4, 0u32..3), 1..64)
        ) {
            let (sender, inbound) = unbounded();
            let mut mailbox = Mailbox::new(0, 4);
            for (seq, (source, tag)) in arrivals.iter().enumerate() {
                deliver(&sender, *source, *tag, &seq.to_le_bytes());
            }

            // Drain by (source, tag) class in reverse order of first arrival,
            // so that most messages sit in the buffer before being asked for.
            let mut classes: Vec<(usize, u32)> = Vec::new();
            for class in &arrivals {
                if !classes.contains(class) {
                    classes.push(*class);
                }
            }
            for (source, tag) in classes.into_iter().rev() {
                let expected: Vec<usize> = arrivals
                    .iter()
                    .enumerate()
                    .filter(|(_, class)| **class == (source, tag))
                    .map(|(seq, _)| seq)
                    .collect();
                for seq in expected {
                    let envelope = mailbox
                        .take(&inbound, Source::Rank(source), Channel::User(tag), None)
                        .unwrap();
                    prop_assert_eq!(envelope.bytes, seq.to_le_bytes().to_vec());
                }
            }
            prop_assert_eq!(mailbox.pending(), 0);
        }
    }
}
