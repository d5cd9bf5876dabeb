//! Provides a link between ranks that live in the same process.
//!
//! Each rank owns the receiving end of one crossbeam channel, and holds the
//! sending ends of every other rank's channel. This is useful for running a
//! whole group on threads of one process, without touching the network.

use super::link::{Channel, Envelope, Inbound, Link};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace};

pub struct LocalLink {
    rank: usize,
    size: usize,
    peers: Vec<Option<Sender<Inbound>>>,
    inbound: Receiver<Inbound>,
    closed: bool,
}

impl LocalLink {
    /// Creates a fully connected group of `size` links. The link at index
    /// `n` has rank `n`.
    pub fn mesh(size: usize) -> Vec<LocalLink> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbound)| LocalLink {
                rank,
                size,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, s)| (peer != rank).then(|| s.clone()))
                    .collect(),
                inbound,
                closed: false,
            })
            .collect()
    }
}

impl Link for LocalLink {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_frame(&mut self, dest: usize, channel: Channel, bytes: Vec<u8>) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        let sender = self
            .peers
            .get(dest)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidDestination {
                rank: dest,
                size: self.size,
            })?;
        trace!("rank {} -> {} on {:?} ({} bytes)", self.rank, dest, channel, bytes.len());
        sender
            .send(Inbound::Message(Envelope {
                source: self.rank,
                channel,
                bytes,
            }))
            .map_err(|_| Error::Connection(format!("rank {} is no longer receiving", dest)))
    }

    fn inbound(&self) -> &Receiver<Inbound> {
        &self.inbound
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        for sender in self.peers.iter_mut().filter_map(Option::take) {
            // A peer that already closed has dropped its receiver.
            let _ = sender.send(Inbound::Lost(self.rank));
        }
        self.inbound = crossbeam_channel::never();
        self.closed = true;
        debug!("rank {} closed its local link", self.rank);
    }
}

impl Drop for LocalLink {
    fn drop(&mut self) {
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_arrive_tagged_with_their_source() {
        let mut links = LocalLink::mesh(3);
        links[2].send_frame(0, Channel::User(1), b"hi".to_vec()).unwrap();
        match links[0].inbound().recv().unwrap() {
            Inbound::Message(envelope) => {
                assert_eq!(envelope.source, 2);
                assert_eq!(envelope.channel, Channel::User(1));
                assert_eq!(envelope.bytes, b"hi");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn self_send_is_rejected() {
        let mut links = LocalLink::mesh(2);
        assert!(matches!(
            links[1].send_frame(1, Channel::User(0), Vec::new()),
            Err(Error::InvalidDestination { rank: 1, size: 2 })
        ));
    }

    #[test]
    fn closing_notifies_peers_and_refuses_their_sends() {
        let mut links = LocalLink::mesh(2);
        links[1].close();
        assert!(matches!(links[0].inbound().recv().unwrap(), Inbound::Lost(1)));
        assert!(matches!(
            links[0].send_frame(1, Channel::User(0), Vec::new()),
            Err(Error::Connection(_))
        ));
        assert!(matches!(
            links[1].send_frame(0, Channel::User(0), Vec::new()),
            Err(Error::Closed)
        ));
    }
}
