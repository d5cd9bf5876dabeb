use super::link::{Channel, Link};
use super::mailbox::{Mailbox, Source};
use super::tcp::TcpLink;
use crate::config::Config;
use crate::error::{Error, Result};
use log::{debug, trace};
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

/// Byte-message delivery with selective receive.
///
/// A `Transport` pairs a [`Link`], which moves bytes between ranks, with a
/// [`Mailbox`], which matches arrivals against what the caller asks for.
/// Messages from one source to one destination on one channel are received
/// in the order they were sent.
pub struct Transport {
    link: Box<dyn Link>,
    mailbox: Mailbox,
    receive_timeout: Option<Duration>,
    closed: bool,
}

impl Transport {
    /// Establishes TCP channels among all participants. `peers[rank]` is the
    /// address this process listens on.
    pub fn connect(rank: usize, peers: Vec<SocketAddr>, config: &Config) -> Result<Self> {
        let link = TcpLink::connect(rank, peers, config.connect_timeout)?;
        Ok(Self::from_link(Box::new(link), config))
    }

    /// Like [`Transport::connect`], with a listener already bound to this
    /// rank's address.
    pub fn from_listener(
        rank: usize,
        listener: TcpListener,
        peers: Vec<SocketAddr>,
        config: &Config,
    ) -> Result<Self> {
        let link = TcpLink::from_listener(rank, listener, peers, config.connect_timeout)?;
        Ok(Self::from_link(Box::new(link), config))
    }

    pub fn from_link(link: Box<dyn Link>, config: &Config) -> Self {
        let mailbox = Mailbox::new(link.rank(), link.size());
        Self {
            link,
            mailbox,
            receive_timeout: config.receive_timeout,
            closed: false,
        }
    }

    pub fn rank(&self) -> usize {
        self.link.rank()
    }

    pub fn size(&self) -> usize {
        self.link.size()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Hands `bytes` to the outbound channel for `dest` without waiting for
    /// the receiver.
    pub fn send_bytes(&mut self, dest: usize, channel: Channel, bytes: Vec<u8>) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.link.send_frame(dest, channel, bytes)
    }

    /// Blocks until a message from `source` on `channel` is available, and
    /// returns its bytes together with the rank that sent it.
    pub fn receive_bytes(&mut self, source: Source, channel: Channel) -> Result<(Vec<u8>, usize)> {
        if self.closed {
            return Err(Error::Closed);
        }
        let envelope = self
            .mailbox
            .take(self.link.inbound(), source, channel, self.receive_timeout)?;
        trace!(
            "rank {} <- {} on {:?} ({} bytes)",
            self.rank(),
            envelope.source,
            channel,
            envelope.bytes.len()
        );
        Ok((envelope.bytes, envelope.source))
    }

    /// Releases all channels. Messages received but never matched are
    /// discarded. Closing twice does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.link.close();
        let discarded = self.mailbox.clear();
        if discarded > 0 {
            debug!("rank {} discarded {} unmatched messages", self.rank(), discarded);
        }
        self.closed = true;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close()
    }
}
