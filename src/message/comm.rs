use super::link::{Channel, Link, Tag, MAX_TAG};
use super::mailbox::Source;
use super::transport::Transport;
use crate::coder::{CborCoder, Coder, Payload};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::Registry;
use log::debug;
use std::cell::{Cell, RefCell};
use std::net::{SocketAddr, TcpListener};

/// A fixed group of ranked processes, and this process's handle for
/// exchanging typed messages with the rest of the group.
///
/// Point-to-point operations live here; collectives are in
/// [`super::collective`]. Sends never wait for the receiver. Receives block
/// until a matching message arrives; the runtime does no deadlock detection,
/// so two ranks that each receive before sending will wait forever (or until
/// the configured receive timeout).
///
/// Once [`Communicator::close`] is called (or the communicator is dropped),
/// every operation fails with [`Error::Closed`].
pub struct Communicator {
    registry: Registry,
    transport: RefCell<Option<Transport>>,
    coder: CborCoder<Payload>,
    epoch: Cell<u64>,
}

impl Communicator {
    /// Joins the group listening on `peers`, as the rank whose address is
    /// `peers[rank]`.
    pub fn connect(rank: usize, peers: Vec<SocketAddr>, config: &Config) -> Result<Self> {
        let transport = Transport::connect(rank, peers, config)?;
        Self::from_transport(transport, config)
    }

    /// Like [`Communicator::connect`], with a listener already bound to this
    /// rank's address.
    pub fn from_listener(
        rank: usize,
        listener: TcpListener,
        peers: Vec<SocketAddr>,
        config: &Config,
    ) -> Result<Self> {
        let transport = Transport::from_listener(rank, listener, peers, config)?;
        Self::from_transport(transport, config)
    }

    pub fn from_link(link: Box<dyn Link>, config: &Config) -> Result<Self> {
        Self::from_transport(Transport::from_link(link, config), config)
    }

    fn from_transport(transport: Transport, config: &Config) -> Result<Self> {
        let registry = Registry::new(transport.rank(), transport.size(), config.host_id.clone())?;
        debug!(
            "rank {} of {} ready on {}",
            registry.rank(),
            registry.size(),
            registry.host_id()
        );
        Ok(Self {
            registry,
            transport: RefCell::new(Some(transport)),
            coder: CborCoder::new(),
            epoch: Cell::new(0),
        })
    }

    pub fn rank(&self) -> usize {
        self.registry.rank()
    }

    pub fn size(&self) -> usize {
        self.registry.size()
    }

    pub fn host_id(&self) -> &str {
        self.registry.host_id()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Sends `value` to `dest` with the given tag. Returns once the message
    /// is handed to the transport; there is no acknowledgment.
    pub fn send(&self, value: impl Into<Payload>, dest: usize, tag: Tag) -> Result<()> {
        check_tag(tag)?;
        if dest >= self.size() || dest == self.rank() {
            return Err(Error::InvalidDestination {
                rank: dest,
                size: self.size(),
            });
        }
        self.send_payload(value.into(), dest, Channel::User(tag))
    }

    /// Blocks until a message with the given tag arrives from `source`, and
    /// returns its payload as a `V`.
    pub fn receive<V>(&self, source: Source, tag: Tag) -> Result<V>
    where
        V: TryFrom<Payload, Error = Error>,
    {
        self.receive_with_source(source, tag).map(|(value, _)| value)
    }

    /// Like [`Communicator::receive`], also returning the rank that sent the
    /// message. Useful with [`Source::Any`].
    pub fn receive_with_source<V>(&self, source: Source, tag: Tag) -> Result<(V, usize)>
    where
        V: TryFrom<Payload, Error = Error>,
    {
        check_tag(tag)?;
        if let Source::Rank(rank) = source {
            if rank >= self.size() || rank == self.rank() {
                return Err(Error::InvalidSource {
                    rank,
                    size: self.size(),
                });
            }
        }
        let (payload, sender) = self.receive_payload(source, Channel::User(tag))?;
        Ok((V::try_from(payload)?, sender))
    }

    /// Releases the transport. Closing twice does nothing.
    pub fn close(&self) {
        if let Some(mut transport) = self.transport.borrow_mut().take() {
            transport.close();
            debug!("rank {} closed its communicator", self.rank());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.borrow().is_none()
    }

    pub(crate) fn send_payload(
        &self,
        payload: Payload,
        dest: usize,
        channel: Channel,
    ) -> Result<()> {
        let bytes = self.coder.encode(payload)?;
        self.with_transport(|t| t.send_bytes(dest, channel, bytes))
    }

    pub(crate) fn receive_payload(
        &self,
        source: Source,
        channel: Channel,
    ) -> Result<(Payload, usize)> {
        let (bytes, sender) = self.with_transport(|t| t.receive_bytes(source, channel))?;
        Ok((self.coder.decode(&bytes)?, sender))
    }

    /// Advances to the next collective epoch and returns it. Every rank
    /// calls collectives in the same order, so equal epochs identify the
    /// same collective call on every rank.
    pub(crate) fn next_epoch(&self) -> u64 {
        let epoch = self.epoch.get();
        self.epoch.set(epoch + 1);
        epoch
    }

    fn with_transport<R>(&self, f: impl FnOnce(&mut Transport) -> Result<R>) -> Result<R> {
        match self.transport.borrow_mut().as_mut() {
            Some(transport) => f(transport),
            None => Err(Error::Closed),
        }
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.close()
    }
}

fn check_tag(tag: Tag) -> Result<()> {
    if tag > MAX_TAG {
        Err(Error::InvalidTag(tag))
    } else {
        Ok(())
    }
}
