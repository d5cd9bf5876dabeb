//! The raw delivery layer underneath a [`super::Transport`].
//!
//! A `Link` moves framed bytes from this process to one specific peer, and
//! surfaces everything peers sent to this process on a single inbound
//! channel, in arrival order. It knows nothing about matching, payload
//! types, or collectives.

use crate::error::Result;
use crossbeam_channel::Receiver;

/// A user-level message tag.
pub type Tag = u32;

/// The largest valid user tag.
pub const MAX_TAG: Tag = i32::MAX as Tag;

/// The matching class a message travels on. User traffic and collective
/// traffic never match each other, and each collective call gets its own
/// epoch so that unrelated collectives cannot cross-match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    User(Tag),
    Collective(u64),
}

impl Channel {
    pub(crate) fn to_wire(self) -> (u8, u64) {
        match self {
            Channel::User(tag) => (0, tag as u64),
            Channel::Collective(epoch) => (1, epoch),
        }
    }

    pub(crate) fn from_wire(kind: u8, tag: u64) -> Option<Self> {
        match kind {
            0 => Tag::try_from(tag).ok().map(Channel::User),
            1 => Some(Channel::Collective(tag)),
            _ => None,
        }
    }
}

/// A message as it arrived at the receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub source: usize,
    pub channel: Channel,
    pub bytes: Vec<u8>,
}

/// An event on a link's inbound channel.
#[derive(Debug)]
pub enum Inbound {
    Message(Envelope),
    /// The peer with this rank will not deliver anything more.
    Lost(usize),
}

/// Point-to-point byte delivery between the ranks of one group.
pub trait Link: Send {
    /// The rank of this end of the link.
    fn rank(&self) -> usize;

    /// The number of participants, including this one.
    fn size(&self) -> usize;

    /// Hand a message to the outbound path for `dest`. This must not wait
    /// for the receiver. Messages handed over for the same destination are
    /// delivered in the order given.
    fn send_frame(&mut self, dest: usize, channel: Channel, bytes: Vec<u8>) -> Result<()>;

    /// Everything peers delivered to this rank.
    fn inbound(&self) -> &Receiver<Inbound>;

    /// Release all channels. Messages already handed to `send_frame` are
    /// flushed first; a second call does nothing.
    fn close(&mut self);
}
