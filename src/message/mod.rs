//! A minimal distributed message-passing API.
//!
//! This module exports a minimal message-passing API, which is encapsulated
//! by the [`Communicator`] type. A communicator sits on a [`Transport`],
//! which matches incoming messages by source and tag, which in turn sits on
//! a [`Link`] that only moves bytes. Two links are included: a pure-Rust TCP
//! mesh in [`TcpLink`], and an in-process one in [`LocalLink`]. Collective
//! operations (reduce, broadcast, reduce-all, barrier) are built on the
//! communicator's point-to-point primitives.

mod collective;
mod comm;
mod link;
mod local;
mod mailbox;
mod tcp;
mod transport;
mod util;

pub use collective::{Op, ReduceOp};
pub use comm::Communicator;
pub use link::{Channel, Envelope, Inbound, Link, Tag, MAX_TAG};
pub use local::LocalLink;
pub use mailbox::{Mailbox, Source};
pub use tcp::TcpLink;
pub use transport::Transport;
