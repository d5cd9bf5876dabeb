//! Provides a message-passing link based on TCP sockets.
//!
//! TCP is a connection-oriented protocol, which means that a connection must
//! be established between the sending and receiving ends of the socket in
//! order to read from or write to a stream. Every rank opens one outgoing
//! stream to each peer, and accepts one incoming stream from each peer, all
//! before the link is handed out. Each direction of each pair therefore has
//! exactly one stream, which is what keeps messages in order.

use super::link::{Channel, Envelope, Inbound, Link};
use super::util;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::io::{BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const CONNECT_ATTEMPT: Duration = Duration::from_secs(1);
type Outgoing = (usize, Vec<u8>);

/// A full mesh of TCP connections between the ranks of one group.
///
/// Sends are handed to a background thread which owns the outgoing streams,
/// so they never wait for the receiver. A reader thread per incoming stream
/// forwards complete frames to a single inbound channel.
pub struct TcpLink {
    rank: usize,
    size: usize,
    send_s: Option<Sender<Outgoing>>,
    send_thread: Option<thread::JoinHandle<()>>,
    recv_r: Receiver<Inbound>,
    recv_threads: Vec<thread::JoinHandle<()>>,
    incoming: Vec<TcpStream>,
    severed: Arc<Vec<AtomicBool>>,
}

impl TcpLink {
    /// Binds `peers[rank]` and connects to every other address in `peers`.
    /// Fails if any peer cannot be reached within `timeout`.
    pub fn connect(rank: usize, peers: Vec<SocketAddr>, timeout: Duration) -> Result<Self> {
        let address = *peers.get(rank).ok_or_else(|| {
            Error::Config(format!("rank {} has no address among {} peers", rank, peers.len()))
        })?;
        let listener = TcpListener::bind(address)
            .map_err(|e| Error::Connection(format!("could not bind {}: {}", address, e)))?;
        Self::from_listener(rank, listener, peers, timeout)
    }

    /// Creates a `TcpLink` from a `TcpListener` already bound to this rank's
    /// address. The listener is placed in a non-blocking accept mode while
    /// peers connect, so the pre-existing blocking mode is overwritten.
    pub fn from_listener(
        rank: usize,
        listener: TcpListener,
        peers: Vec<SocketAddr>,
        timeout: Duration,
    ) -> Result<Self> {
        let size = peers.len();
        if rank >= size {
            return Err(Error::Config(format!("rank {} out of range for {} peers", rank, size)));
        }
        let deadline = Instant::now() + timeout;

        let mut outgoing = HashMap::new();
        for (peer, address) in peers.iter().enumerate().filter(|(peer, _)| *peer != rank) {
            let mut stream = connect_before(*address, deadline)?;
            stream.set_nodelay(true)?;
            util::write_handshake(&mut stream, rank)?;
            outgoing.insert(peer, stream);
        }
        let accepted = accept_all(&listener, rank, size, deadline)?;
        debug!("rank {} connected to {} peers", rank, size - 1);

        let severed: Arc<Vec<AtomicBool>> =
            Arc::new((0..size).map(|_| AtomicBool::new(false)).collect());
        let (send_s, send_r) = crossbeam_channel::unbounded::<Outgoing>();
        let (recv_s, recv_r) = crossbeam_channel::unbounded();

        // This thread takes the receiving end of the message sender channel.
        let send_severed = severed.clone();
        let send_thread = thread::Builder::new()
            .name(format!("rank-{}-send", rank))
            .spawn(move || {
                for (dest, frame) in send_r {
                    if let Some(stream) = outgoing.get_mut(&dest) {
                        if let Err(e) = stream.write_all(&frame) {
                            warn!("rank {} lost its stream to rank {}: {}", rank, dest, e);
                            send_severed[dest].store(true, Ordering::Relaxed);
                            outgoing.remove(&dest);
                        }
                    }
                }
                for (_, stream) in outgoing {
                    let _ = stream.shutdown(Shutdown::Write);
                }
            })?;

        // These threads each take a clone of the inbound channel's sender.
        let mut incoming = Vec::with_capacity(accepted.len());
        let mut recv_threads = Vec::with_capacity(accepted.len());
        for (peer, stream) in accepted {
            incoming.push(stream.try_clone()?);
            let recv_s = recv_s.clone();
            recv_threads.push(
                thread::Builder::new()
                    .name(format!("rank-{}-recv-{}", rank, peer))
                    .spawn(move || read_loop(rank, peer, stream, recv_s))?,
            );
        }

        Ok(Self {
            rank,
            size,
            send_s: Some(send_s),
            send_thread: Some(send_thread),
            recv_r,
            recv_threads,
            incoming,
            severed,
        })
    }
}

impl Link for TcpLink {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_frame(&mut self, dest: usize, channel: Channel, bytes: Vec<u8>) -> Result<()> {
        if dest >= self.size || dest == self.rank {
            return Err(Error::InvalidDestination {
                rank: dest,
                size: self.size,
            });
        }
        if self.severed[dest].load(Ordering::Relaxed) {
            return Err(Error::Connection(format!("stream to rank {} is severed", dest)));
        }
        if bytes.len() > util::MAX_FRAME {
            return Err(Error::Codec(format!(
                "message of {} bytes exceeds the frame limit",
                bytes.len()
            )));
        }
        let send_s = self.send_s.as_ref().ok_or(Error::Closed)?;
        trace!("rank {} -> {} on {:?} ({} bytes)", self.rank, dest, channel, bytes.len());
        send_s
            .send((dest, util::encode_frame(channel, &bytes)))
            .map_err(|_| Error::Connection("sender thread has exited".to_owned()))
    }

    fn inbound(&self) -> &Receiver<Inbound> {
        &self.recv_r
    }

    fn close(&mut self) {
        if self.send_s.take().is_none() {
            return;
        }
        if let Some(send_thread) = self.send_thread.take() {
            if send_thread.join().is_err() {
                warn!("rank {} sender thread panicked", self.rank);
            }
        }
        for stream in self.incoming.drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for handle in self.recv_threads.drain(..) {
            if handle.join().is_err() {
                warn!("rank {} reader thread panicked", self.rank);
            }
        }
        debug!("rank {} closed its tcp link", self.rank);
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close()
    }
}

fn connect_before(address: SocketAddr, deadline: Instant) -> Result<TcpStream> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Connection(format!("could not reach {} in time", address)));
        }
        match TcpStream::connect_timeout(&address, remaining.min(CONNECT_ATTEMPT)) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                trace!("connect to {} failed ({}), retrying", address, e);
                thread::sleep(POLL_INTERVAL.min(remaining));
            }
        }
    }
}

fn accept_all(
    listener: &TcpListener,
    rank: usize,
    size: usize,
    deadline: Instant,
) -> Result<Vec<(usize, TcpStream)>> {
    listener.set_nonblocking(true)?;
    let mut accepted: Vec<(usize, TcpStream)> = Vec::with_capacity(size.saturating_sub(1));

    while accepted.len() + 1 < size {
        match listener.accept() {
            Ok((mut stream, address)) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(remaining.max(POLL_INTERVAL)))?;
                let peer = util::read_handshake(&mut stream)?;
                stream.set_read_timeout(None)?;

                if peer >= size || peer == rank || accepted.iter().any(|(p, _)| *p == peer) {
                    return Err(Error::Connection(format!(
                        "unexpected handshake from {} claiming rank {}",
                        address, peer
                    )));
                }
                trace!("rank {} accepted rank {} from {}", rank, peer, address);
                accepted.push((peer, stream));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(Error::Connection(format!(
                        "rank {} heard from {} of {} peers before the deadline",
                        rank,
                        accepted.len(),
                        size - 1
                    )));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(accepted)
}

fn read_loop(rank: usize, peer: usize, stream: TcpStream, recv_s: Sender<Inbound>) {
    let mut reader = BufReader::new(stream);
    loop {
        match util::read_frame(&mut reader) {
            Ok(Some((channel, bytes))) => {
                let envelope = Envelope {
                    source: peer,
                    channel,
                    bytes,
                };
                if recv_s.send(Inbound::Message(envelope)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("rank {} reached the end of the stream from rank {}", rank, peer);
                break;
            }
            Err(e) => {
                warn!("rank {} failed reading from rank {}: {}", rank, peer, e);
                break;
            }
        }
    }
    let _ = recv_s.send(Inbound::Lost(peer));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_listeners(size: usize) -> (Vec<TcpListener>, Vec<SocketAddr>) {
        let listeners: Vec<_> = (0..size)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let peers = listeners.iter().map(|l| l.local_addr().unwrap()).collect();
        (listeners, peers)
    }

    #[test]
    fn frames_cross_a_loopback_mesh_in_order() {
        let (listeners, peers) = loopback_listeners(2);
        let handles: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                let peers = peers.clone();
                thread::spawn(move || {
                    TcpLink::from_listener(rank, listener, peers, Duration::from_secs(10)).unwrap()
                })
            })
            .collect();
        let mut links: Vec<TcpLink> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for n in 0..10u8 {
            links[0].send_frame(1, Channel::User(2), vec![n]).unwrap();
        }
        for n in 0..10u8 {
            match links[1].inbound().recv().unwrap() {
                Inbound::Message(envelope) => {
                    assert_eq!(envelope.source, 0);
                    assert_eq!(envelope.bytes, vec![n]);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        links[0].close();
        assert!(matches!(links[1].inbound().recv().unwrap(), Inbound::Lost(0)));
        assert!(matches!(
            links[0].send_frame(1, Channel::User(0), Vec::new()),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn corrupt_frame_length_drops_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        let mut header = vec![0];
        header.extend_from_slice(&0u64.to_le_bytes());
        header.extend_from_slice(&u64::MAX.to_le_bytes());
        client.write_all(&header).unwrap();

        let (recv_s, recv_r) = crossbeam_channel::unbounded();
        read_loop(0, 1, server, recv_s);
        assert!(matches!(recv_r.try_recv(), Ok(Inbound::Lost(1))));
    }

    #[test]
    fn unreachable_peer_times_out() {
        let (mut listeners, peers) = loopback_listeners(2);
        drop(listeners.pop());
        let listener = listeners.pop().unwrap();
        let result = TcpLink::from_listener(0, listener, peers, Duration::from_millis(200));
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
