//! Utility functions intended for use within the [`crate::message`] module.
//!
//! A frame on the wire is a one-byte channel kind, a `u64` tag, a `u64`
//! length, and then that many payload bytes. All integers are little-endian.
//! Every stream opens with a `u64` handshake carrying the sender's rank.

use super::link::Channel;
use std::io::{self, prelude::*};

/// The largest payload a frame may announce. Longer frames are treated as
/// corrupt rather than allocated.
pub const MAX_FRAME: usize = 256 * 1024 * 1024;

/// Read a `u64` out of the given stream.
pub fn read_u64<R: Read>(stream: &mut R) -> io::Result<u64> {
    read_bytes_array(stream).map(u64::from_le_bytes)
}

/// Read the given number of bytes from a stream, into a `Vec<u8>`.
pub fn read_bytes_vec<R: Read>(stream: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; size];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Read the given (const) number of bytes from a stream, into an array.
pub fn read_bytes_array<R: Read, const SIZE: usize>(stream: &mut R) -> io::Result<[u8; SIZE]> {
    let mut buffer = [0; SIZE];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Write the opening handshake of a stream.
pub fn write_handshake<W: Write>(stream: &mut W, rank: usize) -> io::Result<()> {
    stream.write_all(&(rank as u64).to_le_bytes())
}

/// Read the opening handshake of a stream, returning the peer's rank.
pub fn read_handshake<R: Read>(stream: &mut R) -> io::Result<usize> {
    let rank = read_u64(stream)?;
    usize::try_from(rank).map_err(|_| invalid_data("handshake rank out of range"))
}

/// Encode one message as a complete frame, so it can be written with a
/// single `write_all`.
pub fn encode_frame(channel: Channel, bytes: &[u8]) -> Vec<u8> {
    let (kind, tag) = channel.to_wire();
    let mut frame = Vec::with_capacity(17 + bytes.len());
    frame.push(kind);
    frame.extend_from_slice(&tag.to_le_bytes());
    frame.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    frame.extend_from_slice(bytes);
    frame
}

/// Read one frame out of the stream. Returns `None` if the stream ended
/// cleanly on a frame boundary.
pub fn read_frame<R: Read>(stream: &mut R) -> io::Result<Option<(Channel, Vec<u8>)>> {
    let mut kind = [0; 1];
    loop {
        match stream.read(&mut kind) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    let tag = read_u64(stream)?;
    let len = usize::try_from(read_u64(stream)?)
        .ok()
        .filter(|len| *len <= MAX_FRAME)
        .ok_or_else(|| invalid_data("frame length out of range"))?;
    let channel =
        Channel::from_wire(kind[0], tag).ok_or_else(|| invalid_data("unknown channel kind"))?;
    Ok(Some((channel, read_bytes_vec(stream, len)?)))
}

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_owned())
}
