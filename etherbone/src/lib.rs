//! A master-side (initiator) implementation of the Etherbone remote-bus
//! protocol, carried over UDP. Each operation builds one or more request
//! packets, sends them to the connected peer one at a time, and blocks for a
//! correlated reply with bounded retry. There is no pipelining; a request is
//! acknowledged before the next one leaves.

pub mod wire;

use std::{
    io,
    net::UdpSocket,
    time::{
        Duration,
        Instant,
    },
};
use tracing::{
    debug,
    trace,
};
use wire::{
    Packet,
    PacketHeader,
    Record,
};

/// Default per-attempt reply timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
/// Default number of send attempts before a request is abandoned
pub const DEFAULT_ATTEMPTS: usize = 5;

// Replies are bounded by the same record capacity as requests, so this is
// comfortably larger than anything a conforming peer sends
const RECV_BUF_LEN: usize = 2048;

/// Errors that can be thrown from Etherbone exchanges
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Internal system IO error")]
    Io(#[from] io::Error),
    #[error("Error assembling or decoding a packet")]
    Wire(#[from] wire::Error),
    #[error("No valid reply after {0} send attempts")]
    NoResponse(usize),
}

/// How long to wait for each reply and how many times to resend before
/// giving up. Injected into every operation so tests can run against
/// scripted peers with deterministic timing.
#[derive(Debug, Copy, Clone)]
pub struct RetryPolicy {
    /// Total send attempts, the first transmission included
    pub attempts: usize,
    /// How long one attempt waits for a correlated reply
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Read one full bus word for every address in `addrs`, in order. Requests
/// larger than one record's capacity split into sequential packets, each
/// acknowledged before the next is sent.
/// # Errors
/// Returns an error on transport failure or when the retry budget runs out
pub fn read_words(
    addrs: &[u32],
    socket: &UdpSocket,
    policy: RetryPolicy,
) -> Result<Vec<u32>, Error> {
    let mut values = Vec::with_capacity(addrs.len());
    for chunk in addrs.chunks(wire::MAX_RECORD_OPS) {
        let request = Packet {
            header: PacketHeader::default(),
            records: vec![Record {
                byte_enable: wire::FULL_WORD,
                writes: None,
                reads: chunk.to_vec(),
            }],
        };
        values.extend(exchange(&request, chunk.len(), socket, policy)?);
    }
    Ok(values)
}

/// Write full bus words to ascending word addresses starting at `base`.
/// Splits like [`read_words`]; each packet is confirmed by a well-formed
/// reply before the next leaves.
/// # Errors
/// Returns an error on transport failure or when the retry budget runs out
pub fn write_words(
    base: u32,
    values: &[u32],
    socket: &UdpSocket,
    policy: RetryPolicy,
) -> Result<(), Error> {
    let mut chunk_base = base;
    for chunk in values.chunks(wire::MAX_RECORD_OPS) {
        let request = Packet {
            header: PacketHeader::default(),
            records: vec![Record {
                byte_enable: wire::FULL_WORD,
                writes: Some((chunk_base, chunk.to_vec())),
                reads: vec![],
            }],
        };
        exchange(&request, 0, socket, policy)?;
        chunk_base = chunk_base.wrapping_add(4 * chunk.len() as u32);
    }
    Ok(())
}

/// Read the bus word at `addr` asserting only the lanes in `byte_enable`.
/// Sub-word accesses use this one beat at a time, since a record carries a
/// single lane mask.
/// # Errors
/// Returns an error on transport failure or when the retry budget runs out
pub fn read_masked(
    addr: u32,
    byte_enable: u8,
    socket: &UdpSocket,
    policy: RetryPolicy,
) -> Result<u32, Error> {
    let request = Packet {
        header: PacketHeader::default(),
        records: vec![Record {
            byte_enable,
            writes: None,
            reads: vec![addr],
        }],
    };
    let values = exchange(&request, 1, socket, policy)?;
    Ok(values[0])
}

/// Write one bus word at `addr` asserting only the lanes in `byte_enable`;
/// the unasserted lanes of the remote word are left untouched.
/// # Errors
/// Returns an error on transport failure or when the retry budget runs out
pub fn write_masked(
    addr: u32,
    byte_enable: u8,
    value: u32,
    socket: &UdpSocket,
    policy: RetryPolicy,
) -> Result<(), Error> {
    let request = Packet {
        header: PacketHeader::default(),
        records: vec![Record {
            byte_enable,
            writes: Some((addr, vec![value])),
            reads: vec![],
        }],
    };
    exchange(&request, 0, socket, policy)?;
    Ok(())
}

/// Send one request packet and block for the reply that answers it.
///
/// Anything else arriving on the socket within the timeout window is
/// discarded: datagrams that fail to decode, probe traffic, and replies
/// whose shape does not match the outstanding request (a late answer to an
/// already-abandoned request looks exactly like that). When the window
/// elapses the request is resent, up to `policy.attempts` transmissions.
fn exchange(
    request: &Packet,
    expected_values: usize,
    socket: &UdpSocket,
    policy: RetryPolicy,
) -> Result<Vec<u32>, Error> {
    let request_bytes = request.pack()?;
    let mut buf = [0u8; RECV_BUF_LEN];
    for attempt in 0..policy.attempts {
        socket.send(&request_bytes)?;
        let deadline = Instant::now() + policy.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            socket.set_read_timeout(Some(remaining))?;
            let nbytes = match socket.recv(&mut buf) {
                Ok(n) => n,
                Err(e) => match e.kind() {
                    // Compat for both windows and *nix
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => break,
                    _ => return Err(e.into()),
                },
            };
            match Packet::unpack(&buf[..nbytes]) {
                Ok(reply) => {
                    if let Some(values) = correlate(&reply, expected_values) {
                        return Ok(values);
                    }
                    trace!(nbytes, "discarding datagram that does not answer the outstanding request");
                }
                Err(error) => debug!(%error, "discarding undecodable datagram"),
            }
        }
        debug!(attempt, timeout = ?policy.timeout, "no reply within the window, resending");
    }
    Err(Error::NoResponse(policy.attempts))
}

/// A reply answers the outstanding request when it is plain bus traffic
/// carrying exactly the number of read values we asked for (zero for a
/// write request; a header-only packet is a valid write acknowledgment).
fn correlate(reply: &Packet, expected_values: usize) -> Option<Vec<u32>> {
    if reply.header.probe || reply.header.probe_reply {
        return None;
    }
    let values: Vec<u32> = reply.write_values().collect();
    (values.len() == expected_values).then_some(values)
}
