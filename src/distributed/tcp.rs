//! TCP process group.
//!
//! Rank 0 listens on the rendezvous endpoint and every other rank opens one
//! connection to it. Collectives run as a star through rank 0: peers send
//! their buffers up, rank 0 reduces in rank order (so results are
//! bit-identical on every rank and across runs) and sends the result back
//! down.
//!
//! Every frame carries a header with the collective kind, its argument
//! (reduce op or broadcast root), a per-group sequence number and the
//! element count. A rank that disagrees on any of those gets an error
//! rather than a silently mixed-up buffer.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::distributed::communicator::{Communicator, ReduceOp};
use crate::error::{Error, Result};

const MAGIC: u32 = 0x4444_5054;
const PROTOCOL_VERSION: u32 = 1;
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
/// How long rank 0 waits for a new connection to identify itself.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

const KIND_ALL_REDUCE: u32 = 1;
const KIND_BROADCAST: u32 = 2;

/// Sent by each peer on connect and echoed back by rank 0 once the whole
/// group has joined.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
struct Handshake {
    magic: u32,
    version: u32,
    rank: u64,
    world_size: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameHeader {
    kind: u32,
    arg: u32,
    seq: u64,
    count: u64,
}

enum Links {
    /// Rank 0: `peers[r - 1]` is the connection to rank `r`.
    Hub { peers: Vec<TcpStream> },
    /// Every other rank: the connection to rank 0.
    Spoke { hub: TcpStream },
    Closed,
}

struct State {
    links: Links,
    seq: u64,
}

/// Process group whose collectives travel over TCP through rank 0.
pub struct TcpCommunicator {
    rank: usize,
    world_size: usize,
    state: Mutex<State>,
}

impl TcpCommunicator {
    /// Rank 0 side of the rendezvous on an already-bound listener.
    ///
    /// Waits up to `timeout` for `world_size - 1` peers, validates their
    /// handshakes, then releases them all at once.
    pub fn host(listener: TcpListener, world_size: usize, timeout: Duration) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::distributed("world_size must be > 0"));
        }
        let local = listener.local_addr()?;
        info!(%local, world_size, "waiting for peers");

        let mut slots: Vec<Option<TcpStream>> = (1..world_size).map(|_| None).collect();
        let mut joined = 0;
        let deadline = Instant::now() + timeout;
        listener.set_nonblocking(true)?;

        while joined < world_size - 1 {
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(remaining(deadline)?.min(HANDSHAKE_TIMEOUT)))?;
                    // Anything that is not one of our peers is dropped, not fatal.
                    let hello = match read_pod::<Handshake>(&mut stream) {
                        Ok(hello) if hello.magic == MAGIC && hello.version == PROTOCOL_VERSION => {
                            hello
                        }
                        Ok(hello) => {
                            warn!(
                                %addr,
                                magic = %format!("{:#x}", hello.magic),
                                version = hello.version,
                                "rejected connection with a foreign handshake"
                            );
                            continue;
                        }
                        Err(e) => {
                            warn!(%addr, error = %e, "dropped connection without a handshake");
                            continue;
                        }
                    };
                    let rank = check_handshake(&hello, world_size)?;
                    let slot = &mut slots[rank - 1];
                    if slot.is_some() {
                        return Err(Error::distributed(format!(
                            "rank {rank} joined twice (second connection from {addr})"
                        )));
                    }
                    debug!(rank, %addr, "peer joined");
                    *slot = Some(stream);
                    joined += 1;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::distributed(format!(
                            "rendezvous timed out after {timeout:?}: {joined} of {} peers joined",
                            world_size - 1
                        )));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut peers = Vec::with_capacity(world_size - 1);
        for (i, slot) in slots.into_iter().enumerate() {
            let mut stream = slot.ok_or_else(|| Error::distributed("peer slot left empty"))?;
            stream.set_read_timeout(None)?;
            let ack = Handshake {
                magic: MAGIC,
                version: PROTOCOL_VERSION,
                rank: (i + 1) as u64,
                world_size: world_size as u64,
            };
            stream.write_all(bytemuck::bytes_of(&ack))?;
            peers.push(stream);
        }

        info!(world_size, "process group ready");
        Ok(Self {
            rank: 0,
            world_size,
            state: Mutex::new(State {
                links: Links::Hub { peers },
                seq: 0,
            }),
        })
    }

    /// Peer side of the rendezvous.
    ///
    /// Retries the connection until `timeout`, since rank 0 may start
    /// listening after this process is launched.
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        rank: usize,
        world_size: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if rank == 0 || rank >= world_size {
            return Err(Error::distributed(format!(
                "peer rank {rank} must be in 1..{world_size}"
            )));
        }
        let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(Error::distributed("rendezvous address resolved to nothing"));
        }

        let deadline = Instant::now() + timeout;
        let mut hub = loop {
            match try_connect(&addrs) {
                Ok(stream) => break stream,
                Err(e) => {
                    if Instant::now() >= deadline {
                        return Err(Error::distributed(format!(
                            "rank {rank} could not reach {:?} within {timeout:?}: {e}",
                            addrs[0]
                        )));
                    }
                    debug!(rank, error = %e, "rendezvous not ready, retrying");
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };
        hub.set_nodelay(true)?;

        let hello = Handshake {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            rank: rank as u64,
            world_size: world_size as u64,
        };
        hub.write_all(bytemuck::bytes_of(&hello))?;

        // The ack arrives once every peer has joined.
        hub.set_read_timeout(Some(remaining(deadline)?))?;
        let ack = read_pod::<Handshake>(&mut hub)
            .map_err(|e| Error::distributed(format!("rank {rank} rendezvous ack: {e}")))?;
        if ack != hello {
            return Err(Error::distributed(format!(
                "rank {rank} got a mismatched rendezvous ack: {ack:?}"
            )));
        }
        hub.set_read_timeout(None)?;

        debug!(rank, world_size, "joined process group");
        Ok(Self {
            rank,
            world_size,
            state: Mutex::new(State {
                links: Links::Spoke { hub },
                seq: 0,
            }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::distributed("communicator state poisoned by a failed collective"))
    }
}

fn try_connect(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last = io::Error::new(ErrorKind::NotFound, "no address");
    for addr in addrs {
        match TcpStream::connect_timeout(addr, CONNECT_ATTEMPT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last = e,
        }
    }
    Err(last)
}

fn remaining(deadline: Instant) -> Result<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(Error::distributed("rendezvous deadline passed"));
    }
    Ok(left)
}

fn check_handshake(hello: &Handshake, world_size: usize) -> Result<usize> {
    if hello.magic != MAGIC {
        return Err(Error::distributed(format!(
            "bad handshake magic {:#x}",
            hello.magic
        )));
    }
    if hello.version != PROTOCOL_VERSION {
        return Err(Error::distributed(format!(
            "protocol version {} != {PROTOCOL_VERSION}",
            hello.version
        )));
    }
    if hello.world_size != world_size as u64 {
        return Err(Error::distributed(format!(
            "peer expects world size {}, group has {world_size}",
            hello.world_size
        )));
    }
    let rank = hello.rank as usize;
    if rank == 0 || rank >= world_size {
        return Err(Error::distributed(format!(
            "peer rank {rank} out of range 1..{world_size}"
        )));
    }
    Ok(rank)
}

fn read_pod<T: bytemuck::Pod>(stream: &mut TcpStream) -> io::Result<T> {
    let mut value: T = bytemuck::Zeroable::zeroed();
    stream.read_exact(bytemuck::bytes_of_mut(&mut value))?;
    Ok(value)
}

fn send_frame(stream: &mut TcpStream, header: &FrameHeader, data: &[f32]) -> io::Result<()> {
    stream.write_all(bytemuck::bytes_of(header))?;
    stream.write_all(bytemuck::cast_slice(data))?;
    stream.flush()
}

/// Read one frame into `data`, checking it matches `expected`.
fn recv_frame(
    stream: &mut TcpStream,
    expected: &FrameHeader,
    data: &mut [f32],
    from: usize,
) -> Result<()> {
    let header = read_pod::<FrameHeader>(stream)
        .map_err(|e| Error::distributed(format!("recv header from rank {from}: {e}")))?;
    if header != *expected {
        return Err(Error::distributed(format!(
            "collective mismatch with rank {from}: expected {expected:?}, got {header:?}"
        )));
    }
    stream
        .read_exact(bytemuck::cast_slice_mut(data))
        .map_err(|e| Error::distributed(format!("recv payload from rank {from}: {e}")))
}

fn send_to(stream: &mut TcpStream, header: &FrameHeader, data: &[f32], to: usize) -> Result<()> {
    send_frame(stream, header, data)
        .map_err(|e| Error::distributed(format!("send to rank {to}: {e}")))
}

impl State {
    fn next_header(&mut self, kind: u32, arg: u32, count: usize) -> FrameHeader {
        let header = FrameHeader {
            kind,
            arg,
            seq: self.seq,
            count: count as u64,
        };
        self.seq += 1;
        header
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce(&self, data: &mut [f32], op: ReduceOp) -> Result<()> {
        let mut state = self.lock()?;
        let header = state.next_header(KIND_ALL_REDUCE, op.code(), data.len());

        match &mut state.links {
            Links::Hub { peers } => {
                let mut incoming = vec![0.0f32; data.len()];
                for (i, stream) in peers.iter_mut().enumerate() {
                    recv_frame(stream, &header, &mut incoming, i + 1)?;
                    op.apply(data, &incoming);
                }
                for (i, stream) in peers.iter_mut().enumerate() {
                    send_to(stream, &header, data, i + 1)?;
                }
            }
            Links::Spoke { hub } => {
                send_to(hub, &header, data, 0)?;
                recv_frame(hub, &header, data, 0)?;
            }
            Links::Closed => return Err(Error::distributed("process group destroyed")),
        }
        Ok(())
    }

    fn broadcast(&self, data: &mut [f32], root: usize) -> Result<()> {
        if root >= self.world_size {
            return Err(Error::distributed(format!(
                "broadcast root {root} out of range for world size {}",
                self.world_size
            )));
        }
        let mut state = self.lock()?;
        let header = state.next_header(KIND_BROADCAST, root as u32, data.len());

        match &mut state.links {
            Links::Hub { peers } => {
                if root != 0 {
                    recv_frame(&mut peers[root - 1], &header, data, root)?;
                }
                for (i, stream) in peers.iter_mut().enumerate() {
                    if i + 1 != root {
                        send_to(stream, &header, data, i + 1)?;
                    }
                }
            }
            Links::Spoke { hub } => {
                if self.rank == root {
                    send_to(hub, &header, data, 0)?;
                } else {
                    recv_frame(hub, &header, data, 0)?;
                }
            }
            Links::Closed => return Err(Error::distributed("process group destroyed")),
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.lock()?;
        let links = std::mem::replace(&mut state.links, Links::Closed);
        let streams = match links {
            Links::Hub { peers } => peers,
            Links::Spoke { hub } => vec![hub],
            Links::Closed => return Ok(()),
        };
        for stream in streams {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                // The other side may already be gone.
                if e.kind() != ErrorKind::NotConnected {
                    warn!(rank = self.rank, error = %e, "closing connection failed");
                }
            }
        }
        debug!(rank = self.rank, "process group destroyed");
        Ok(())
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(rank = self.rank, error = %e, "shutdown on drop failed");
        }
    }
}
