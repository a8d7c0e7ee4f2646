//! Connection server
//!
//! Owns the SOCK_SEQPACKET listening socket, every client socket and the
//! client registry. A zero-timeout readiness poll drives all socket work,
//! so `poll()` never blocks the refresh loop; misbehaving clients are cut
//! off without surfacing an error to the caller.
//!
//! Wire protocol: a client's first packet is a 4-byte identity claiming
//! one of the configured slots, every later packet is a 4-byte
//! framebuffer id. Both are native-endian; the socket never leaves the
//! local machine.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use nix::errno::Errno;
use nix::sys::socket::{
    accept4, bind, listen, recv, send, socket, AddressFamily, Backlog, MsgFlags, SockFlag,
    SockType, UnixAddr,
};

/// Size of every protocol message on the wire.
const MSG_SIZE: usize = 4;

const LISTENER: Token = Token(0);
const MAX_EVENTS: usize = 16;

/// What a registered descriptor currently is.
///
/// Kept in a side table keyed by poll token; a connection starts as
/// `Pending` and becomes `Identified` once the handshake succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Listener,
    /// Accepted, identity message not yet received.
    Pending,
    /// Handshake complete, bound to the client slot it names.
    Identified(usize),
}

struct Connection {
    fd: OwnedFd,
    role: ConnectionRole,
}

/// One configured client identity.
#[derive(Debug, Default)]
struct ClientSlot {
    /// Poll token of the live connection bound to this identity.
    token: Option<Token>,
    /// Latest submitted framebuffer id, not yet consumed by the main
    /// loop. Overwritten on every submission: latest wins.
    pending_fb: Option<u32>,
}

/// Dense, fixed-size table of client identities.
///
/// Unbound slots are idle and exert no effect on the plane table.
pub struct ClientRegistry {
    slots: Vec<ClientSlot>,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        let mut slots = Vec::with_capacity(max_clients);
        slots.resize_with(max_clients, ClientSlot::default);
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_connected(&self, id: usize) -> bool {
        self.slots.get(id).is_some_and(|s| s.token.is_some())
    }

    /// Bind `id` to a live connection. Fails if the identity is out of
    /// range or already claimed; the existing binding is left intact.
    pub fn bind(&mut self, id: usize, token: Token) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) if slot.token.is_none() => {
                slot.token = Some(token);
                slot.pending_fb = None;
                true
            }
            _ => false,
        }
    }

    /// Return `id` to the idle state.
    pub fn reset(&mut self, id: usize) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.token = None;
            slot.pending_fb = None;
        }
    }

    /// Record a submitted framebuffer id, replacing any unconsumed one.
    pub fn submit(&mut self, id: usize, fb: u32) {
        if let Some(slot) = self.slots.get_mut(id) {
            debug_assert!(slot.token.is_some());
            slot.pending_fb = Some(fb);
        }
    }

    /// Consume the latest submission, if any.
    pub fn take_pending(&mut self, id: usize) -> Option<u32> {
        self.slots.get_mut(id).and_then(|s| s.pending_fb.take())
    }
}

enum ReadOutcome {
    Word(u32),
    WouldBlock,
    Disconnected,
    Malformed,
}

/// Read exactly one protocol message from a nonblocking socket.
fn read_word(fd: &OwnedFd) -> ReadOutcome {
    let mut buf = [0u8; MSG_SIZE];
    match recv(fd.as_raw_fd(), &mut buf, MsgFlags::empty()) {
        Ok(MSG_SIZE) => ReadOutcome::Word(u32::from_ne_bytes(buf)),
        Ok(0) => ReadOutcome::Disconnected,
        Ok(_) => ReadOutcome::Malformed,
        Err(Errno::EAGAIN) => ReadOutcome::WouldBlock,
        Err(_) => ReadOutcome::Malformed,
    }
}

/// The connection server: listener, poll, per-descriptor roles and the
/// client registry.
pub struct ProtocolServer {
    poll: Poll,
    events: Events,
    connections: HashMap<Token, Connection>,
    clients: ClientRegistry,
    next_token: usize,
    socket_path: PathBuf,
}

impl ProtocolServer {
    /// Bind the listening socket at `path` and prepare `max_clients`
    /// identity slots. A stale socket file at the path is removed first.
    pub fn bind<P: AsRef<Path>>(path: P, max_clients: usize) -> Result<Self> {
        let path = path.as_ref();

        match fs::remove_file(path) {
            Ok(()) => debug!("removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", path.display()))
            }
        }

        let listener = socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )
        .context("failed to create socket")?;
        let addr = UnixAddr::new(path).context("invalid socket path")?;
        bind(listener.as_raw_fd(), &addr).context("failed to bind socket")?;
        listen(&listener, Backlog::new(max_clients as i32)?).context("failed to listen")?;

        let poll = Poll::new().context("failed to create poll")?;
        let raw = listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&raw), LISTENER, Interest::READABLE)
            .context("failed to register listener")?;

        let mut connections = HashMap::new();
        connections.insert(
            LISTENER,
            Connection {
                fd: listener,
                role: ConnectionRole::Listener,
            },
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            connections,
            clients: ClientRegistry::new(max_clients),
            next_token: LISTENER.0 + 1,
            socket_path: path.to_path_buf(),
        })
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn registry_mut(&mut self) -> &mut ClientRegistry {
        &mut self.clients
    }

    /// Service every ready descriptor and return immediately.
    ///
    /// The poll timeout is zero so an idle socket set costs one syscall
    /// per refresh. Client misbehavior is handled here by dropping the
    /// connection; only listener-level failures surface to the caller.
    pub fn poll(&mut self) -> Result<()> {
        if let Err(e) = self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e).context("readiness poll failed");
        }

        let ready: Vec<(Token, bool)> = self
            .events
            .iter()
            .map(|ev| (ev.token(), ev.is_read_closed()))
            .collect();

        for (token, hangup) in ready {
            if hangup && token != LISTENER {
                self.close_connection(token);
                continue;
            }
            let role = match self.connections.get(&token) {
                Some(c) => c.role,
                None => continue,
            };
            match role {
                ConnectionRole::Listener => self.accept_clients()?,
                ConnectionRole::Pending | ConnectionRole::Identified(_) => {
                    self.drain_connection(token)
                }
            }
        }
        Ok(())
    }

    /// Send a 4-byte frame sequence number to every identified client.
    ///
    /// Used for client-side pacing when acknowledgements are enabled; a
    /// peer that fails the send is treated as gone.
    pub fn broadcast_sync(&mut self, frame: u32) {
        let buf = frame.to_ne_bytes();
        let stale: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| matches!(c.role, ConnectionRole::Identified(_)))
            .filter(|(_, c)| send(c.fd.as_raw_fd(), &buf, MsgFlags::MSG_NOSIGNAL).is_err())
            .map(|(&token, _)| token)
            .collect();
        for token in stale {
            debug!("dropping client that failed the sync send");
            self.close_connection(token);
        }
    }

    /// Accept until the backlog is empty. The poll is edge-triggered, so
    /// leaving a pending connection behind would silence the listener.
    fn accept_clients(&mut self) -> Result<()> {
        loop {
            let listener = match self.connections.get(&LISTENER) {
                Some(c) => c.fd.as_raw_fd(),
                None => return Ok(()),
            };
            match accept4(listener, SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC) {
                Ok(fd) => {
                    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    let raw = fd.as_raw_fd();
                    self.poll
                        .registry()
                        .register(&mut SourceFd(&raw), token, Interest::READABLE)
                        .context("failed to register client socket")?;
                    debug!("accepted connection, awaiting identity");
                    self.connections.insert(
                        token,
                        Connection {
                            fd,
                            role: ConnectionRole::Pending,
                        },
                    );
                }
                Err(Errno::EAGAIN) => return Ok(()),
                Err(e) => return Err(e).context("accept failed"),
            }
        }
    }

    /// Read messages until the socket would block. Edge-triggered
    /// readiness requires draining, and draining is also what makes
    /// repeated submissions collapse to the latest one.
    fn drain_connection(&mut self, token: Token) {
        loop {
            let (role, outcome) = match self.connections.get(&token) {
                Some(c) => (c.role, read_word(&c.fd)),
                None => return,
            };
            match outcome {
                ReadOutcome::WouldBlock => return,
                ReadOutcome::Disconnected => {
                    self.close_connection(token);
                    return;
                }
                ReadOutcome::Malformed => {
                    warn!("ignoring non-compliant client (bad message size)");
                    self.close_connection(token);
                    return;
                }
                ReadOutcome::Word(word) => match role {
                    ConnectionRole::Listener => return,
                    ConnectionRole::Pending => {
                        if !self.complete_handshake(token, word) {
                            return;
                        }
                    }
                    ConnectionRole::Identified(id) => self.clients.submit(id, word),
                },
            }
        }
    }

    fn complete_handshake(&mut self, token: Token, word: u32) -> bool {
        let id = word as usize;
        if !self.clients.bind(id, token) {
            warn!("rejecting client: identity {id} out of range or already in use");
            self.close_connection(token);
            return false;
        }
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.role = ConnectionRole::Identified(id);
        }
        debug!("client {id} identified");
        true
    }

    fn close_connection(&mut self, token: Token) {
        let Some(conn) = self.connections.remove(&token) else {
            return;
        };
        let raw = conn.fd.as_raw_fd();
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&raw)) {
            debug!("deregister failed: {e}");
        }
        if let ConnectionRole::Identified(id) = conn.role {
            debug!("client {id} disconnected");
            self.clients.reset(id);
        }
        // conn.fd drops here and closes the socket
    }
}

impl Drop for ProtocolServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}

#[cfg(test)]
mod tests;
