//! Client-side protocol library
//!
//! The counterpart of [`protocol`](crate::protocol): connect to a running
//! server, claim an identity and hand over framebuffer ids as new frames
//! are finished. Rendering itself stays entirely on the client's side;
//! the server only ever sees buffer identifiers.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use anyhow::{bail, Context, Result};
use nix::sys::socket::{
    connect, recv, send, socket, AddressFamily, MsgFlags, SockFlag, SockType, UnixAddr,
};

const MSG_SIZE: usize = 4;

/// A connection to the compositor, bound to one client identity.
pub struct Client {
    fd: OwnedFd,
}

impl Client {
    /// Connect to the server at `path` and claim `id`.
    ///
    /// The server sends no acknowledgement on success; a rejected claim
    /// only becomes visible when the connection is later found closed.
    pub fn connect<P: AsRef<Path>>(path: P, id: u32) -> Result<Self> {
        let path = path.as_ref();
        let fd = socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .context("failed to create socket")?;
        let addr = UnixAddr::new(path).context("invalid socket path")?;
        connect(fd.as_raw_fd(), &addr)
            .with_context(|| format!("failed to connect to {}", path.display()))?;

        let client = Self { fd };
        client.send_word(id).context("failed to send identity")?;
        Ok(client)
    }

    /// Submit the framebuffer to show from the next refresh on.
    ///
    /// May be called any number of times between refreshes; the server
    /// keeps only the latest id.
    pub fn submit(&self, fb_id: u32) -> Result<()> {
        self.send_word(fb_id).context("failed to submit framebuffer")
    }

    /// Block until the server's next frame acknowledgement and return its
    /// sequence number.
    ///
    /// Only meaningful against a server configured with `ack_clients`;
    /// otherwise this blocks until the connection closes.
    pub fn wait_sync(&self) -> Result<u32> {
        let mut buf = [0u8; MSG_SIZE];
        let got = recv(self.fd.as_raw_fd(), &mut buf, MsgFlags::empty())
            .context("failed to read sync message")?;
        if got != MSG_SIZE {
            bail!("server closed the connection");
        }
        Ok(u32::from_ne_bytes(buf))
    }

    fn send_word(&self, word: u32) -> Result<()> {
        let sent = send(
            self.fd.as_raw_fd(),
            &word.to_ne_bytes(),
            MsgFlags::MSG_NOSIGNAL,
        )?;
        if sent != MSG_SIZE {
            bail!("short write on protocol socket");
        }
        Ok(())
    }
}
