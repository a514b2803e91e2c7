use std::os::fd::{FromRawFd, OwnedFd};

use tracing::debug;

use super::{EventFlags, Socket, SocketKind, SocketState};
use crate::addr::{self, Address};
use crate::error::{errno, Result, SocketError};

impl Socket {
    /// Starts listening: `Bound → Listening`.
    ///
    /// Only stream sockets can listen.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        self.track(self.listen_inner(backlog))
    }

    fn listen_inner(&self, backlog: i32) -> Result<()> {
        self.ensure_open()?;
        if self.core.kind == SocketKind::Datagram {
            return Err(SocketError::InvalidOperation { reason: "datagram sockets cannot listen" });
        }
        let fd = self.fd_in(&[SocketState::Bound], "listen needs a bound socket")?;

        let result = unsafe { libc::listen(fd, backlog) };
        if result == -1 {
            return Err(SocketError::Listen { errno: errno(), backlog });
        }
        self.set_state(SocketState::Listening);
        debug!(socket = %self.core.id, backlog, "listening");
        Ok(())
    }

    /// Binds to `addr` and listens with the configured backlog.
    pub fn set_server(&self, addr: &Address) -> Result<()> {
        self.bind(addr)?;
        let backlog = self.core.config.borrow().backlog;
        self.listen(backlog)
    }

    /// Accepts one pending connection.
    ///
    /// The new socket is `Connected`, shares this socket's network and
    /// manager, and starts with a copy of this socket's configuration.
    /// Without a pending connection a non-blocking listener returns
    /// `WouldBlock`; a blocking one waits up to the timeout.
    pub fn accept(&self) -> Result<Socket> {
        self.track(self.accept_inner())
    }

    fn accept_inner(&self) -> Result<Socket> {
        let fd = self.fd_in(&[SocketState::Listening], "accept needs a listening socket")?;
        self.rearm(EventFlags::CONNECTION);
        self.wait_ready(fd, false)?;

        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let client = unsafe {
            libc::accept4(
                fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            )
        };
        if client == -1 {
            let errno = errno();
            if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
                return Err(SocketError::WouldBlock);
            }
            return Err(SocketError::Accept { errno });
        }
        let client = unsafe { OwnedFd::from_raw_fd(client) };

        let config = self.core.config.borrow().clone();
        let socket = Socket::create(&self.core.network, self.core.kind, config)?;
        let peer = addr::from_storage(&storage, len).ok();
        debug!(listener = %self.core.id, socket = %socket.id(), peer = ?peer.as_ref().map(ToString::to_string), "accepted");
        socket.adopt(client, peer);
        Ok(socket)
    }
}
