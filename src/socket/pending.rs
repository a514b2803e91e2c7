use std::os::fd::RawFd;

use tracing::debug;

use super::raw::wait_fd;
use super::{Socket, SocketKind, SocketState};
use crate::addr::{Address, ToSockAddr};
use crate::error::{errno, Result, SocketError};

/// Reads and clears the pending socket error (SO_ERROR).
///
/// `Ok(None)` after writability means the connect went through. Reading
/// clears the status, so call it once per completion.
pub(crate) fn take_error(fd: RawFd) -> Result<Option<i32>> {
    let mut error: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut error as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if result == -1 {
        return Err(SocketError::GetOption { errno: errno(), option: "SO_ERROR" });
    }
    Ok((error != 0).then_some(error))
}

impl Socket {
    /// Connects to `addr`.
    ///
    /// Stream sockets:
    /// - non-blocking: returns `WouldBlock` with the socket `Connecting`;
    ///   completion arrives as `Connection`/`Output` (or `Lost`) events
    /// - blocking: waits for completion up to the timeout; on `TimedOut` the
    ///   socket stays `Connecting`
    ///
    /// A refused connect closes the socket.
    ///
    /// Datagram sockets only record the default peer.
    pub fn connect(&self, addr: &Address) -> Result<()> {
        self.track(self.connect_inner(addr))
    }

    fn connect_inner(&self, addr: &Address) -> Result<()> {
        self.ensure_open()?;
        let state = self.state();
        if !matches!(state, SocketState::Unallocated | SocketState::Bound) {
            return Err(SocketError::InvalidSocket { reason: "connect needs an unconnected socket" });
        }
        if !addr.is_complete() {
            return Err(SocketError::InvalidAddress { reason: "incomplete address" });
        }

        // a local address stored beforehand is bound first
        if state == SocketState::Unallocated {
            let local = self.core.local.borrow().clone();
            if let Some(local) = local {
                self.bind_inner(&local)?;
            }
        }

        let fd = self.acquire(addr.family())?;
        *self.core.peer.borrow_mut() = Some(addr.clone());

        let rc = addr
            .with_raw(|ptr, len| unsafe { libc::connect(fd, ptr, len) })
            .ok_or(SocketError::InvalidAddress { reason: "address too long" })?;
        if rc == 0 {
            self.set_state(SocketState::Connected);
            debug!(socket = %self.core.id, peer = %addr, "connected");
            return Ok(());
        }

        let errno = errno();
        if errno != libc::EINPROGRESS || self.core.kind == SocketKind::Datagram {
            return Err(self.connect_failed(errno, addr));
        }

        self.set_state(SocketState::Connecting);
        debug!(socket = %self.core.id, peer = %addr, "connect in progress");

        let (nonblocking, timeout) = {
            let config = self.core.config.borrow();
            (config.nonblocking, config.timeout)
        };
        if nonblocking {
            return Err(SocketError::WouldBlock);
        }

        wait_fd(fd, true, timeout)?;
        match take_error(fd)? {
            None => {
                self.set_state(SocketState::Connected);
                debug!(socket = %self.core.id, peer = %addr, "connected");
                Ok(())
            }
            Some(errno) => Err(self.connect_failed(errno, addr)),
        }
    }

    fn connect_failed(&self, errno: i32, addr: &Address) -> SocketError {
        let err = SocketError::Connect { errno, addr: addr.to_string() };
        debug!(socket = %self.core.id, error = %err, "connect failed");
        self.close();
        err
    }
}
