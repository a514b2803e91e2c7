use tracing::trace;

use super::{EventFlags, Socket, SocketKind, SocketState};
use crate::addr::{self, Address, ToSockAddr, UnixAddr};
use crate::error::{errno, Result, SocketError};

impl Socket {
	/// Binds a datagram socket to `addr` so it can exchange packets with
	/// any peer.
	pub fn set_non_oriented(&self, addr: &Address) -> Result<()> {
		if self.core.kind != SocketKind::Datagram {
			return self.track(Err(SocketError::InvalidOperation { reason: "not a datagram socket" }));
		}
		self.bind(addr)
	}

	/// Sends one datagram to `addr`.
	///
	/// An unbound socket gets a descriptor for `addr`'s family and an
	/// ephemeral local port, and becomes `Bound`.
	pub fn send_to(&self, buf: &[u8], addr: &Address) -> Result<usize> {
		self.track(self.send_to_inner(buf, addr))
	}

	pub(super) fn send_to_inner(&self, buf: &[u8], addr: &Address) -> Result<usize> {
		self.ensure_open()?;
		if self.core.kind != SocketKind::Datagram {
			return Err(SocketError::InvalidOperation { reason: "send_to needs a datagram socket" });
		}
		if !addr.is_complete() {
			return Err(SocketError::InvalidAddress { reason: "incomplete address" });
		}

		let fd = self.acquire(addr.family())?;
		if self.state() == SocketState::Unallocated {
			self.set_state(SocketState::Bound);
		}
		self.rearm(EventFlags::OUTPUT);
		self.wait_ready(fd, true)?;

		let n = addr
			.with_raw(|ptr, len| unsafe {
				libc::sendto(fd, buf.as_ptr() as *const libc::c_void, buf.len(), libc::MSG_NOSIGNAL, ptr, len)
			})
			.ok_or(SocketError::InvalidAddress { reason: "address too long" })?;
		if n == -1 {
			let errno = errno();
			if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
				return Err(SocketError::WouldBlock);
			}
			return Err(SocketError::Write { errno });
		}
		trace!(socket = %self.core.id, bytes = n, to = %addr, "datagram sent");
		Ok(n as usize)
	}

	/// Receives one datagram and returns its size and sender.
	///
	/// Unless the socket is connected, the sender becomes the stored peer,
	/// so a plain `send()` replies to it. An unbound unix sender comes back
	/// as an unnamed `UnixAddr` and is not stored.
	pub fn receive_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
		self.track(self.receive_from_inner(buf))
	}

	fn receive_from_inner(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
		if self.core.kind != SocketKind::Datagram {
			self.ensure_open()?;
			return Err(SocketError::InvalidOperation { reason: "receive_from needs a datagram socket" });
		}
		let fd = self.fd_in(&[SocketState::Bound, SocketState::Connected], "receive_from needs a bound socket")?;
		self.rearm(EventFlags::INPUT);
		self.wait_ready(fd, false)?;

		let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
		let n = unsafe {
			libc::recvfrom(
				fd,
				buf.as_mut_ptr() as *mut libc::c_void,
				buf.len(),
				0,
				&mut storage as *mut _ as *mut libc::sockaddr,
				&mut len,
			)
		};
		if n == -1 {
			let errno = errno();
			if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
				return Err(SocketError::WouldBlock);
			}
			return Err(SocketError::Read { errno });
		}

		// the datagram is already consumed, so a sender without an address
		// (an unbound unix socket) is reported as unnamed instead of failing
		let from = addr::from_storage(&storage, len).unwrap_or_else(|_| UnixAddr::unnamed().into());
		let unnamed = matches!(from.unix_addr(), Ok(unix) if unix.is_unnamed());
		if !unnamed && self.state() != SocketState::Connected {
			*self.core.peer.borrow_mut() = Some(from.clone());
		}
		trace!(socket = %self.core.id, bytes = n, from = %from, "datagram received");
		Ok((n as usize, from))
	}
}
