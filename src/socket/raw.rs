use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{Socket, SocketState};
use crate::addr::{self, Address, Family, ToSockAddr};
use crate::error::{errno, Result, SocketError};

/// Milliseconds left until `deadline`, rounded up, for `poll(2)`.
/// `None` waits forever.
pub(crate) fn poll_timeout(deadline: Option<Instant>) -> libc::c_int {
	match deadline {
		None => -1,
		Some(deadline) => {
			let left = deadline.saturating_duration_since(Instant::now());
			let ms = left.as_micros().div_ceil(1000);
			ms.min(libc::c_int::MAX as u128) as libc::c_int
		}
	}
}

/// Waits until `fd` is readable or writable, up to `timeout`.
///
/// Errors, hangups and invalid descriptors count as ready: the following
/// syscall reports them.
pub(crate) fn wait_fd(fd: RawFd, writable: bool, timeout: Option<Duration>) -> Result<()> {
	let deadline = timeout.map(|t| Instant::now() + t);
	let mut pfd = libc::pollfd {
		fd,
		events: if writable { libc::POLLOUT } else { libc::POLLIN },
		revents: 0,
	};
	loop {
		let rc = unsafe { libc::poll(&mut pfd, 1, poll_timeout(deadline)) };
		match rc {
			-1 if errno() == libc::EINTR => continue,
			-1 => return Err(SocketError::Poll { op: "poll", errno: errno() }),
			0 => {
				trace!(fd, writable, "wait timed out");
				return Err(SocketError::TimedOut);
			}
			_ => return Ok(()),
		}
	}
}

impl Socket {
	/// Returns the descriptor, creating it for `family` on first use.
	///
	/// The descriptor is created with `SOCK_CLOEXEC | SOCK_NONBLOCK` and the
	/// socket's configuration is applied before it is stored.
	pub(crate) fn acquire(&self, family: Family) -> Result<RawFd> {
		if let Some(fd) = self.raw_fd() {
			return Ok(fd);
		}
		if family == Family::Unspec {
			return Err(SocketError::InvalidAddress { reason: "address family not set" });
		}

		let fd = unsafe {
			libc::socket(
				family.raw(),
				self.core.kind.raw() | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
				0,
			)
		};
		if fd == -1 {
			return Err(SocketError::Create { errno: errno() });
		}
		let fd = unsafe { OwnedFd::from_raw_fd(fd) };

		// on failure the OwnedFd is dropped and closed here
		self.core.config.borrow().apply(&fd, family, self.core.kind)?;

		let raw = fd.as_raw_fd();
		*self.core.fd.borrow_mut() = Some(fd);
		debug!(socket = %self.core.id, fd = raw, %family, "descriptor allocated");
		self.resync_watches();
		Ok(raw)
	}

	/// Adopts a descriptor produced by `accept()`.
	pub(crate) fn adopt(&self, fd: OwnedFd, peer: Option<Address>) {
		*self.core.fd.borrow_mut() = Some(fd);
		*self.core.peer.borrow_mut() = peer;
		self.set_state(SocketState::Connected);
	}

	/// Uninstalls every watch, then closes the descriptor.
	pub(crate) fn release_fd(&self) {
		self.uninstall_watches();
		if let Some(fd) = self.core.fd.borrow_mut().take() {
			debug!(socket = %self.core.id, fd = fd.as_raw_fd(), "descriptor released");
		}
	}

	/// Waits for readiness unless the socket is in non-blocking mode.
	pub(crate) fn wait_ready(&self, fd: RawFd, writable: bool) -> Result<()> {
		let config = self.core.config.borrow();
		if config.nonblocking {
			return Ok(());
		}
		let timeout = config.timeout;
		drop(config);
		wait_fd(fd, writable, timeout)
	}

	/// Binds the socket to a local address: `Unallocated → Bound`.
	///
	/// On failure the descriptor is released and the socket stays
	/// `Unallocated`, so another address may be tried.
	pub fn bind(&self, addr: &Address) -> Result<()> {
		self.track(self.bind_inner(addr))
	}

	pub(super) fn bind_inner(&self, addr: &Address) -> Result<()> {
		self.ensure_open()?;
		if self.state() != SocketState::Unallocated || self.raw_fd().is_some() {
			return Err(SocketError::InvalidSocket { reason: "socket already has a descriptor" });
		}
		if !addr.is_complete() {
			return Err(SocketError::InvalidAddress { reason: "incomplete address" });
		}

		let fd = self.acquire(addr.family())?;
		let result = addr.with_raw(|ptr, len| unsafe { libc::bind(fd, ptr, len) });

		match result {
			Some(-1) => {
				// read errno before close() can clobber it
				let err = SocketError::Bind { errno: errno(), addr: addr.to_string() };
				self.release_fd();
				Err(err)
			}
			Some(_) => {
				*self.core.local.borrow_mut() = Some(addr.clone());
				self.set_state(SocketState::Bound);
				debug!(socket = %self.core.id, %addr, "bound");
				Ok(())
			}
			None => {
				self.release_fd();
				Err(SocketError::InvalidAddress { reason: "address too long" })
			}
		}
	}

	/// Stores the local address used by a later `connect()` from
	/// `Unallocated`. The socket keeps its own copy.
	pub fn set_local(&self, addr: &Address) -> Result<()> {
		self.track(self.ensure_open().and_then(|()| {
			if self.state() != SocketState::Unallocated {
				return Err(SocketError::InvalidSocket { reason: "local address is fixed once a descriptor exists" });
			}
			*self.core.local.borrow_mut() = Some(addr.clone());
			Ok(())
		}))
	}

	/// Stores the default peer, used by datagram `send()`.
	pub fn set_peer(&self, addr: &Address) -> Result<()> {
		self.track(self.ensure_open().map(|()| {
			*self.core.peer.borrow_mut() = Some(addr.clone());
		}))
	}

	/// Local address: the kernel's view when a descriptor exists (so an
	/// OS-assigned port is visible), otherwise the stored one.
	pub fn local(&self) -> Result<Address> {
		self.track(self.local_inner())
	}

	fn local_inner(&self) -> Result<Address> {
		if let Some(fd) = self.raw_fd() {
			let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
			let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
			let result = unsafe {
				libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
			};
			if result == -1 {
				return Err(SocketError::GetOption { errno: errno(), option: "SO_SOCKNAME" });
			}
			return addr::from_storage(&storage, len);
		}
		self.core
			.local
			.borrow()
			.clone()
			.ok_or(SocketError::InvalidAddress { reason: "no local address" })
	}

	/// Peer address: the stored one, or the kernel's view for a connected
	/// descriptor.
	pub fn peer(&self) -> Result<Address> {
		self.track(self.peer_inner())
	}

	fn peer_inner(&self) -> Result<Address> {
		if let Some(peer) = self.core.peer.borrow().clone() {
			return Ok(peer);
		}
		let fd = self.raw_fd().ok_or(SocketError::InvalidAddress { reason: "no peer address" })?;
		let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
		let result = unsafe {
			libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
		};
		if result == -1 {
			return Err(SocketError::GetOption { errno: errno(), option: "SO_PEERNAME" });
		}
		addr::from_storage(&storage, len)
	}

	/// Switches between blocking (wait up to the timeout) and non-blocking
	/// (return `WouldBlock`) behaviour.
	pub fn set_nonblocking(&self, nonblocking: bool) {
		self.core.config.borrow_mut().nonblocking = nonblocking;
	}

	pub fn is_nonblocking(&self) -> bool {
		self.core.config.borrow().nonblocking
	}

	/// Sets the blocking-mode timeout. `None` waits forever.
	pub fn set_timeout(&self, timeout: Option<Duration>) {
		self.core.config.borrow_mut().timeout = timeout;
	}

	pub fn timeout(&self) -> Option<Duration> {
		self.core.config.borrow().timeout
	}
}
