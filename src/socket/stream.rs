use std::io;

use tracing::{debug, trace};

use super::{EventFlags, Socket, SocketKind, SocketState};
use crate::error::{errno, Result, SocketError};

/// Which half of a connection to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
	Read,
	Write,
	ReadWrite,
}

impl Shutdown {
	fn raw(self) -> libc::c_int {
		match self {
			Shutdown::Read => libc::SHUT_RD,
			Shutdown::Write => libc::SHUT_WR,
			Shutdown::ReadWrite => libc::SHUT_RDWR,
		}
	}
}

/// Maps a failed `send`/`recv` errno: EAGAIN becomes `WouldBlock`.
fn io_error(errno: i32, write: bool) -> SocketError {
	if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
		SocketError::WouldBlock
	} else if write {
		SocketError::Write { errno }
	} else {
		SocketError::Read { errno }
	}
}

impl Socket {
	/// Sends bytes and returns how many were accepted by the kernel.
	///
	/// Stream sockets must be `Connected`. Datagram sockets send to the
	/// connected peer, or else to the stored peer address.
	///
	/// In non-blocking mode a full buffer gives `WouldBlock`; in blocking
	/// mode the call waits up to the timeout, then gives `TimedOut`. A hard
	/// error (reset, broken pipe) closes the socket.
	pub fn send(&self, buf: &[u8]) -> Result<usize> {
		self.track(self.send_inner(buf))
	}

	fn send_inner(&self, buf: &[u8]) -> Result<usize> {
		self.ensure_open()?;
		if self.core.kind == SocketKind::Datagram && self.state() != SocketState::Connected {
			let peer = self
				.core
				.peer
				.borrow()
				.clone()
				.ok_or(SocketError::InvalidAddress { reason: "no peer address" })?;
			return self.send_to_inner(buf, &peer);
		}

		let fd = self.fd_in(&[SocketState::Connected], "send needs a connected socket")?;
		self.rearm(EventFlags::OUTPUT);
		self.wait_ready(fd, true)?;

		let n = unsafe {
			libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), libc::MSG_NOSIGNAL)
		};
		if n == -1 {
			let err = io_error(errno(), true);
			if err.is_hard() {
				self.drop_connection(&err);
			}
			return Err(err);
		}
		trace!(socket = %self.core.id, bytes = n, "sent");
		Ok(n as usize)
	}

	/// Receives bytes into `buf`.
	///
	/// `Ok(0)` on a stream socket means the peer closed its side. With
	/// nothing to read, non-blocking mode gives `WouldBlock` and `buf` is
	/// not touched. Datagram sockets behave like `receive_from()` and
	/// discard the sender.
	pub fn receive(&self, buf: &mut [u8]) -> Result<usize> {
		if self.core.kind == SocketKind::Datagram {
			return self.receive_from(buf).map(|(n, _)| n);
		}
		self.track(self.receive_inner(buf))
	}

	fn receive_inner(&self, buf: &mut [u8]) -> Result<usize> {
		let fd = self.fd_in(&[SocketState::Connected], "receive needs a connected socket")?;
		self.rearm(EventFlags::INPUT);
		self.wait_ready(fd, false)?;

		let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
		if n == -1 {
			let err = io_error(errno(), false);
			if err.is_hard() {
				self.drop_connection(&err);
			}
			return Err(err);
		}
		trace!(socket = %self.core.id, bytes = n, "received");
		Ok(n as usize)
	}

	/// Shuts down one or both halves of a connection. The socket stays
	/// open; a write shutdown makes the peer read EOF.
	pub fn shutdown(&self, how: Shutdown) -> Result<()> {
		self.track(self.shutdown_inner(how))
	}

	fn shutdown_inner(&self, how: Shutdown) -> Result<()> {
		let fd = self.fd_in(&[SocketState::Connected], "shutdown needs a connected socket")?;
		if unsafe { libc::shutdown(fd, how.raw()) } == -1 {
			return Err(SocketError::Write { errno: errno() });
		}
		debug!(socket = %self.core.id, ?how, "shutdown");
		Ok(())
	}
}

impl io::Read for Socket {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		Ok(self.receive(buf)?)
	}
}

impl io::Write for Socket {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		Ok(self.send(buf)?)
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}
