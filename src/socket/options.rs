use std::os::fd::AsRawFd;

use tracing::debug;

use super::Socket;
use crate::error::{errno, Result, SocketError};

/// `setsockopt` with an `int` value.
fn set_int_option<S: AsRawFd>(socket: &S, level: libc::c_int, name: libc::c_int, value: libc::c_int, option: &'static str) -> Result<()> {
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			level,
			name,
			&value as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::c_int>() as libc::socklen_t,
		)
	};
	if result == -1 {
		return Err(SocketError::SetOption { errno: errno(), option });
	}
	Ok(())
}

/// `getsockopt` with an `int` value.
fn get_int_option<S: AsRawFd>(socket: &S, level: libc::c_int, name: libc::c_int, option: &'static str) -> Result<libc::c_int> {
	let mut value: libc::c_int = 0;
	let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
	let result = unsafe {
		libc::getsockopt(
			socket.as_raw_fd(),
			level,
			name,
			&mut value as *mut _ as *mut libc::c_void,
			&mut len,
		)
	};
	if result == -1 {
		return Err(SocketError::GetOption { errno: errno(), option });
	}
	Ok(value)
}

/// Sets SO_REUSEADDR. Lets a server rebind a port left in TIME_WAIT.
pub fn set_reuse_addr<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	set_int_option(socket, libc::SOL_SOCKET, libc::SO_REUSEADDR, enable as libc::c_int, "SO_REUSEADDR")
}

/// Sets SO_REUSEPORT.
pub fn set_reuse_port<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	set_int_option(socket, libc::SOL_SOCKET, libc::SO_REUSEPORT, enable as libc::c_int, "SO_REUSEPORT")
}

/// Sets SO_BROADCAST, needed to send datagrams to a broadcast address.
pub fn set_broadcast<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	set_int_option(socket, libc::SOL_SOCKET, libc::SO_BROADCAST, enable as libc::c_int, "SO_BROADCAST")
}

/// Sets TCP_NODELAY (disables Nagle's algorithm).
pub fn set_tcp_nodelay<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	set_int_option(socket, libc::IPPROTO_TCP, libc::TCP_NODELAY, enable as libc::c_int, "TCP_NODELAY")
}

/// Sets SO_RCVBUF. The kernel doubles the value internally.
pub fn set_recv_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<()> {
	let size = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
	set_int_option(socket, libc::SOL_SOCKET, libc::SO_RCVBUF, size, "SO_RCVBUF")
}

/// Sets SO_SNDBUF. The kernel doubles the value internally.
pub fn set_send_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<()> {
	let size = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
	set_int_option(socket, libc::SOL_SOCKET, libc::SO_SNDBUF, size, "SO_SNDBUF")
}

/// Sets SO_KEEPALIVE. Tune the probes with the three `set_keepalive_*`
/// functions below.
pub fn set_keepalive<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	set_int_option(socket, libc::SOL_SOCKET, libc::SO_KEEPALIVE, enable as libc::c_int, "SO_KEEPALIVE")
}

/// Idle seconds before the first keep-alive probe (TCP_KEEPIDLE).
pub fn set_keepalive_idle<S: AsRawFd>(socket: &S, seconds: u32) -> Result<()> {
	set_int_option(socket, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, seconds as libc::c_int, "TCP_KEEPIDLE")
}

/// Seconds between unanswered probes (TCP_KEEPINTVL).
pub fn set_keepalive_interval<S: AsRawFd>(socket: &S, seconds: u32) -> Result<()> {
	set_int_option(socket, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, seconds as libc::c_int, "TCP_KEEPINTVL")
}

/// Unanswered probes before the peer is declared dead (TCP_KEEPCNT).
pub fn set_keepalive_count<S: AsRawFd>(socket: &S, count: u32) -> Result<()> {
	set_int_option(socket, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, count as libc::c_int, "TCP_KEEPCNT")
}

/// Sets SO_LINGER.
///
/// - `None`: close() returns at once, the kernel flushes in the background
/// - `Some(0)`: close() resets the connection
/// - `Some(n)`: close() blocks up to n seconds to flush
pub fn set_linger<S: AsRawFd>(socket: &S, linger: Option<u32>) -> Result<()> {
	let val = libc::linger {
		l_onoff: linger.is_some() as libc::c_int,
		l_linger: linger.unwrap_or(0) as libc::c_int,
	};
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			libc::SOL_SOCKET,
			libc::SO_LINGER,
			&val as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::linger>() as libc::socklen_t,
		)
	};
	if result == -1 {
		return Err(SocketError::SetOption { errno: errno(), option: "SO_LINGER" });
	}
	Ok(())
}

/// Borrowed raw descriptor, for the free functions above.
struct Fd(libc::c_int);

impl AsRawFd for Fd {
	fn as_raw_fd(&self) -> libc::c_int {
		self.0
	}
}

impl Socket {
	/// Enables SO_REUSEADDR (and SO_REUSEPORT when available). Recorded in
	/// the configuration, so it also applies to a descriptor created later.
	pub fn set_reusable(&self, enable: bool) -> Result<()> {
		self.track(self.ensure_open().and_then(|()| {
			self.core.config.borrow_mut().reuse.addr = enable;
			match self.raw_fd() {
				Some(fd) => set_reuse_addr(&Fd(fd), enable),
				None => Ok(()),
			}
		}))
	}

	/// Enables SO_BROADCAST for a datagram socket.
	pub fn set_broadcast(&self, enable: bool) -> Result<()> {
		self.track(self.ensure_open().and_then(|()| {
			self.core.config.borrow_mut().broadcast = enable;
			match self.raw_fd() {
				Some(fd) => set_broadcast(&Fd(fd), enable),
				None => Ok(()),
			}
		}))
	}

	/// Reads an integer socket option.
	pub fn option(&self, level: libc::c_int, name: libc::c_int) -> Result<libc::c_int> {
		self.track(self.ensure_open().and_then(|()| {
			let fd = self.raw_fd().ok_or(SocketError::InvalidSocket { reason: "no descriptor" })?;
			get_int_option(&Fd(fd), level, name, "raw option")
		}))
	}

	/// Writes an integer socket option on the current descriptor.
	pub fn set_option(&self, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<()> {
		self.track(self.ensure_open().and_then(|()| {
			let fd = self.raw_fd().ok_or(SocketError::InvalidSocket { reason: "no descriptor" })?;
			set_int_option(&Fd(fd), level, name, value, "raw option")?;
			debug!(socket = %self.core.id, level, name, value, "option set");
			Ok(())
		}))
	}
}
