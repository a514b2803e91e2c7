use std::os::fd::AsRawFd;
use std::time::Duration;

use super::SocketKind;
use super::options::{
	set_broadcast, set_keepalive, set_keepalive_count, set_keepalive_idle, set_keepalive_interval,
	set_linger, set_recv_buffer_size, set_reuse_addr, set_reuse_port, set_send_buffer_size,
	set_tcp_nodelay,
};
use crate::addr::Family;
use crate::error::Result;

/// Kernel buffer sizes. `None` keeps the system default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferConfig {
	pub recv: Option<usize>,
	pub send: Option<usize>,
}

impl BufferConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn recv(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self
	}

	pub fn send(mut self, size: usize) -> Self {
		self.send = Some(size);
		self
	}

	pub fn both(self, size: usize) -> Self {
		self.recv(size).send(size)
	}

	fn apply<S: AsRawFd>(&self, socket: &S) -> Result<()> {
		if let Some(size) = self.recv {
			set_recv_buffer_size(socket, size)?;
		}
		if let Some(size) = self.send {
			set_send_buffer_size(socket, size)?;
		}
		Ok(())
	}
}

/// Address reuse. SO_REUSEADDR is on by default so a restarted server can
/// rebind its port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReuseConfig {
	pub addr: bool,
	pub port: bool,
}

impl Default for ReuseConfig {
	fn default() -> Self {
		Self { addr: true, port: false }
	}
}

impl ReuseConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn addr(mut self, enable: bool) -> Self {
		self.addr = enable;
		self
	}

	pub fn port(mut self, enable: bool) -> Self {
		self.port = enable;
		self
	}

	fn apply<S: AsRawFd>(&self, socket: &S) -> Result<()> {
		if self.addr {
			set_reuse_addr(socket, true)?;
		}
		if self.port {
			set_reuse_port(socket, true)?;
		}
		Ok(())
	}
}

/// Keep-alive probe timing, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
	pub idle_secs: u32,
	pub interval_secs: u32,
	pub count: u32,
}

impl Default for KeepaliveConfig {
	fn default() -> Self {
		Self { idle_secs: 60, interval_secs: 10, count: 5 }
	}
}

impl KeepaliveConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn idle(mut self, secs: u32) -> Self {
		self.idle_secs = secs;
		self
	}

	pub fn interval(mut self, secs: u32) -> Self {
		self.interval_secs = secs;
		self
	}

	pub fn count(mut self, count: u32) -> Self {
		self.count = count;
		self
	}
}

/// TCP-only settings. Ignored for unix-domain and datagram sockets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpConfig {
	pub nodelay: bool,
	/// `Some(None)` turns lingering off explicitly; `None` leaves it alone.
	pub linger: Option<Option<u32>>,
	pub keepalive: Option<KeepaliveConfig>,
}

impl TcpConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn nodelay(mut self, enable: bool) -> Self {
		self.nodelay = enable;
		self
	}

	pub fn linger(mut self, seconds: Option<u32>) -> Self {
		self.linger = Some(seconds);
		self
	}

	pub fn keepalive(mut self, config: KeepaliveConfig) -> Self {
		self.keepalive = Some(config);
		self
	}

	fn apply<S: AsRawFd>(&self, socket: &S) -> Result<()> {
		if self.nodelay {
			set_tcp_nodelay(socket, true)?;
		}
		if let Some(linger) = self.linger {
			set_linger(socket, linger)?;
		}
		if let Some(keepalive) = self.keepalive {
			set_keepalive(socket, true)?;
			set_keepalive_idle(socket, keepalive.idle_secs)?;
			set_keepalive_interval(socket, keepalive.interval_secs)?;
			set_keepalive_count(socket, keepalive.count)?;
		}
		Ok(())
	}
}

/// Per-socket settings, applied as soon as the descriptor exists.
///
/// # Example
/// ```ignore
/// let config = SocketConfig::new()
///     .nonblocking(true)
///     .backlog(128)
///     .tcp(TcpConfig::new().nodelay(true).keepalive(KeepaliveConfig::new().idle(30)));
/// let socket = network.socket_with(SocketKind::Stream, config)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
	/// Return `WouldBlock` instead of waiting.
	pub nonblocking: bool,
	/// Upper bound for blocking waits. `None` waits forever.
	pub timeout: Option<Duration>,
	pub backlog: i32,
	pub reuse: ReuseConfig,
	pub buffers: BufferConfig,
	pub tcp: TcpConfig,
	pub broadcast: bool,
}

impl Default for SocketConfig {
	fn default() -> Self {
		Self {
			nonblocking: false,
			timeout: Some(Self::DEFAULT_TIMEOUT),
			backlog: Self::DEFAULT_BACKLOG,
			reuse: ReuseConfig::default(),
			buffers: BufferConfig::default(),
			tcp: TcpConfig::default(),
			broadcast: false,
		}
	}
}

impl SocketConfig {
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
	pub const DEFAULT_BACKLOG: i32 = 5;

	pub fn new() -> Self {
		Self::default()
	}

	pub fn nonblocking(mut self, enable: bool) -> Self {
		self.nonblocking = enable;
		self
	}

	pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn backlog(mut self, backlog: i32) -> Self {
		self.backlog = backlog;
		self
	}

	pub fn reuse(mut self, config: ReuseConfig) -> Self {
		self.reuse = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	pub fn tcp(mut self, config: TcpConfig) -> Self {
		self.tcp = config;
		self
	}

	pub fn broadcast(mut self, enable: bool) -> Self {
		self.broadcast = enable;
		self
	}

	/// Applies the descriptor-level options for a socket of `family`/`kind`.
	pub(crate) fn apply<S: AsRawFd>(&self, socket: &S, family: Family, kind: SocketKind) -> Result<()> {
		self.reuse.apply(socket)?;
		self.buffers.apply(socket)?;
		if self.broadcast && kind == SocketKind::Datagram {
			set_broadcast(socket, true)?;
		}
		if kind == SocketKind::Stream && matches!(family, Family::Inet | Family::Inet6) {
			self.tcp.apply(socket)?;
		}
		Ok(())
	}
}
