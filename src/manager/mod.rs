//! Event-source managers: the pluggable layer that watches socket
//! descriptors and calls back into sockets when they become ready.
//!
//! A `Network` owns one manager. Sockets tell it which events are live via
//! `install_callback`/`uninstall_callback`; the manager translates the
//! installed set into read/write interest through `SocketHandle::interest`
//! and reports readiness back through `SocketHandle::dispatch`.

mod console;
mod host;

use std::rc::Rc;
use std::time::Duration;

pub use self::console::ConsoleManager;
pub use self::host::{HostLoop, LoopManager, PollLoop};

use crate::error::Result;
use crate::socket::{SocketEvent, SocketHandle};

/// Strategy for monitoring socket readiness.
///
/// Every method runs on the thread that owns the `Network`.
pub trait SocketManager {
	/// Global setup, called once by `Network::init`.
	fn on_init(&self) -> Result<()>;

	/// Global teardown, called once when the network is cleaned up.
	fn on_exit(&self);

	/// A socket was created. An error aborts the creation.
	fn init_socket(&self, socket: &SocketHandle) -> Result<()>;

	/// A socket is being dropped. Forget everything about it.
	fn destroy_socket(&self, socket: &SocketHandle);

	/// Start watching for `event` on `socket`. Must be idempotent: it is
	/// also called to announce that the socket's state or descriptor
	/// changed.
	fn install_callback(&self, socket: &SocketHandle, event: SocketEvent);

	/// Stop watching for `event` on `socket`, leaving other events alone.
	fn uninstall_callback(&self, socket: &SocketHandle, event: SocketEvent);

	/// Resume watching every installed event of `socket`.
	fn enable_events(&self, socket: &SocketHandle);

	/// Suspend watching `socket` without forgetting its installed events.
	fn disable_events(&self, socket: &SocketHandle);
}

/// Read/write interest for one descriptor.
///
/// `hangup` asks only for peer shutdown (`POLLRDHUP`), so unread data does
/// not wake a socket that watches for `Lost` alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
	pub readable: bool,
	pub writable: bool,
	pub hangup: bool,
}

impl Interest {
	pub const NONE: Interest = Interest { readable: false, writable: false, hangup: false };

	pub fn is_empty(self) -> bool {
		!self.readable && !self.writable && !self.hangup
	}

	/// `poll(2)` event bits.
	pub fn poll_events(self) -> libc::c_short {
		let mut events = 0;
		if self.readable {
			events |= libc::POLLIN;
		}
		if self.writable {
			events |= libc::POLLOUT;
		}
		if self.hangup {
			events |= libc::POLLRDHUP;
		}
		events
	}
}

/// `poll(2)` timeout in milliseconds, rounded up so a sub-millisecond wait
/// does not turn into a non-blocking poll.
pub(crate) fn poll_millis(timeout: Option<Duration>) -> libc::c_int {
	match timeout {
		Some(t) => t.as_micros().div_ceil(1000).min(libc::c_int::MAX as u128) as libc::c_int,
		None => -1,
	}
}

/// What `poll(2)` (or a host loop) reported for one descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
	pub readable: bool,
	pub writable: bool,
	pub error: bool,
	pub hangup: bool,
}

impl Readiness {
	pub fn from_revents(revents: libc::c_short) -> Self {
		Self {
			readable: revents & (libc::POLLIN | libc::POLLPRI) != 0,
			writable: revents & libc::POLLOUT != 0,
			error: revents & (libc::POLLERR | libc::POLLNVAL) != 0,
			hangup: revents & (libc::POLLHUP | libc::POLLRDHUP) != 0,
		}
	}

	pub fn is_empty(self) -> bool {
		!(self.readable || self.writable || self.error || self.hangup)
	}
}

/// The manager used by `Network::init_default()`.
pub fn default_manager() -> Rc<dyn SocketManager> {
	Rc::new(ConsoleManager::new())
}
