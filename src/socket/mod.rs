//! The `Socket` entity: one OS descriptor, its state machine, and its
//! single event callback.
//!
//! ```text
//! Unallocated ──bind──▶ Bound ──listen──▶ Listening ──accept──▶ (new Connected socket)
//!      │                  │
//!      └──connect──┬──────┘
//!                  ▼
//!             Connecting ──(writable, SO_ERROR = 0)──▶ Connected
//!
//! any state ──close / hard I/O error──▶ Closed
//! ```
//!
//! The descriptor is always non-blocking at the OS level. "Blocking" mode is
//! a `poll(2)` on the socket's own descriptor, bounded by the configured
//! timeout, before each operation.

mod raw;
mod listener;
mod pending;
mod stream;
mod datagram;
mod event;
mod options;
mod config;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::addr::Address;
use crate::error::{ErrorCode, Result, SocketError};
use crate::manager::{Interest, Readiness};
use crate::network::NetworkShared;

pub use self::config::{BufferConfig, KeepaliveConfig, ReuseConfig, SocketConfig, TcpConfig};
pub use self::event::{Callback, EventFlags, SocketEvent};
pub use self::options::{
	set_broadcast, set_keepalive, set_keepalive_count, set_keepalive_idle, set_keepalive_interval,
	set_linger, set_recv_buffer_size, set_reuse_addr, set_reuse_port, set_send_buffer_size,
	set_tcp_nodelay,
};
pub use self::stream::Shutdown;
use self::event::EventState;

/// Stream vs. datagram mode.
///
/// - `Stream`: reliable, ordered byte stream (TCP, unix stream)
/// - `Datagram`: unreliable, message-preserving packets (UDP, unix datagram)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
	Stream,
	Datagram,
}

impl SocketKind {
	/// Returns the libc constant for this socket type.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			SocketKind::Stream => libc::SOCK_STREAM,
			SocketKind::Datagram => libc::SOCK_DGRAM,
		}
	}
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
	/// No descriptor yet.
	Unallocated,
	/// Bound to a local address.
	Bound,
	/// Non-blocking connect in flight.
	Connecting,
	/// Accepting incoming connections.
	Listening,
	/// Connected to a peer.
	Connected,
	/// Closed explicitly or after a hard I/O error. Terminal.
	Closed,
}

/// Process-unique socket identifier, used as the manager's table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
	pub(crate) fn new(raw: u64) -> Self {
		Self(raw)
	}
}

impl fmt::Display for SocketId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

pub(crate) struct SocketCore {
	id: SocketId,
	kind: SocketKind,
	network: Rc<NetworkShared>,
	fd: RefCell<Option<OwnedFd>>,
	state: Cell<SocketState>,
	error: Cell<ErrorCode>,
	local: RefCell<Option<Address>>,
	peer: RefCell<Option<Address>>,
	config: RefCell<SocketConfig>,
	events: EventState,
	weak: Weak<SocketCore>,
}

/// An owned socket.
///
/// Dropping it closes the descriptor and unregisters it from the manager.
/// Event callbacks receive a borrowed `&Socket` view of the same socket,
/// which supports every operation but does not own the socket.
pub struct Socket {
	core: Rc<SocketCore>,
	owned: bool,
}

impl Socket {
	/// Creates a socket and registers it with the network's manager.
	pub(crate) fn create(network: &Rc<NetworkShared>, kind: SocketKind, config: SocketConfig) -> Result<Self> {
		let id = network.next_id();
		let core = Rc::new_cyclic(|weak| SocketCore {
			id,
			kind,
			network: Rc::clone(network),
			fd: RefCell::new(None),
			state: Cell::new(SocketState::Unallocated),
			error: Cell::new(ErrorCode::NoError),
			local: RefCell::new(None),
			peer: RefCell::new(None),
			config: RefCell::new(config),
			events: EventState::new(),
			weak: weak.clone(),
		});

		// not owned until the manager accepted it, so a failed init skips teardown
		let mut socket = Socket { core, owned: false };
		network.manager.init_socket(&socket.handle())?;
		socket.owned = true;
		network.socket_created();
		debug!(socket = %id, ?kind, "socket created");
		Ok(socket)
	}

	/// Non-owning view handed to event callbacks.
	pub(crate) fn view(core: Rc<SocketCore>) -> Self {
		Socket { core, owned: false }
	}

	/// Returns the manager-facing handle.
	pub fn handle(&self) -> SocketHandle {
		SocketHandle {
			id: self.core.id,
			core: self.core.weak.clone(),
		}
	}

	pub fn id(&self) -> SocketId {
		self.core.id
	}

	pub fn kind(&self) -> SocketKind {
		self.core.kind
	}

	pub fn state(&self) -> SocketState {
		self.core.state.get()
	}

	/// Code of the last failed operation on this socket.
	pub fn last_error(&self) -> ErrorCode {
		self.core.error.get()
	}

	/// Returns the raw file descriptor, if one is allocated.
	pub fn raw_fd(&self) -> Option<RawFd> {
		self.core.fd.borrow().as_ref().map(AsRawFd::as_raw_fd)
	}

	/// Returns a copy of the current configuration.
	pub fn config(&self) -> SocketConfig {
		self.core.config.borrow().clone()
	}

	/// Records the error code of a failed call.
	fn track<T>(&self, result: Result<T>) -> Result<T> {
		if let Err(err) = &result {
			self.core.error.set(err.code());
		}
		result
	}

	fn set_state(&self, state: SocketState) {
		let old = self.core.state.replace(state);
		if old != state {
			debug!(socket = %self.core.id, from = ?old, to = ?state, "state change");
			// interest depends on the state, so managers must re-read it
			if state != SocketState::Closed {
				self.resync_watches();
			}
		}
	}

	fn ensure_open(&self) -> Result<()> {
		if self.state() == SocketState::Closed {
			return Err(SocketError::InvalidSocket { reason: "socket is closed" });
		}
		Ok(())
	}

	/// Descriptor of a socket in one of `states`.
	fn fd_in(&self, states: &[SocketState], reason: &'static str) -> Result<RawFd> {
		self.ensure_open()?;
		if !states.contains(&self.state()) {
			return Err(SocketError::InvalidSocket { reason });
		}
		self.raw_fd().ok_or(SocketError::InvalidSocket { reason: "no descriptor" })
	}

	/// Closes the socket. All later I/O fails with `InvalidSocket`.
	///
	/// Closing twice is a no-op.
	pub fn close(&self) {
		if self.state() == SocketState::Closed {
			return;
		}
		self.release_fd();
		self.set_state(SocketState::Closed);
	}

	/// Hard I/O failure: the connection is unusable from here on.
	fn drop_connection(&self, err: &SocketError) {
		debug!(socket = %self.core.id, error = %err, "dropping connection after hard error");
		self.close();
	}
}

impl Drop for Socket {
	fn drop(&mut self) {
		if !self.owned {
			return;
		}
		self.close();
		let network = Rc::clone(&self.core.network);
		network.manager.destroy_socket(&self.handle());
		network.socket_destroyed();
		debug!(socket = %self.core.id, "socket destroyed");
	}
}

impl fmt::Debug for Socket {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Socket")
			.field("id", &self.core.id)
			.field("kind", &self.core.kind)
			.field("state", &self.core.state.get())
			.field("fd", &self.raw_fd())
			.finish()
	}
}

/// Weak reference to a socket, held by managers in their watch tables.
#[derive(Clone)]
pub struct SocketHandle {
	id: SocketId,
	core: Weak<SocketCore>,
}

impl SocketHandle {
	pub fn id(&self) -> SocketId {
		self.id
	}

	/// False once the socket has been dropped.
	pub fn is_alive(&self) -> bool {
		self.core.strong_count() > 0
	}

	/// Current descriptor of the socket, if any.
	pub fn fd(&self) -> Option<RawFd> {
		let core = self.core.upgrade()?;
		Socket::view(core).raw_fd()
	}

	/// Maps the installed events to read/write interest for the socket's
	/// current state.
	pub fn interest(&self, installed: EventFlags) -> Interest {
		match self.core.upgrade() {
			Some(core) => Socket::view(core).interest(installed),
			None => Interest::NONE,
		}
	}

	/// Runs detection for `readiness` and invokes the callback for every
	/// live event found. Returns the number of callback invocations.
	pub fn dispatch(&self, readiness: Readiness) -> usize {
		match self.core.upgrade() {
			Some(core) => Socket::view(core).dispatch(readiness),
			None => 0,
		}
	}
}

impl fmt::Debug for SocketHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SocketHandle")
			.field("id", &self.id)
			.field("alive", &self.is_alive())
			.finish()
	}
}
