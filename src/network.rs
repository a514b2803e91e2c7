use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::manager::{self, SocketManager};
use crate::socket::{Socket, SocketConfig, SocketId, SocketKind};

/// State shared between a `Network` and every socket created from it.
pub(crate) struct NetworkShared {
	pub(crate) manager: Rc<dyn SocketManager>,
	live: Cell<usize>,
	next_id: Cell<u64>,
	exited: Cell<bool>,
}

impl NetworkShared {
	pub(crate) fn next_id(&self) -> SocketId {
		let id = self.next_id.get() + 1;
		self.next_id.set(id);
		SocketId::new(id)
	}

	pub(crate) fn socket_created(&self) {
		self.live.set(self.live.get() + 1);
	}

	pub(crate) fn socket_destroyed(&self) {
		self.live.set(self.live.get().saturating_sub(1));
	}

	/// Runs the manager's teardown once.
	fn exit(&self) {
		if self.exited.replace(true) {
			return;
		}
		let live = self.live.get();
		if live > 0 {
			warn!(live, "network cleaned up with live sockets");
		}
		self.manager.on_exit();
		debug!("network cleaned up");
	}
}

/// The socket subsystem: one manager plus the sockets created through it.
///
/// Sockets keep the shared state alive, so a socket may outlive its
/// `Network` value; after cleanup the manager no longer watches it.
pub struct Network {
	shared: Rc<NetworkShared>,
}

impl Network {
	/// Initializes the subsystem with `manager`.
	pub fn init(manager: Rc<dyn SocketManager>) -> Result<Self> {
		manager.on_init()?;
		debug!("network initialized");
		Ok(Self {
			shared: Rc::new(NetworkShared {
				manager,
				live: Cell::new(0),
				next_id: Cell::new(0),
				exited: Cell::new(false),
			}),
		})
	}

	/// Initializes with the default manager (`ConsoleManager`).
	pub fn init_default() -> Result<Self> {
		Self::init(manager::default_manager())
	}

	pub fn manager(&self) -> &Rc<dyn SocketManager> {
		&self.shared.manager
	}

	/// Creates an unallocated socket with the default configuration.
	pub fn socket(&self, kind: SocketKind) -> Result<Socket> {
		self.socket_with(kind, SocketConfig::default())
	}

	pub fn socket_with(&self, kind: SocketKind, config: SocketConfig) -> Result<Socket> {
		Socket::create(&self.shared, kind, config)
	}

	/// Sockets created and not yet dropped.
	pub fn live_sockets(&self) -> usize {
		self.shared.live.get()
	}

	/// Shuts the subsystem down. Dropping the `Network` does the same.
	pub fn cleanup(self) {
		self.shared.exit();
	}
}

impl Drop for Network {
	fn drop(&mut self) {
		self.shared.exit();
	}
}
