use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{poll_millis, Readiness, SocketManager};
use crate::error::{errno, Result, SocketError};
use crate::socket::{EventFlags, SocketEvent, SocketHandle, SocketId};

struct Watch {
	handle: SocketHandle,
	installed: EventFlags,
	suspended: bool,
}

/// Manager for programs without a host event loop.
///
/// Keeps a table of watched sockets and polls them directly; the program
/// drives it by calling `wait()` in its own loop.
///
/// # Example
/// ```ignore
/// let manager = Rc::new(ConsoleManager::new());
/// let network = Network::init(manager.clone())?;
/// // ... create sockets, set callbacks ...
/// while running {
///     manager.wait(Some(Duration::from_millis(100)))?;
/// }
/// ```
#[derive(Default)]
pub struct ConsoleManager {
	table: RefCell<HashMap<SocketId, Watch>>,
	initialized: Cell<bool>,
}

impl ConsoleManager {
	pub fn new() -> Self {
		Self::default()
	}

	/// Polls every watched socket once, for at most `timeout` (`None`
	/// blocks until something is ready), and dispatches what is ready.
	///
	/// Returns the number of callback invocations. With nothing to watch
	/// and no timeout it returns immediately.
	pub fn wait(&self, timeout: Option<Duration>) -> Result<usize> {
		let (handles, mut pollfds): (Vec<SocketHandle>, Vec<libc::pollfd>) = {
			let table = self.table.borrow();
			table
				.values()
				.filter(|watch| !watch.suspended && !watch.installed.is_empty())
				.filter_map(|watch| {
					let fd = watch.handle.fd()?;
					let interest = watch.handle.interest(watch.installed);
					if interest.is_empty() {
						return None;
					}
					Some((watch.handle.clone(), libc::pollfd { fd, events: interest.poll_events(), revents: 0 }))
				})
				.unzip()
		};
		if pollfds.is_empty() && timeout.is_none() {
			return Ok(0);
		}

		let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, poll_millis(timeout)) };
		if rc == -1 {
			let errno = errno();
			if errno == libc::EINTR {
				return Ok(0);
			}
			warn!(errno, "poll failed");
			return Err(SocketError::Poll { op: "poll", errno });
		}
		trace!(watched = pollfds.len(), ready = rc, "poll returned");

		// the table is not borrowed here, so callbacks may add or drop sockets
		let mut fired = 0;
		for (handle, pfd) in handles.iter().zip(&pollfds) {
			if pfd.revents == 0 || !handle.is_alive() {
				continue;
			}
			fired += handle.dispatch(Readiness::from_revents(pfd.revents));
		}
		Ok(fired)
	}

	/// Number of sockets with at least one installed, unsuspended event.
	pub fn watched(&self) -> usize {
		self.table
			.borrow()
			.values()
			.filter(|watch| !watch.suspended && !watch.installed.is_empty())
			.count()
	}

	/// Events installed for the socket `id`, or `None` if it is unknown.
	pub fn installed(&self, id: SocketId) -> Option<EventFlags> {
		self.table.borrow().get(&id).map(|watch| watch.installed)
	}

	fn update<F: FnOnce(&mut Watch)>(&self, socket: &SocketHandle, f: F) {
		match self.table.borrow_mut().get_mut(&socket.id()) {
			Some(watch) => f(watch),
			None => debug!(socket = %socket.id(), "event change for unknown socket"),
		}
	}
}

impl SocketManager for ConsoleManager {
	fn on_init(&self) -> Result<()> {
		self.initialized.set(true);
		debug!("console manager initialized");
		Ok(())
	}

	fn on_exit(&self) {
		if self.initialized.replace(false) {
			self.table.borrow_mut().clear();
			debug!("console manager shut down");
		}
	}

	fn init_socket(&self, socket: &SocketHandle) -> Result<()> {
		self.table.borrow_mut().insert(
			socket.id(),
			Watch { handle: socket.clone(), installed: EventFlags::empty(), suspended: false },
		);
		Ok(())
	}

	fn destroy_socket(&self, socket: &SocketHandle) {
		self.table.borrow_mut().remove(&socket.id());
	}

	fn install_callback(&self, socket: &SocketHandle, event: SocketEvent) {
		self.update(socket, |watch| watch.installed |= event.flag());
	}

	fn uninstall_callback(&self, socket: &SocketHandle, event: SocketEvent) {
		self.update(socket, |watch| watch.installed = watch.installed & !event.flag());
	}

	fn enable_events(&self, socket: &SocketHandle) {
		self.update(socket, |watch| watch.suspended = false);
	}

	fn disable_events(&self, socket: &SocketHandle) {
		self.update(socket, |watch| watch.suspended = true);
	}
}
