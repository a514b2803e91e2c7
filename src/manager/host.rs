use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{poll_millis, Interest, Readiness, SocketManager};
use crate::error::{errno, Result, SocketError};
use crate::socket::{EventFlags, SocketEvent, SocketHandle, SocketId};

/// An external event loop that can watch descriptors.
///
/// `LoopManager` keeps at most one registration per descriptor and calls
/// `register` again whenever the wanted interest changes.
pub trait HostLoop {
	/// Watches `fd` for `interest`, replacing any earlier registration.
	fn register(&self, fd: RawFd, interest: Interest) -> Result<()>;

	/// Stops watching `fd`. Unknown descriptors are ignored.
	fn unregister(&self, fd: RawFd);

	/// Blocks until a registered descriptor is ready, `wake()` is called,
	/// or `timeout` expires.
	fn wait(&self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Readiness)>>;

	/// Makes a current or the next `wait()` return early.
	fn wake(&self);
}

struct LoopWatch {
	handle: SocketHandle,
	installed: EventFlags,
	suspended: bool,
	registered: Option<RawFd>,
}

/// Manager that delegates descriptor watching to a `HostLoop`.
pub struct LoopManager<H: HostLoop> {
	host: H,
	watches: RefCell<HashMap<SocketId, LoopWatch>>,
	by_fd: RefCell<HashMap<RawFd, SocketId>>,
}

impl<H: HostLoop> LoopManager<H> {
	pub fn new(host: H) -> Self {
		Self {
			host,
			watches: RefCell::new(HashMap::new()),
			by_fd: RefCell::new(HashMap::new()),
		}
	}

	pub fn host(&self) -> &H {
		&self.host
	}

	/// Brings the host registration of socket `id` in line with its
	/// installed events, state and descriptor.
	fn sync(&self, id: SocketId) {
		let mut watches = self.watches.borrow_mut();
		let Some(watch) = watches.get_mut(&id) else {
			return;
		};
		let fd = watch.handle.fd();
		let interest = if watch.suspended || watch.installed.is_empty() {
			Interest::NONE
		} else {
			watch.handle.interest(watch.installed)
		};

		if let Some(old) = watch.registered
			&& (fd != Some(old) || interest.is_empty())
		{
			self.host.unregister(old);
			self.by_fd.borrow_mut().remove(&old);
			watch.registered = None;
			trace!(socket = %id, fd = old, "unregistered");
		}

		if let Some(fd) = fd
			&& !interest.is_empty()
		{
			match self.host.register(fd, interest) {
				Ok(()) => {
					watch.registered = Some(fd);
					self.by_fd.borrow_mut().insert(fd, id);
					trace!(socket = %id, fd, ?interest, "registered");
				}
				Err(err) => warn!(socket = %id, fd, error = %err, "host loop refused registration"),
			}
		}
	}

	fn forget(&self, id: SocketId) {
		if let Some(watch) = self.watches.borrow_mut().remove(&id)
			&& let Some(fd) = watch.registered
		{
			self.host.unregister(fd);
			self.by_fd.borrow_mut().remove(&fd);
		}
	}

	/// Delivers host readiness for `fd`. Returns the number of callback
	/// invocations.
	pub fn dispatch(&self, fd: RawFd, readiness: Readiness) -> usize {
		let Some(id) = self.by_fd.borrow().get(&fd).copied() else {
			trace!(fd, "readiness for unregistered descriptor");
			return 0;
		};
		self.dispatch_socket(id, fd, readiness)
	}

	/// Delivers readiness that the host reported for `fd` while it belonged
	/// to socket `id`. Nothing happens if the socket has since let go of it.
	fn dispatch_socket(&self, id: SocketId, fd: RawFd, readiness: Readiness) -> usize {
		let handle = match self.watches.borrow().get(&id) {
			Some(watch) if watch.registered == Some(fd) => watch.handle.clone(),
			_ => {
				trace!(socket = %id, fd, "stale readiness dropped");
				return 0;
			}
		};
		let fired = handle.dispatch(readiness);
		self.sync(id);
		fired
	}

	/// Waits on the host loop once and dispatches the result.
	pub fn run_once(&self, timeout: Option<Duration>) -> Result<usize> {
		let ready = self.host.wait(timeout)?;
		// owners are resolved up front: a callback may close a socket and a
		// new one may get the same descriptor within this batch
		let owned: Vec<(SocketId, RawFd, Readiness)> = {
			let by_fd = self.by_fd.borrow();
			ready
				.into_iter()
				.filter_map(|(fd, readiness)| by_fd.get(&fd).map(|&id| (id, fd, readiness)))
				.collect()
		};
		Ok(owned.into_iter().map(|(id, fd, readiness)| self.dispatch_socket(id, fd, readiness)).sum())
	}

	fn update<F: FnOnce(&mut LoopWatch)>(&self, socket: &SocketHandle, f: F) {
		{
			let mut watches = self.watches.borrow_mut();
			let Some(watch) = watches.get_mut(&socket.id()) else {
				debug!(socket = %socket.id(), "event change for unknown socket");
				return;
			};
			f(watch);
		}
		self.sync(socket.id());
	}
}

impl<H: HostLoop> SocketManager for LoopManager<H> {
	fn on_init(&self) -> Result<()> {
		debug!("loop manager initialized");
		Ok(())
	}

	fn on_exit(&self) {
		let ids: Vec<SocketId> = self.watches.borrow().keys().copied().collect();
		for id in ids {
			self.forget(id);
		}
		debug!("loop manager shut down");
	}

	fn init_socket(&self, socket: &SocketHandle) -> Result<()> {
		self.watches.borrow_mut().insert(
			socket.id(),
			LoopWatch {
				handle: socket.clone(),
				installed: EventFlags::empty(),
				suspended: false,
				registered: None,
			},
		);
		Ok(())
	}

	fn destroy_socket(&self, socket: &SocketHandle) {
		self.forget(socket.id());
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

/// A minimal `HostLoop` on `poll(2)`, with a self-pipe for `wake()`.
pub struct PollLoop {
	registrations: RefCell<BTreeMap<RawFd, Interest>>,
	wake_rx: OwnedFd,
	wake_tx: OwnedFd,
}

impl PollLoop {
	pub fn new() -> Result<Self> {
		let mut fds = [0; 2];
		if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } == -1 {
			return Err(SocketError::ManagerInit { reason: format!("wake pipe: errno {}", errno()) });
		}
		let (wake_rx, wake_tx) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
		Ok(Self { registrations: RefCell::new(BTreeMap::new()), wake_rx, wake_tx })
	}

	/// Number of registered descriptors.
	pub fn registered(&self) -> usize {
		self.registrations.borrow().len()
	}

	/// Interest registered for `fd`.
	pub fn interest(&self, fd: RawFd) -> Option<Interest> {
		self.registrations.borrow().get(&fd).copied()
	}

	fn drain_wake(&self) {
		let mut buf = [0u8; 64];
		loop {
			let n = unsafe {
				libc::read(self.wake_rx.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
			};
			if n <= 0 {
				break;
			}
		}
	}
}

impl HostLoop for PollLoop {
	fn register(&self, fd: RawFd, interest: Interest) -> Result<()> {
		if fd < 0 {
			return Err(SocketError::InvalidSocket { reason: "negative descriptor" });
		}
		self.registrations.borrow_mut().insert(fd, interest);
		Ok(())
	}

	fn unregister(&self, fd: RawFd) {
		self.registrations.borrow_mut().remove(&fd);
	}

	fn wait(&self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Readiness)>> {
		let mut pollfds = vec![libc::pollfd { fd: self.wake_rx.as_raw_fd(), events: libc::POLLIN, revents: 0 }];
		pollfds.extend(
			self.registrations
				.borrow()
				.iter()
				.map(|(&fd, interest)| libc::pollfd { fd, events: interest.poll_events(), revents: 0 }),
		);

		let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, poll_millis(timeout)) };
		if rc == -1 {
			let errno = errno();
			if errno == libc::EINTR {
				return Ok(Vec::new());
			}
			return Err(SocketError::Poll { op: "poll", errno });
		}

		if pollfds[0].revents != 0 {
			self.drain_wake();
			trace!("poll loop woken");
		}
		Ok(pollfds[1..]
			.iter()
			.filter(|pfd| pfd.revents != 0)
			.map(|pfd| (pfd.fd, Readiness::from_revents(pfd.revents)))
			.collect())
	}

	fn wake(&self) {
		let byte = 1u8;
		// a full pipe already guarantees a wakeup
		unsafe { libc::write(self.wake_tx.as_raw_fd(), &byte as *const u8 as *const libc::c_void, 1) };
	}
}
