use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use tracing::trace;

use super::{Socket, SocketKind, SocketState};
use crate::error::{errno, Result, SocketError};
use crate::manager::{Interest, Readiness};

/// Readiness event delivered to a socket's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEvent {
	/// Data is available to read.
	Input = 0,
	/// Buffer space is available to write, or a connect completed.
	Output = 1,
	/// A connection is pending on a listener, or a connect completed.
	Connection = 2,
	/// The peer disconnected or the connection failed.
	Lost = 3,
}

impl SocketEvent {
	pub const ALL: [SocketEvent; 4] = [
		SocketEvent::Input,
		SocketEvent::Output,
		SocketEvent::Connection,
		SocketEvent::Lost,
	];

	pub fn flag(self) -> EventFlags {
		EventFlags(1 << self as u8)
	}
}

/// Set of `SocketEvent`s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventFlags(u8);

impl EventFlags {
	pub const INPUT: EventFlags = EventFlags(1 << SocketEvent::Input as u8);
	pub const OUTPUT: EventFlags = EventFlags(1 << SocketEvent::Output as u8);
	pub const CONNECTION: EventFlags = EventFlags(1 << SocketEvent::Connection as u8);
	pub const LOST: EventFlags = EventFlags(1 << SocketEvent::Lost as u8);
	pub const ALL: EventFlags = EventFlags(0b1111);

	pub const fn empty() -> Self {
		EventFlags(0)
	}

	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub fn contains(self, event: SocketEvent) -> bool {
		self.0 & event.flag().0 != 0
	}

	pub fn intersects(self, other: EventFlags) -> bool {
		self.0 & other.0 != 0
	}

	/// Members in `SocketEvent::ALL` order.
	pub fn iter(self) -> impl Iterator<Item = SocketEvent> {
		SocketEvent::ALL.into_iter().filter(move |ev| self.contains(*ev))
	}
}

impl From<SocketEvent> for EventFlags {
	fn from(event: SocketEvent) -> Self {
		event.flag()
	}
}

impl BitOr for EventFlags {
	type Output = EventFlags;
	fn bitor(self, rhs: Self) -> Self {
		EventFlags(self.0 | rhs.0)
	}
}

impl BitOrAssign for EventFlags {
	fn bitor_assign(&mut self, rhs: Self) {
		self.0 |= rhs.0;
	}
}

impl BitAnd for EventFlags {
	type Output = EventFlags;
	fn bitand(self, rhs: Self) -> Self {
		EventFlags(self.0 & rhs.0)
	}
}

impl Not for EventFlags {
	type Output = EventFlags;
	fn not(self) -> Self {
		EventFlags(!self.0 & EventFlags::ALL.0)
	}
}

impl fmt::Debug for EventFlags {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.iter()).finish()
	}
}

/// The per-socket callback. It runs synchronously inside the manager's
/// dispatch and must not block.
pub type Callback = Box<dyn FnMut(&Socket, SocketEvent)>;

/// A completed connect reports `Connection` before `Output`; `Lost` is last.
const DISPATCH_ORDER: [SocketEvent; 4] = [
	SocketEvent::Connection,
	SocketEvent::Input,
	SocketEvent::Output,
	SocketEvent::Lost,
];

/// Callback slot plus the two masks that decide delivery.
///
/// - `enabled`: what the user asked for.
/// - `armed`: cleared when an event fires, set again by the operation that
///   consumes it (receive → Input, send → Output, accept → Connection).
///
/// An event is live when both bits are set; only live events are watched.
pub(crate) struct EventState {
	enabled: Cell<EventFlags>,
	armed: Cell<EventFlags>,
	callback: RefCell<Option<Callback>>,
	// bumped on every set/unset so a running callback can replace itself
	epoch: Cell<u64>,
}

impl EventState {
	pub(crate) fn new() -> Self {
		Self {
			enabled: Cell::new(EventFlags::empty()),
			armed: Cell::new(EventFlags::ALL),
			callback: RefCell::new(None),
			epoch: Cell::new(0),
		}
	}

	fn live(&self) -> EventFlags {
		self.enabled.get() & self.armed.get()
	}
}

impl Socket {
	/// Registers the socket's single callback and enables `events` for it.
	///
	/// Replaces any previous callback; events enabled earlier stay enabled.
	pub fn set_callback<F>(&self, events: EventFlags, callback: F)
	where
		F: FnMut(&Socket, SocketEvent) + 'static,
	{
		let state = &self.core.events;
		*state.callback.borrow_mut() = Some(Box::new(callback));
		state.epoch.set(state.epoch.get() + 1);
		self.update_events(|enabled, armed| (enabled | events, armed | events));
	}

	/// Disables `events`. The callback itself is dropped once no event is
	/// left enabled.
	pub fn unset_callback(&self, events: EventFlags) {
		self.update_events(|enabled, armed| (enabled & !events, armed));
		let state = &self.core.events;
		if state.enabled.get().is_empty() {
			state.callback.borrow_mut().take();
			state.epoch.set(state.epoch.get() + 1);
		}
	}

	/// Makes `event` live again.
	pub fn enable(&self, event: SocketEvent) {
		self.update_events(|enabled, armed| (enabled | event.flag(), armed | event.flag()));
	}

	/// Makes `event` inert. The callback is never invoked for it until it
	/// is enabled again.
	pub fn disable(&self, event: SocketEvent) {
		self.update_events(|enabled, armed| (enabled & !event.flag(), armed));
	}

	/// Events currently enabled by the user.
	pub fn enabled_events(&self) -> EventFlags {
		self.core.events.enabled.get()
	}

	/// Asks the manager to stop watching this socket entirely, e.g. while a
	/// previous event is still being processed.
	pub fn suspend_events(&self) {
		self.core.network.manager.disable_events(&self.handle());
	}

	/// Undoes `suspend_events()`.
	pub fn resume_events(&self) {
		self.core.network.manager.enable_events(&self.handle());
	}

	/// Applies a change to the masks and tells the manager which watches
	/// appeared or disappeared.
	fn update_events<F>(&self, f: F)
	where
		F: FnOnce(EventFlags, EventFlags) -> (EventFlags, EventFlags),
	{
		let state = &self.core.events;
		let before = state.live();
		let (enabled, armed) = f(state.enabled.get(), state.armed.get());
		state.enabled.set(enabled);
		state.armed.set(armed);
		let after = state.live();

		if before == after {
			return;
		}
		let manager = &self.core.network.manager;
		let handle = self.handle();
		for event in (before & !after).iter() {
			manager.uninstall_callback(&handle, event);
		}
		for event in (after & !before).iter() {
			manager.install_callback(&handle, event);
		}
	}

	pub(crate) fn rearm(&self, events: EventFlags) {
		self.update_events(|enabled, armed| (enabled, armed | events));
	}

	fn disarm(&self, events: EventFlags) {
		self.update_events(|enabled, armed| (enabled, armed & !events));
	}

	/// Re-announces every live watch, after a descriptor appeared.
	pub(crate) fn resync_watches(&self) {
		let manager = &self.core.network.manager;
		let handle = self.handle();
		for event in self.core.events.live().iter() {
			manager.install_callback(&handle, event);
		}
	}

	/// Withdraws every live watch, before the descriptor goes away.
	pub(crate) fn uninstall_watches(&self) {
		if self.raw_fd().is_none() {
			return;
		}
		let manager = &self.core.network.manager;
		let handle = self.handle();
		for event in self.core.events.live().iter() {
			manager.uninstall_callback(&handle, event);
		}
	}

	/// Read/write interest needed to detect `installed` in the current state.
	///
	/// Only events that can still fire ask for readiness: a level-triggered
	/// condition nobody would consume must not keep waking the manager.
	pub(crate) fn interest(&self, installed: EventFlags) -> Interest {
		match self.state() {
			// completion is checked on any watch, so later events can follow
			SocketState::Connecting => Interest {
				writable: !installed.is_empty(),
				..Interest::NONE
			},
			SocketState::Listening => Interest {
				readable: installed.contains(SocketEvent::Connection),
				..Interest::NONE
			},
			SocketState::Bound | SocketState::Connected => Interest {
				readable: installed.contains(SocketEvent::Input),
				writable: installed.contains(SocketEvent::Output),
				hangup: installed.contains(SocketEvent::Lost) && self.core.kind == SocketKind::Stream,
			},
			SocketState::Unallocated | SocketState::Closed => Interest::NONE,
		}
	}

	/// Turns raw readiness into the conditions it means for this socket.
	///
	/// A connect in flight is resolved here: on success the state moves to
	/// `Connected` and both `Connection` and `Output` are reported.
	pub(crate) fn detect(&self, readiness: Readiness) -> EventFlags {
		let Some(fd) = self.raw_fd() else {
			return EventFlags::empty();
		};
		let mut found = EventFlags::empty();

		if self.state() == SocketState::Connecting {
			if readiness.writable || readiness.error || readiness.hangup {
				match super::pending::take_error(fd) {
					Ok(None) => {
						self.set_state(SocketState::Connected);
						found |= EventFlags::CONNECTION | EventFlags::OUTPUT;
					}
					Ok(Some(errno)) => {
						self.core.error.set(SocketError::Connect { errno, addr: String::new() }.code());
						found |= EventFlags::LOST;
					}
					Err(err) => {
						self.core.error.set(err.code());
						found |= EventFlags::LOST;
					}
				}
			}
			return found;
		}

		if readiness.writable && matches!(self.state(), SocketState::Connected | SocketState::Bound) {
			found |= EventFlags::OUTPUT;
		}

		if readiness.readable || readiness.error || readiness.hangup {
			match (self.state(), self.core.kind) {
				(SocketState::Listening, _) => found |= EventFlags::CONNECTION,
				(SocketState::Connected, SocketKind::Stream) => match peek(fd) {
					Ok(0) => found |= EventFlags::LOST,
					Ok(_) => {
						found |= EventFlags::INPUT;
						// with Input disarmed, unread data must not hide a hangup
						let input_live = self.core.events.live().contains(SocketEvent::Input);
						if (readiness.hangup || readiness.error) && !input_live {
							found |= EventFlags::LOST;
						}
					}
					Err(SocketError::WouldBlock) => {}
					Err(_) => found |= EventFlags::LOST,
				},
				(SocketState::Connected | SocketState::Bound, SocketKind::Datagram) => {
					found |= EventFlags::INPUT
				}
				_ => {}
			}
		}
		found
	}

	/// Fires every live event in `readiness`. Returns the number of
	/// callback invocations.
	pub(crate) fn dispatch(&self, readiness: Readiness) -> usize {
		let detected = self.detect(readiness);
		if detected.is_empty() {
			return 0;
		}
		trace!(socket = %self.core.id, ?detected, "conditions detected");

		let mut fired = 0;
		for event in DISPATCH_ORDER.into_iter().filter(|ev| detected.contains(*ev)) {
			let live = self.core.events.live();
			if event == SocketEvent::Lost {
				// nothing more will arrive on this connection
				self.disarm(EventFlags::ALL);
			} else {
				self.disarm(event.flag());
			}
			if live.contains(event) && self.invoke(event) {
				fired += 1;
			}
			if event == SocketEvent::Lost || self.state() == SocketState::Closed {
				break;
			}
		}
		fired
	}

	fn invoke(&self, event: SocketEvent) -> bool {
		let state = &self.core.events;
		let Some(mut callback) = state.callback.borrow_mut().take() else {
			return false;
		};
		let epoch = state.epoch.get();
		trace!(socket = %self.core.id, ?event, "invoking callback");
		callback(self, event);
		// keep the callback unless it was replaced or removed from inside
		if state.epoch.get() == epoch {
			*state.callback.borrow_mut() = Some(callback);
		}
		true
	}

	/// Reports which of `events` are detectable right now, without waiting
	/// and without invoking the callback.
	pub fn select(&self, events: EventFlags) -> Result<EventFlags> {
		self.track(self.select_inner(events))
	}

	fn select_inner(&self, events: EventFlags) -> Result<EventFlags> {
		self.ensure_open()?;
		let Some(fd) = self.raw_fd() else {
			return Ok(EventFlags::empty());
		};
		let interest = self.interest(events);
		let mut pfd = libc::pollfd { fd, events: interest.poll_events(), revents: 0 };
		let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
		if rc == -1 {
			return Err(SocketError::Poll { op: "poll", errno: errno() });
		}
		Ok(self.detect(Readiness::from_revents(pfd.revents)) & events)
	}
}

/// Peeks one byte: `Ok(0)` means orderly shutdown by the peer.
fn peek(fd: libc::c_int) -> Result<usize> {
	let mut byte = [0u8; 1];
	let n = unsafe {
		libc::recv(
			fd,
			byte.as_mut_ptr() as *mut libc::c_void,
			1,
			libc::MSG_PEEK | libc::MSG_DONTWAIT,
		)
	};
	if n == -1 {
		let errno = errno();
		return Err(if errno == libc::EAGAIN { SocketError::WouldBlock } else { SocketError::Read { errno } });
	}
	Ok(n as usize)
}
