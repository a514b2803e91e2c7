mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use common::{connected_pair, listener, loopback, recorder, WAIT};
use socklane::{
	ConsoleManager, ErrorCode, EventFlags, HostLoop, LoopManager, Network, PollLoop, Result, Socket, SocketConfig,
	SocketEvent, SocketHandle, SocketKind, SocketManager, SocketState,
};

const SHORT: Duration = Duration::from_millis(50);

fn console() -> (Rc<ConsoleManager>, Network) {
	let manager = Rc::new(ConsoleManager::new());
	let network = Network::init(manager.clone()).unwrap();
	(manager, network)
}

#[test]
fn input_only_never_sees_output_or_lost() {
	let (manager, network) = console();
	let (_server, client, accepted) = connected_pair(&network);
	let (log, callback) = recorder();
	accepted.set_callback(EventFlags::INPUT, callback);
	assert_eq!(manager.installed(accepted.id()), Some(EventFlags::INPUT));

	client.send(b"data").unwrap();
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);
	let mut buf = [0u8; 8];
	assert_eq!(accepted.receive(&mut buf).unwrap(), 4);

	drop(client);
	// the peer hangup is detected as Lost, which is not enabled
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 0);
	assert_eq!(manager.wait(Some(SHORT)).unwrap(), 0);
	assert_eq!(*log.borrow(), vec![SocketEvent::Input]);
}

#[test]
fn edge_triggered_single_delivery() {
	let (manager, network) = console();
	let (_server, client, accepted) = connected_pair(&network);
	let (log, callback) = recorder();
	accepted.set_callback(EventFlags::INPUT, callback);

	client.send(b"a").unwrap();
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);

	// more data arrives, but Input stays disarmed until a receive
	client.send(b"b").unwrap();
	assert_eq!(manager.wait(Some(SHORT)).unwrap(), 0);
	assert_eq!(log.borrow().len(), 1);

	let mut buf = [0u8; 8];
	let mut got = 0;
	while got < 2 {
		got += accepted.receive(&mut buf[got..]).unwrap();
	}
	assert_eq!(&buf[..2], b"ab");

	client.send(b"c").unwrap();
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);
	assert_eq!(*log.borrow(), vec![SocketEvent::Input, SocketEvent::Input]);
}

#[test]
fn wait_honours_timeout_while_input_is_disarmed() {
	let (manager, network) = console();
	let (_server, client, accepted) = connected_pair(&network);
	let (log, callback) = recorder();
	accepted.set_callback(EventFlags::INPUT | EventFlags::LOST, callback);

	client.send(b"x").unwrap();
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);

	// the byte stays unread and nothing can fire until the peer hangs up
	let start = Instant::now();
	assert_eq!(manager.wait(Some(Duration::from_millis(200))).unwrap(), 0);
	assert!(start.elapsed() >= Duration::from_millis(150));
	assert_eq!(*log.borrow(), vec![SocketEvent::Input]);

	drop(client);
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);
	assert_eq!(*log.borrow(), vec![SocketEvent::Input, SocketEvent::Lost]);

	let mut buf = [0u8; 4];
	assert_eq!(accepted.receive(&mut buf).unwrap(), 1);
	assert_eq!(accepted.receive(&mut buf).unwrap(), 0);
}

#[test]
fn explicit_enable_rearms() {
	let (manager, network) = console();
	let (_server, client, accepted) = connected_pair(&network);
	let (log, callback) = recorder();
	accepted.set_callback(EventFlags::INPUT, callback);

	client.send(b"x").unwrap();
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);
	accepted.enable(SocketEvent::Input);
	// the unread byte is reported again
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);
	assert_eq!(log.borrow().len(), 2);

	accepted.disable(SocketEvent::Input);
	assert_eq!(manager.installed(accepted.id()), Some(EventFlags::empty()));
	assert_eq!(manager.wait(Some(SHORT)).unwrap(), 0);
}

#[test]
fn nonblocking_connect_completes_through_events() {
	let (manager, network) = console();
	let (server, port) = listener(&network);

	let client = network.socket_with(SocketKind::Stream, SocketConfig::new().nonblocking(true)).unwrap();
	let (log, callback) = recorder();
	client.set_callback(EventFlags::CONNECTION | EventFlags::OUTPUT | EventFlags::LOST, callback);

	match client.connect(&loopback(port)) {
		Err(err) => {
			assert_eq!(err.code(), ErrorCode::WouldBlock);
			assert_eq!(client.state(), SocketState::Connecting);
			let deadline = Instant::now() + WAIT;
			while log.borrow().is_empty() && Instant::now() < deadline {
				manager.wait(Some(SHORT)).unwrap();
			}
			assert_eq!(*log.borrow(), vec![SocketEvent::Connection, SocketEvent::Output]);
		}
		// loopback may complete at once; Output then reports writability
		Ok(()) => {
			manager.wait(Some(WAIT)).unwrap();
			assert_eq!(*log.borrow(), vec![SocketEvent::Output]);
		}
	}
	assert_eq!(client.state(), SocketState::Connected);

	server.set_nonblocking(true);
	let accepted = server.accept().unwrap();
	assert_eq!(accepted.state(), SocketState::Connected);
}

#[test]
fn nonblocking_connect_with_only_input_enabled() {
	let (manager, network) = console();
	let (server, port) = listener(&network);

	let client = network.socket_with(SocketKind::Stream, SocketConfig::new().nonblocking(true)).unwrap();
	let (log, callback) = recorder();
	client.set_callback(EventFlags::INPUT, callback);
	if let Err(err) = client.connect(&loopback(port)) {
		assert_eq!(err.code(), ErrorCode::WouldBlock);
	}

	let accepted = server.accept().unwrap();
	accepted.send(b"hello").unwrap();

	let deadline = Instant::now() + WAIT;
	while log.borrow().is_empty() && Instant::now() < deadline {
		manager.wait(Some(SHORT)).unwrap();
	}
	assert_eq!(client.state(), SocketState::Connected);
	assert_eq!(*log.borrow(), vec![SocketEvent::Input]);

	let mut buf = [0u8; 8];
	assert_eq!(client.receive(&mut buf).unwrap(), 5);
	assert_eq!(&buf[..5], b"hello");
}

#[test]
fn nonblocking_connect_refused_reports_lost() {
	let (manager, network) = console();
	let port = {
		let probe = network.socket(SocketKind::Stream).unwrap();
		probe.bind(&loopback(0)).unwrap();
		probe.local().unwrap().inet_port().unwrap()
	};

	let client = network.socket_with(SocketKind::Stream, SocketConfig::new().nonblocking(true)).unwrap();
	let (log, callback) = recorder();
	client.set_callback(EventFlags::CONNECTION | EventFlags::LOST, callback);

	match client.connect(&loopback(port)) {
		Err(err) if err.code() == ErrorCode::WouldBlock => {
			manager.wait(Some(WAIT)).unwrap();
			assert_eq!(*log.borrow(), vec![SocketEvent::Lost]);
			assert_eq!(client.last_error(), ErrorCode::Io);
		}
		Err(err) => {
			assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
			assert_eq!(client.state(), SocketState::Closed);
		}
		Ok(()) => panic!("connect to a closed port succeeded"),
	}
}

#[test]
fn listener_reports_connection() {
	let (manager, network) = console();
	let (server, port) = listener(&network);
	let (log, callback) = recorder();
	server.set_callback(EventFlags::CONNECTION, callback);

	let client = network.socket(SocketKind::Stream).unwrap();
	client.set_timeout(Some(WAIT));
	client.connect(&loopback(port)).unwrap();

	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);
	assert_eq!(*log.borrow(), vec![SocketEvent::Connection]);
	let _accepted = server.accept().unwrap();
	assert_eq!(manager.installed(server.id()), Some(EventFlags::CONNECTION));
}

#[test]
fn callback_can_use_the_socket() {
	let (manager, network) = console();
	let (_server, client, accepted) = connected_pair(&network);
	let received = Rc::new(RefCell::new(Vec::new()));
	let sink = Rc::clone(&received);
	accepted.set_callback(EventFlags::INPUT | EventFlags::LOST, move |socket: &Socket, event| {
		if event == SocketEvent::Input {
			let mut buf = [0u8; 64];
			if let Ok(n) = socket.receive(&mut buf) {
				sink.borrow_mut().extend_from_slice(&buf[..n]);
				socket.send(&buf[..n]).unwrap();
			}
		}
	});

	client.send(b"echo me").unwrap();
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);
	assert_eq!(received.borrow().as_slice(), b"echo me");

	let mut buf = [0u8; 16];
	let n = client.receive(&mut buf).unwrap();
	assert_eq!(&buf[..n], b"echo me");
}

#[test]
fn unset_callback_drops_closure() {
	let (manager, network) = console();
	let socket = network.socket(SocketKind::Datagram).unwrap();
	socket.bind(&loopback(0)).unwrap();

	let token = Rc::new(());
	let held = Rc::clone(&token);
	socket.set_callback(EventFlags::INPUT | EventFlags::OUTPUT, move |_: &Socket, _| {
		let _ = &held;
	});
	assert_eq!(Rc::strong_count(&token), 2);

	socket.unset_callback(EventFlags::OUTPUT);
	assert_eq!(socket.enabled_events(), EventFlags::INPUT);
	assert_eq!(Rc::strong_count(&token), 2);

	socket.unset_callback(EventFlags::INPUT);
	assert!(socket.enabled_events().is_empty());
	assert_eq!(Rc::strong_count(&token), 1);
	assert_eq!(manager.installed(socket.id()), Some(EventFlags::empty()));
}

#[test]
fn suspend_and_resume() {
	let (manager, network) = console();
	let socket = network.socket(SocketKind::Datagram).unwrap();
	socket.bind(&loopback(0)).unwrap();
	let (_log, callback) = recorder();
	socket.set_callback(EventFlags::INPUT, callback);
	assert_eq!(manager.watched(), 1);

	socket.suspend_events();
	assert_eq!(manager.watched(), 0);
	socket.resume_events();
	assert_eq!(manager.watched(), 1);
}

#[test]
fn select_reports_without_callbacks() {
	let (_manager, network) = console();
	let (_server, client, accepted) = connected_pair(&network);
	let (log, callback) = recorder();
	accepted.set_callback(EventFlags::INPUT, callback);

	assert_eq!(accepted.select(EventFlags::INPUT).unwrap(), EventFlags::empty());
	client.send(b"q").unwrap();
	let deadline = Instant::now() + WAIT;
	let mut found = EventFlags::empty();
	while found.is_empty() && Instant::now() < deadline {
		found = accepted.select(EventFlags::INPUT | EventFlags::OUTPUT).unwrap();
	}
	assert!(found.contains(SocketEvent::Input));
	assert!(found.contains(SocketEvent::Output));
	assert!(log.borrow().is_empty());
}

#[test]
fn datagram_input_event() {
	let (manager, network) = console();
	let receiver = network.socket(SocketKind::Datagram).unwrap();
	receiver.set_non_oriented(&loopback(0)).unwrap();
	let port = receiver.local().unwrap().inet_port().unwrap();
	let (log, callback) = recorder();
	receiver.set_callback(EventFlags::INPUT, callback);

	let sender = network.socket(SocketKind::Datagram).unwrap();
	sender.send_to(b"ping", &loopback(port)).unwrap();
	assert_eq!(manager.wait(Some(WAIT)).unwrap(), 1);
	assert_eq!(*log.borrow(), vec![SocketEvent::Input]);
}

#[test]
fn loop_manager_delivers_and_wakes() {
	let manager = Rc::new(LoopManager::new(PollLoop::new().unwrap()));
	let network = Network::init(manager.clone()).unwrap();
	let (server, port) = listener(&network);
	let (log, callback) = recorder();
	server.set_callback(EventFlags::CONNECTION, callback);
	assert_eq!(manager.host().registered(), 1);

	let client = network.socket(SocketKind::Stream).unwrap();
	client.set_timeout(Some(WAIT));
	client.connect(&loopback(port)).unwrap();

	assert_eq!(manager.run_once(Some(WAIT)).unwrap(), 1);
	assert_eq!(*log.borrow(), vec![SocketEvent::Connection]);
	// fired and disarmed: the descriptor is no longer registered
	assert_eq!(manager.host().registered(), 0);

	let accepted = server.accept().unwrap();
	assert_eq!(manager.host().registered(), 1);

	let (input_log, input_callback) = recorder();
	accepted.set_callback(EventFlags::INPUT, input_callback);
	client.send(b"hi").unwrap();
	assert_eq!(manager.run_once(Some(WAIT)).unwrap(), 1);
	assert_eq!(*input_log.borrow(), vec![SocketEvent::Input]);

	manager.host().wake();
	let start = Instant::now();
	assert_eq!(manager.run_once(Some(WAIT)).unwrap(), 0);
	assert!(start.elapsed() < Duration::from_secs(1));

	drop(accepted);
	drop(server);
	assert_eq!(manager.host().registered(), 0);
}

#[test]
fn reused_descriptor_does_not_inherit_readiness() {
	let manager = Rc::new(LoopManager::new(PollLoop::new().unwrap()));
	let network = Network::init(manager.clone()).unwrap();

	let x = network.socket(SocketKind::Datagram).unwrap();
	x.set_non_oriented(&loopback(0)).unwrap();
	let y = network.socket(SocketKind::Datagram).unwrap();
	y.set_non_oriented(&loopback(0)).unwrap();
	// the host reports in descriptor order; the lower one closes the other
	let (first, second) = if x.raw_fd() < y.raw_fd() { (x, y) } else { (y, x) };
	let first_addr = first.local().unwrap();
	let second_addr = second.local().unwrap();

	let (second_log, second_callback) = recorder();
	second.set_callback(EventFlags::INPUT, second_callback);
	let second = Rc::new(RefCell::new(Some(second)));

	let fresh = Rc::new(network.socket(SocketKind::Datagram).unwrap());
	let (fresh_log, fresh_callback) = recorder();
	fresh.set_callback(EventFlags::INPUT, fresh_callback);

	let (first_log, mut first_callback) = recorder();
	let doomed = Rc::clone(&second);
	let replacement = Rc::clone(&fresh);
	first.set_callback(EventFlags::INPUT, move |socket: &Socket, event| {
		first_callback(socket, event);
		drop(doomed.borrow_mut().take());
		// likely lands on the descriptor just released
		replacement.bind(&loopback(0)).unwrap();
	});

	let sender = network.socket(SocketKind::Datagram).unwrap();
	sender.send_to(b"1", &first_addr).unwrap();
	sender.send_to(b"2", &second_addr).unwrap();

	assert_eq!(manager.run_once(Some(WAIT)).unwrap(), 1);
	assert_eq!(*first_log.borrow(), vec![SocketEvent::Input]);
	assert!(second_log.borrow().is_empty());
	assert!(fresh_log.borrow().is_empty());
	assert!(second.borrow().is_none());
}

#[derive(Default)]
struct RecordingManager {
	calls: RefCell<Vec<String>>,
	refuse_sockets: bool,
}

impl SocketManager for RecordingManager {
	fn on_init(&self) -> Result<()> {
		self.calls.borrow_mut().push("on_init".into());
		Ok(())
	}

	fn on_exit(&self) {
		self.calls.borrow_mut().push("on_exit".into());
	}

	fn init_socket(&self, _socket: &SocketHandle) -> Result<()> {
		self.calls.borrow_mut().push("init_socket".into());
		if self.refuse_sockets {
			return Err(socklane::SocketError::ManagerInit { reason: "refused".into() });
		}
		Ok(())
	}

	fn destroy_socket(&self, _socket: &SocketHandle) {
		self.calls.borrow_mut().push("destroy_socket".into());
	}

	fn install_callback(&self, _socket: &SocketHandle, event: SocketEvent) {
		self.calls.borrow_mut().push(format!("install {event:?}"));
	}

	fn uninstall_callback(&self, _socket: &SocketHandle, event: SocketEvent) {
		self.calls.borrow_mut().push(format!("uninstall {event:?}"));
	}

	fn enable_events(&self, _socket: &SocketHandle) {
		self.calls.borrow_mut().push("enable_events".into());
	}

	fn disable_events(&self, _socket: &SocketHandle) {
		self.calls.borrow_mut().push("disable_events".into());
	}
}

#[test]
fn manager_sees_socket_lifecycle() {
	let manager = Rc::new(RecordingManager::default());
	let network = Network::init(manager.clone()).unwrap();

	let socket = network.socket(SocketKind::Stream).unwrap();
	socket.set_callback(EventFlags::INPUT, |_: &Socket, _| {});
	socket.disable(SocketEvent::Input);
	drop(socket);
	network.cleanup();

	assert_eq!(
		*manager.calls.borrow(),
		vec!["on_init", "init_socket", "install Input", "uninstall Input", "destroy_socket", "on_exit"]
	);
}

#[test]
fn cleanup_with_live_socket_still_exits() {
	let manager = Rc::new(RecordingManager::default());
	let network = Network::init(manager.clone()).unwrap();
	let socket = network.socket(SocketKind::Datagram).unwrap();
	assert_eq!(network.live_sockets(), 1);

	network.cleanup();
	assert_eq!(manager.calls.borrow().last().map(String::as_str), Some("on_exit"));
	drop(socket);
	assert_eq!(manager.calls.borrow().last().map(String::as_str), Some("destroy_socket"));
}

#[test]
fn refused_socket_is_not_destroyed() {
	let manager = Rc::new(RecordingManager { refuse_sockets: true, ..Default::default() });
	let network = Network::init(manager.clone()).unwrap();
	let err = network.socket(SocketKind::Stream).unwrap_err();
	assert_eq!(err.code(), ErrorCode::InvalidOperation);
	assert_eq!(network.live_sockets(), 0);
	drop(network);
	assert_eq!(*manager.calls.borrow(), vec!["on_init", "init_socket", "on_exit"]);
}
