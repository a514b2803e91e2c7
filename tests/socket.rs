mod common;

use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::rc::Rc;
use std::time::Duration;

use common::{connected_pair, listener, loopback, recorder};
use socklane::{
	Address, BufferConfig, ConsoleManager, ErrorCode, EventFlags, Network, Socket, SocketConfig, SocketEvent,
	SocketKind, SocketState, TcpConfig,
};

#[test]
fn loopback_exchange_then_lost_and_eof() {
	let manager = Rc::new(ConsoleManager::new());
	let network = Network::init(manager.clone()).unwrap();
	let (server, client, accepted) = connected_pair(&network);

	assert_eq!(server.state(), SocketState::Listening);
	assert_eq!(client.state(), SocketState::Connected);
	assert_eq!(accepted.state(), SocketState::Connected);
	assert_eq!(accepted.peer().unwrap().inet_port().unwrap(), client.local().unwrap().inet_port().unwrap());

	let mut buf = [0u8; 16];
	assert_eq!(client.send(b"ping").unwrap(), 4);
	assert_eq!(accepted.receive(&mut buf).unwrap(), 4);
	assert_eq!(&buf[..4], b"ping");

	assert_eq!(accepted.send(b"pong!").unwrap(), 5);
	assert_eq!(client.receive(&mut buf).unwrap(), 5);
	assert_eq!(&buf[..5], b"pong!");

	let (log, callback) = recorder();
	client.set_callback(EventFlags::INPUT | EventFlags::LOST, callback);

	accepted.close();
	assert_eq!(accepted.state(), SocketState::Closed);

	let fired = manager.wait(Some(common::WAIT)).unwrap();
	assert_eq!(fired, 1);
	assert_eq!(*log.borrow(), vec![SocketEvent::Lost]);

	// Lost disarms everything, so nothing is watched any more
	assert_eq!(manager.watched(), 0);

	// the socket stays open; reads report EOF
	assert_eq!(client.state(), SocketState::Connected);
	assert_eq!(client.receive(&mut buf).unwrap(), 0);
}

#[test]
fn nonblocking_receive_without_data() {
	let network = Network::init_default().unwrap();
	let (_server, client, _accepted) = connected_pair(&network);
	client.set_nonblocking(true);

	let mut buf = [7u8; 8];
	let err = client.receive(&mut buf).unwrap_err();
	assert_eq!(err.code(), ErrorCode::WouldBlock);
	assert_eq!(buf, [7u8; 8]);
	assert_eq!(client.last_error(), ErrorCode::WouldBlock);
	assert_eq!(client.state(), SocketState::Connected);
}

#[test]
fn blocking_receive_times_out() {
	let network = Network::init_default().unwrap();
	let (_server, client, _accepted) = connected_pair(&network);
	client.set_timeout(Some(Duration::from_millis(30)));

	let mut buf = [0u8; 8];
	assert_eq!(client.receive(&mut buf).unwrap_err().code(), ErrorCode::TimedOut);
	assert_eq!(client.state(), SocketState::Connected);
}

#[test]
fn blocking_send_with_zero_timeout_on_full_socket() {
	let network = Network::init_default().unwrap();
	let (server, port) = listener(&network);
	let small = SocketConfig::new().buffers(BufferConfig::new().both(4096));
	let client = network.socket_with(SocketKind::Stream, small).unwrap();
	client.set_timeout(Some(common::WAIT));
	client.connect(&loopback(port)).unwrap();
	let _accepted = server.accept().unwrap();

	client.set_nonblocking(true);
	let chunk = [0u8; 16 * 1024];
	let mut total = 0;
	loop {
		match client.send(&chunk) {
			Ok(n) => total += n,
			Err(err) => {
				assert_eq!(err.code(), ErrorCode::WouldBlock);
				break;
			}
		}
	}
	assert!(total > 0);

	client.set_nonblocking(false);
	client.set_timeout(Some(Duration::ZERO));
	let err = client.send(&chunk).unwrap_err();
	assert_eq!(err.code(), ErrorCode::TimedOut);
	assert_eq!(client.state(), SocketState::Connected);
}

#[test]
fn closed_socket_rejects_io() {
	let network = Network::init_default().unwrap();
	let (_server, client, _accepted) = connected_pair(&network);
	client.close();
	client.close();

	assert_eq!(client.state(), SocketState::Closed);
	assert!(client.raw_fd().is_none());
	assert_eq!(client.send(b"x").unwrap_err().code(), ErrorCode::InvalidSocket);
	assert_eq!(client.receive(&mut [0u8; 4]).unwrap_err().code(), ErrorCode::InvalidSocket);
	assert_eq!(client.bind(&loopback(0)).unwrap_err().code(), ErrorCode::InvalidSocket);
	assert_eq!(client.last_error(), ErrorCode::InvalidSocket);
}

#[test]
fn fresh_socket_state() {
	let network = Network::init_default().unwrap();
	let socket = network.socket(SocketKind::Stream).unwrap();
	assert_eq!(socket.state(), SocketState::Unallocated);
	assert_eq!(socket.last_error(), ErrorCode::NoError);
	assert!(socket.raw_fd().is_none());
	assert_eq!(socket.timeout(), Some(SocketConfig::DEFAULT_TIMEOUT));
	assert_eq!(socket.receive(&mut [0u8; 4]).unwrap_err().code(), ErrorCode::InvalidSocket);
}

#[test]
fn listen_preconditions() {
	let network = Network::init_default().unwrap();
	let unbound = network.socket(SocketKind::Stream).unwrap();
	assert_eq!(unbound.listen(5).unwrap_err().code(), ErrorCode::InvalidSocket);

	let datagram = network.socket(SocketKind::Datagram).unwrap();
	datagram.bind(&loopback(0)).unwrap();
	assert_eq!(datagram.listen(5).unwrap_err().code(), ErrorCode::InvalidOperation);

	let incomplete = network.socket(SocketKind::Stream).unwrap();
	assert_eq!(incomplete.bind(&Address::new()).unwrap_err().code(), ErrorCode::InvalidAddress);
	assert_eq!(incomplete.state(), SocketState::Unallocated);
}

#[test]
fn bind_conflict_leaves_socket_reusable() {
	let network = Network::init_default().unwrap();
	let (_server, port) = listener(&network);

	let other = network.socket(SocketKind::Stream).unwrap();
	let err = other.bind(&loopback(port)).unwrap_err();
	assert_eq!(err.code(), ErrorCode::InvalidAddress);
	assert_eq!(other.state(), SocketState::Unallocated);
	assert!(other.raw_fd().is_none());

	other.bind(&loopback(0)).unwrap();
	assert_eq!(other.state(), SocketState::Bound);
}

#[test]
fn refused_connect_closes() {
	let network = Network::init_default().unwrap();
	let port = {
		let probe = network.socket(SocketKind::Stream).unwrap();
		probe.bind(&loopback(0)).unwrap();
		probe.local().unwrap().inet_port().unwrap()
	};

	let client = network.socket(SocketKind::Stream).unwrap();
	client.set_timeout(Some(common::WAIT));
	let err = client.connect(&loopback(port)).unwrap_err();
	assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
	assert_eq!(err.code(), ErrorCode::Io);
	assert_eq!(client.state(), SocketState::Closed);
}

/// Connects a client that resets the connection when dropped.
fn resetting_pair(network: &Network) -> (Socket, Socket, Socket) {
	let (server, port) = listener(network);
	let config = SocketConfig::new()
		.timeout(Some(common::WAIT))
		.tcp(TcpConfig::new().linger(Some(0)));
	let client = network.socket_with(SocketKind::Stream, config).unwrap();
	client.connect(&loopback(port)).unwrap();
	let accepted = server.accept().unwrap();
	accepted.set_timeout(Some(common::WAIT));
	(server, client, accepted)
}

#[test]
fn reset_by_peer_closes_on_receive() {
	let network = Network::init_default().unwrap();
	let (_server, client, accepted) = resetting_pair(&network);
	drop(client);

	let mut buf = [0u8; 8];
	let err = accepted.receive(&mut buf).unwrap_err();
	assert_eq!(err.raw_os_error(), Some(libc::ECONNRESET));
	assert_eq!(err.code(), ErrorCode::Io);
	assert_eq!(accepted.state(), SocketState::Closed);
	assert_eq!(accepted.last_error(), ErrorCode::Io);
	assert_eq!(accepted.receive(&mut buf).unwrap_err().code(), ErrorCode::InvalidSocket);
}

#[test]
fn reset_by_peer_closes_on_send() {
	let network = Network::init_default().unwrap();
	let (_server, client, accepted) = resetting_pair(&network);
	drop(client);
	std::thread::sleep(Duration::from_millis(50));

	let err = accepted.send(b"after reset").unwrap_err();
	assert!(matches!(err.raw_os_error(), Some(libc::ECONNRESET | libc::EPIPE)));
	assert_eq!(err.code(), ErrorCode::Io);
	assert_eq!(accepted.state(), SocketState::Closed);
	assert_eq!(accepted.send(b"x").unwrap_err().code(), ErrorCode::InvalidSocket);
}

#[test]
fn nonblocking_accept_without_pending_connection() {
	let network = Network::init_default().unwrap();
	let (server, _port) = listener(&network);
	server.set_nonblocking(true);
	assert_eq!(server.accept().unwrap_err().code(), ErrorCode::WouldBlock);
	assert_eq!(server.state(), SocketState::Listening);
}

#[test]
fn connect_binds_stored_local_address() {
	let network = Network::init_default().unwrap();
	let (server, port) = listener(&network);

	let client = network.socket(SocketKind::Stream).unwrap();
	client.set_local(&loopback(0)).unwrap();
	client.set_timeout(Some(common::WAIT));
	client.connect(&loopback(port)).unwrap();
	let accepted = server.accept().unwrap();

	let local = client.local().unwrap();
	assert_eq!(local.inet_host_address().unwrap(), 0x7f00_0001);
	assert_eq!(accepted.peer().unwrap(), local);
}

#[test]
fn unix_stream_in_temp_dir() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("socklane.sock");
	let addr = Address::unix(path.as_os_str().as_bytes());

	let network = Network::init_default().unwrap();
	let server = network.socket(SocketKind::Stream).unwrap();
	server.set_timeout(Some(common::WAIT));
	server.set_server(&addr).unwrap();
	assert!(path.exists());

	let mut client = network.socket(SocketKind::Stream).unwrap();
	client.set_timeout(Some(common::WAIT));
	client.connect(&addr).unwrap();
	let mut accepted = server.accept().unwrap();
	accepted.set_timeout(Some(common::WAIT));

	client.write_all(b"over unix").unwrap();
	let mut buf = [0u8; 9];
	accepted.read_exact(&mut buf).unwrap();
	assert_eq!(&buf, b"over unix");

	let mut path_buf = [0u8; 256];
	let n = server.local().unwrap().unix_path(&mut path_buf).unwrap();
	assert_eq!(&path_buf[..n], path.as_os_str().as_bytes());
}

#[test]
fn unix_datagram_from_unbound_sender() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("socklane.dgram");
	let addr = Address::unix(path.as_os_str().as_bytes());

	let network = Network::init_default().unwrap();
	let rx = network.socket(SocketKind::Datagram).unwrap();
	rx.set_timeout(Some(common::WAIT));
	rx.set_non_oriented(&addr).unwrap();

	let tx = network.socket(SocketKind::Datagram).unwrap();
	tx.send_to(b"ping", &addr).unwrap();
	tx.send_to(b"pong", &addr).unwrap();

	let mut buf = [0u8; 8];
	let (n, from) = rx.receive_from(&mut buf).unwrap();
	assert_eq!(&buf[..n], b"ping");
	assert!(from.unix_addr().unwrap().is_unnamed());

	// the unnamed sender cannot be replied to, so it is not kept as peer
	assert_eq!(rx.send(b"reply").unwrap_err().code(), ErrorCode::InvalidAddress);
	assert_eq!(rx.receive(&mut buf).unwrap(), 4);
	assert_eq!(&buf[..4], b"pong");
}

#[test]
fn datagram_send_to_and_reply() {
	let network = Network::init_default().unwrap();
	let a = network.socket(SocketKind::Datagram).unwrap();
	a.set_timeout(Some(common::WAIT));
	a.set_non_oriented(&loopback(0)).unwrap();
	let port = a.local().unwrap().inet_port().unwrap();

	let b = network.socket(SocketKind::Datagram).unwrap();
	b.set_timeout(Some(common::WAIT));
	assert_eq!(b.send_to(b"hello", &loopback(port)).unwrap(), 5);
	assert_eq!(b.state(), SocketState::Bound);

	let mut buf = [0u8; 32];
	let (n, from) = a.receive_from(&mut buf).unwrap();
	assert_eq!(&buf[..n], b"hello");
	assert_eq!(from.inet_host_address().unwrap(), 0x7f00_0001);
	assert_eq!(from.inet_port().unwrap(), b.local().unwrap().inet_port().unwrap());

	// the sender became the default peer
	assert_eq!(a.send(b"back").unwrap(), 4);
	assert_eq!(b.receive(&mut buf).unwrap(), 4);
	assert_eq!(&buf[..4], b"back");
}

#[test]
fn datagram_without_peer() {
	let network = Network::init_default().unwrap();
	let socket = network.socket(SocketKind::Datagram).unwrap();
	assert_eq!(socket.send(b"x").unwrap_err().code(), ErrorCode::InvalidAddress);

	let stream = network.socket(SocketKind::Stream).unwrap();
	assert_eq!(stream.set_non_oriented(&loopback(0)).unwrap_err().code(), ErrorCode::InvalidOperation);
}

#[test]
fn connected_datagram() {
	let network = Network::init_default().unwrap();
	let a = network.socket(SocketKind::Datagram).unwrap();
	a.set_timeout(Some(common::WAIT));
	a.bind(&loopback(0)).unwrap();
	let port = a.local().unwrap().inet_port().unwrap();

	let b = network.socket(SocketKind::Datagram).unwrap();
	b.connect(&loopback(port)).unwrap();
	assert_eq!(b.state(), SocketState::Connected);
	b.send(b"conn").unwrap();

	let mut buf = [0u8; 8];
	assert_eq!(a.receive(&mut buf).unwrap(), 4);
}

#[test]
fn options_roundtrip() {
	let network = Network::init_default().unwrap();
	let socket = network.socket(SocketKind::Datagram).unwrap();
	socket.set_broadcast(true).unwrap();
	assert!(socket.config().broadcast);
	assert_eq!(socket.option(libc::SOL_SOCKET, libc::SO_BROADCAST).unwrap_err().code(), ErrorCode::InvalidSocket);

	socket.bind(&loopback(0)).unwrap();
	assert_ne!(socket.option(libc::SOL_SOCKET, libc::SO_BROADCAST).unwrap(), 0);
	socket.set_option(libc::SOL_SOCKET, libc::SO_BROADCAST, 0).unwrap();
	assert_eq!(socket.option(libc::SOL_SOCKET, libc::SO_BROADCAST).unwrap(), 0);

	let err = socket.set_option(libc::SOL_SOCKET, -4242, 1).unwrap_err();
	assert_eq!(err.code(), ErrorCode::InvalidOption);
	assert_eq!(socket.last_error(), ErrorCode::InvalidOption);
}
