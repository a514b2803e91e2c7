#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use socklane::{Address, Network, Socket, SocketEvent, SocketKind};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn loopback(port: u16) -> Address {
	Address::inet([127, 0, 0, 1], port)
}

/// Listener on an OS-assigned loopback port, plus that port.
pub fn listener(network: &Network) -> (Socket, u16) {
	let server = network.socket(SocketKind::Stream).unwrap();
	server.set_timeout(Some(WAIT));
	server.set_server(&loopback(0)).unwrap();
	let port = server.local().unwrap().inet_port().unwrap();
	(server, port)
}

/// Returns (listener, client, accepted), all blocking with a short timeout.
pub fn connected_pair(network: &Network) -> (Socket, Socket, Socket) {
	let (server, port) = listener(network);
	let client = network.socket(SocketKind::Stream).unwrap();
	client.set_timeout(Some(WAIT));
	client.connect(&loopback(port)).unwrap();
	let accepted = server.accept().unwrap();
	accepted.set_timeout(Some(WAIT));
	(server, client, accepted)
}

pub type EventLog = Rc<RefCell<Vec<SocketEvent>>>;

/// Callback that appends every event to the returned log.
pub fn recorder() -> (EventLog, impl FnMut(&Socket, SocketEvent) + 'static) {
	let log: EventLog = Rc::default();
	let sink = Rc::clone(&log);
	(log, move |_: &Socket, event| sink.borrow_mut().push(event))
}
