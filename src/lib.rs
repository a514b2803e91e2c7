//! Event-driven BSD socket layer.
//!
//! A [`Network`] owns a pluggable [`SocketManager`]; [`Socket`]s created
//! from it report readiness through a single callback per socket, with
//! edge-triggered `Input`, `Output`, `Connection` and `Lost` events.
//! Addresses are family-tagged [`Address`] values (IPv4, IPv6, unix).

mod addr;
mod error;
pub mod manager;
mod network;
pub mod socket;

pub use self::addr::{Address, Family, FromSockAddr, SocketAddrV4, SocketAddrV6, ToSockAddr, UnixAddr};
pub use self::error::{errno, ErrorCode, Result, SocketError};
pub use self::manager::{ConsoleManager, HostLoop, Interest, LoopManager, PollLoop, Readiness, SocketManager};
pub use self::network::Network;
pub use self::socket::{
	BufferConfig, Callback, EventFlags, KeepaliveConfig, ReuseConfig, Shutdown, Socket, SocketConfig,
	SocketEvent, SocketHandle, SocketId, SocketKind, SocketState, TcpConfig,
};
pub use self::socket::{
	set_broadcast, set_keepalive, set_keepalive_count, set_keepalive_idle, set_keepalive_interval,
	set_linger, set_recv_buffer_size, set_reuse_addr, set_reuse_port, set_send_buffer_size,
	set_tcp_nodelay,
};
