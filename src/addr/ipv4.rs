use super::{copy_out, resolve, Address, Endpoint, Family, ToSockAddr};
use crate::error::{Result, SocketError};

/// IPv4 socket address (IP + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketAddrV4 {
	ip: [u8; 4],
	port: u16,
}

impl SocketAddrV4 {
	/// Creates a new IPv4 address.
	pub fn new(ip: [u8; 4], port: u16) -> Self {
		Self { ip, port }
	}

	/// Loopback (127.0.0.1) on `port`.
	pub fn localhost(port: u16) -> Self {
		Self { ip: [127, 0, 0, 1], port }
	}

	/// Creates from raw sockaddr_in.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in) -> Self {
		Self {
			ip: raw.sin_addr.s_addr.to_ne_bytes(),
			port: u16::from_be(raw.sin_port),
		}
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 4] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Converts to the raw sockaddr_in for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in {
		libc::sockaddr_in {
			sin_family: libc::AF_INET as libc::sa_family_t,
			sin_port: self.port.to_be(),
			sin_addr: libc::in_addr {
				s_addr: u32::from_be_bytes(self.ip).to_be(),
			},
			sin_zero: [0; 8],
		}
	}
}

impl ToSockAddr for SocketAddrV4 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		// sockaddr_in has to outlive the closure call
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}

impl Address {
	/// Creates an IPv4 address from its parts.
	pub fn inet(ip: [u8; 4], port: u16) -> Self {
		SocketAddrV4::new(ip, port).into()
	}

	fn set_inet_host(&mut self, ip: [u8; 4]) {
		if let Endpoint::Inet { host, .. } = self.pin(Family::Inet) {
			*host = Some(ip);
		}
	}

	/// Sets the host from a dotted quad or a resolvable name.
	pub fn set_inet_host_name(&mut self, name: &str) -> Result<()> {
		self.check(Family::Inet)?;
		let ip = resolve::inet_host(name)?;
		self.set_inet_host(ip);
		Ok(())
	}

	/// Sets the host from a numeric address in host byte order.
	pub fn set_inet_host_address(&mut self, addr: u32) -> Result<()> {
		self.check(Family::Inet)?;
		self.set_inet_host(addr.to_be_bytes());
		Ok(())
	}

	/// Sets the host to INADDR_ANY.
	pub fn set_inet_any(&mut self) -> Result<()> {
		self.set_inet_host_address(libc::INADDR_ANY)
	}

	/// Sets the host to INADDR_BROADCAST.
	pub fn set_inet_broadcast(&mut self) -> Result<()> {
		self.set_inet_host_address(libc::INADDR_BROADCAST)
	}

	/// Sets the port number.
	pub fn set_inet_port(&mut self, value: u16) -> Result<()> {
		self.check(Family::Inet)?;
		if let Endpoint::Inet { port, .. } = self.pin(Family::Inet) {
			*port = Some(value);
		}
		Ok(())
	}

	/// Sets the port from a service name (or numeric string) and protocol
	/// name (`"tcp"` or `"udp"`).
	pub fn set_inet_port_name(&mut self, service: &str, protocol: &str) -> Result<()> {
		self.check(Family::Inet)?;
		let value = resolve::service_port(service, protocol, Family::Inet)?;
		self.set_inet_port(value)
	}

	/// Writes the host's name into `buf` and returns its length.
	///
	/// Falls back to the numeric form when reverse lookup finds no name.
	/// If the name does not fit, `buf` is left untouched.
	pub fn inet_host_name(&self, buf: &mut [u8]) -> Result<usize> {
		let addr = self.inet_addr()?;
		let name = resolve::host_name(&Address::from(addr))?;
		copy_out(name.as_bytes(), buf)
	}

	/// Returns the host as a number in host byte order.
	pub fn inet_host_address(&self) -> Result<u32> {
		match self.expect(Family::Inet)? {
			Endpoint::Inet { host: Some(ip), .. } => Ok(u32::from_be_bytes(*ip)),
			_ => Err(SocketError::InvalidAddress { reason: "host not set" }),
		}
	}

	/// Returns the port number.
	pub fn inet_port(&self) -> Result<u16> {
		match self.expect(Family::Inet)? {
			Endpoint::Inet { port: Some(port), .. } => Ok(*port),
			_ => Err(SocketError::InvalidAddress { reason: "port not set" }),
		}
	}

	/// Returns the complete IPv4 endpoint. An unset port reads as 0.
	pub fn inet_addr(&self) -> Result<SocketAddrV4> {
		match self.expect(Family::Inet)? {
			Endpoint::Inet { host: Some(ip), port } => Ok(SocketAddrV4::new(*ip, port.unwrap_or(0))),
			_ => Err(SocketError::InvalidAddress { reason: "host not set" }),
		}
	}
}
