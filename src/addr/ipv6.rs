use super::{copy_out, resolve, Address, Endpoint, Family, ToSockAddr};
use crate::error::{Result, SocketError};

/// IPv6 socket address (IP + port + scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketAddrV6 {
	ip: [u8; 16],
	port: u16,
	/// Scope ID for link-local addresses (identifies network interface).
	/// Usually 0 unless using link-local addresses like fe80::.
	scope_id: u32,
}

impl SocketAddrV6 {
	/// Creates a new IPv6 address.
	pub fn new(ip: [u8; 16], port: u16) -> Self {
		Self { ip, port, scope_id: 0 }
	}

	/// Creates with explicit scope ID.
	pub fn with_scope(ip: [u8; 16], port: u16, scope_id: u32) -> Self {
		Self { ip, port, scope_id }
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 16] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Returns the scope ID.
	pub fn scope_id(&self) -> u32 {
		self.scope_id
	}

	/// Converts to the raw sockaddr_in6 for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in6 {
		libc::sockaddr_in6 {
			sin6_family: libc::AF_INET6 as libc::sa_family_t,
			sin6_port: self.port.to_be(),
			sin6_flowinfo: 0,
			sin6_addr: libc::in6_addr {
				s6_addr: self.ip,
			},
			sin6_scope_id: self.scope_id,
		}
	}

	/// Creates from raw sockaddr_in6.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in6) -> Self {
		Self {
			ip: raw.sin6_addr.s6_addr,
			port: u16::from_be(raw.sin6_port),
			scope_id: raw.sin6_scope_id,
		}
	}
}

impl ToSockAddr for SocketAddrV6 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}

impl Address {
	/// Creates an IPv6 address from its parts.
	pub fn inet6(ip: [u8; 16], port: u16) -> Self {
		SocketAddrV6::new(ip, port).into()
	}

	fn set_inet6_host(&mut self, ip: [u8; 16]) {
		if let Endpoint::Inet6 { host, .. } = self.pin(Family::Inet6) {
			*host = Some(ip);
		}
	}

	/// Sets the host from a textual IPv6 address or a resolvable name.
	pub fn set_inet6_host_name(&mut self, name: &str) -> Result<()> {
		self.check(Family::Inet6)?;
		let ip = resolve::inet6_host(name)?;
		self.set_inet6_host(ip);
		Ok(())
	}

	/// Sets the host from its 16 raw bytes.
	pub fn set_inet6_host_address(&mut self, addr: [u8; 16]) -> Result<()> {
		self.check(Family::Inet6)?;
		self.set_inet6_host(addr);
		Ok(())
	}

	/// Sets the host to the unspecified address `::`.
	pub fn set_inet6_any(&mut self) -> Result<()> {
		self.set_inet6_host_address([0; 16])
	}

	/// Sets the port number.
	pub fn set_inet6_port(&mut self, value: u16) -> Result<()> {
		self.check(Family::Inet6)?;
		if let Endpoint::Inet6 { port, .. } = self.pin(Family::Inet6) {
			*port = Some(value);
		}
		Ok(())
	}

	/// Sets the port from a service name (or numeric string) and protocol.
	pub fn set_inet6_port_name(&mut self, service: &str, protocol: &str) -> Result<()> {
		self.check(Family::Inet6)?;
		let value = resolve::service_port(service, protocol, Family::Inet6)?;
		self.set_inet6_port(value)
	}

	/// Sets the interface scope for link-local hosts.
	pub fn set_inet6_scope_id(&mut self, value: u32) -> Result<()> {
		self.check(Family::Inet6)?;
		if let Endpoint::Inet6 { scope_id, .. } = self.pin(Family::Inet6) {
			*scope_id = value;
		}
		Ok(())
	}

	/// Writes the host's name into `buf` and returns its length.
	/// `buf` is untouched when the name does not fit.
	pub fn inet6_host_name(&self, buf: &mut [u8]) -> Result<usize> {
		let addr = self.inet6_addr()?;
		let name = resolve::host_name(&Address::from(addr))?;
		copy_out(name.as_bytes(), buf)
	}

	/// Returns the raw host bytes.
	pub fn inet6_host_address(&self) -> Result<[u8; 16]> {
		match self.expect(Family::Inet6)? {
			Endpoint::Inet6 { host: Some(ip), .. } => Ok(*ip),
			_ => Err(SocketError::InvalidAddress { reason: "host not set" }),
		}
	}

	/// Returns the port number.
	pub fn inet6_port(&self) -> Result<u16> {
		match self.expect(Family::Inet6)? {
			Endpoint::Inet6 { port: Some(port), .. } => Ok(*port),
			_ => Err(SocketError::InvalidAddress { reason: "port not set" }),
		}
	}

	/// Returns the complete IPv6 endpoint. An unset port reads as 0.
	pub fn inet6_addr(&self) -> Result<SocketAddrV6> {
		match self.expect(Family::Inet6)? {
			Endpoint::Inet6 { host: Some(ip), port, scope_id } => {
				Ok(SocketAddrV6::with_scope(*ip, port.unwrap_or(0), *scope_id))
			}
			_ => Err(SocketError::InvalidAddress { reason: "host not set" }),
		}
	}
}
