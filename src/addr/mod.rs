//! Address families and the family-tagged `Address` endpoint.
//!
//! An `Address` starts out unspecified. The first family-specific setter pins
//! it to that family:
//! - `Inet`: Internet Protocol version 4 (`set_inet_*`)
//! - `Inet6`: Internet Protocol version 6 (`set_inet6_*`)
//! - `Unix`: Unix domain sockets, local only (`set_unix_*`)
//!
//! Once pinned, setters and getters of another family fail with
//! `SocketError::FamilyMismatch` and leave the address untouched.

mod ipv4;
mod ipv6;
mod unix;
pub(crate) mod resolve;

use std::fmt;

pub use self::ipv4::SocketAddrV4;
pub use self::ipv6::SocketAddrV6;
pub use self::unix::UnixAddr;
use crate::error::{Result, SocketError};

/// Address family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Family {
	#[default]
	Unspec,
	Inet,
	Inet6,
	Unix,
}

impl Family {
	/// Returns the libc constant for this address family.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			Family::Unspec => libc::AF_UNSPEC,
			Family::Inet => libc::AF_INET,
			Family::Inet6 => libc::AF_INET6,
			Family::Unix => libc::AF_UNIX,
		}
	}
}

impl fmt::Display for Family {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Family::Unspec => "unspecified",
			Family::Inet => "inet",
			Family::Inet6 => "inet6",
			Family::Unix => "unix",
		})
	}
}

/// Family-specific payload. Host and port are tracked separately so that a
/// getter can tell "never set" apart from zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Endpoint {
	Unspec,
	Inet { host: Option<[u8; 4]>, port: Option<u16> },
	Inet6 { host: Option<[u8; 16]>, port: Option<u16>, scope_id: u32 },
	Unix(Option<UnixAddr>),
}

impl Endpoint {
	fn empty(family: Family) -> Self {
		match family {
			Family::Unspec => Endpoint::Unspec,
			Family::Inet => Endpoint::Inet { host: None, port: None },
			Family::Inet6 => Endpoint::Inet6 { host: None, port: None, scope_id: 0 },
			Family::Unix => Endpoint::Unix(None),
		}
	}

	fn family(&self) -> Family {
		match self {
			Endpoint::Unspec => Family::Unspec,
			Endpoint::Inet { .. } => Family::Inet,
			Endpoint::Inet6 { .. } => Family::Inet6,
			Endpoint::Unix(_) => Family::Unix,
		}
	}
}

/// A transport endpoint: IPv4/IPv6 host and port, or a unix-domain path.
///
/// `Clone` is a deep copy. Sockets keep their own clones of the addresses
/// they are given, so the caller is free to reuse or drop the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
	endpoint: Endpoint,
}

impl Default for Address {
	fn default() -> Self {
		Self::new()
	}
}

impl Address {
	/// Creates an unspecified address.
	pub fn new() -> Self {
		Self { endpoint: Endpoint::Unspec }
	}

	/// Returns the family tag.
	pub fn family(&self) -> Family {
		self.endpoint.family()
	}

	/// Retargets the address at `family`.
	///
	/// Same family: no-op. Different family: all fields are cleared.
	pub fn set_family(&mut self, family: Family) {
		if self.family() != family {
			self.endpoint = Endpoint::empty(family);
		}
	}

	/// Fails unless the address is unspecified or already of `family`.
	pub(crate) fn check(&self, family: Family) -> Result<()> {
		match self.family() {
			Family::Unspec => Ok(()),
			actual if actual == family => Ok(()),
			actual => Err(SocketError::FamilyMismatch { expected: family, actual }),
		}
	}

	/// Pins the family and returns the payload for mutation.
	///
	/// Callers run `check()` and any fallible lookup first so that a failure
	/// never leaves a half-updated address behind.
	pub(crate) fn pin(&mut self, family: Family) -> &mut Endpoint {
		if self.family() == Family::Unspec {
			self.endpoint = Endpoint::empty(family);
		}
		&mut self.endpoint
	}

	/// Getter-side family check: mismatch is an error, including unspecified.
	pub(crate) fn expect(&self, family: Family) -> Result<&Endpoint> {
		if self.family() == family {
			Ok(&self.endpoint)
		} else {
			Err(SocketError::FamilyMismatch { expected: family, actual: self.family() })
		}
	}

	/// Returns the port of an IPv4 or IPv6 address.
	pub fn port(&self) -> Result<u16> {
		match self.endpoint {
			Endpoint::Inet { port: Some(port), .. } | Endpoint::Inet6 { port: Some(port), .. } => Ok(port),
			Endpoint::Inet { .. } | Endpoint::Inet6 { .. } => Err(SocketError::InvalidAddress { reason: "port not set" }),
			_ => Err(SocketError::InvalidAddress { reason: "address has no port" }),
		}
	}

	/// True when every field needed for a syscall is present.
	pub fn is_complete(&self) -> bool {
		match &self.endpoint {
			Endpoint::Unspec => false,
			Endpoint::Inet { host, .. } => host.is_some(),
			Endpoint::Inet6 { host, .. } => host.is_some(),
			Endpoint::Unix(path) => path.is_some(),
		}
	}
}

/// Copies `s` into `buf` when it fits; otherwise fails and leaves `buf` alone.
pub(crate) fn copy_out(s: &[u8], buf: &mut [u8]) -> Result<usize> {
	if s.len() > buf.len() {
		return Err(SocketError::InvalidAddress { reason: "buffer too small" });
	}
	buf[..s.len()].copy_from_slice(s);
	Ok(s.len())
}

impl From<SocketAddrV4> for Address {
	fn from(addr: SocketAddrV4) -> Self {
		Self {
			endpoint: Endpoint::Inet { host: Some(addr.ip()), port: Some(addr.port()) },
		}
	}
}

impl From<SocketAddrV6> for Address {
	fn from(addr: SocketAddrV6) -> Self {
		Self {
			endpoint: Endpoint::Inet6 {
				host: Some(addr.ip()),
				port: Some(addr.port()),
				scope_id: addr.scope_id(),
			},
		}
	}
}

impl From<UnixAddr> for Address {
	fn from(addr: UnixAddr) -> Self {
		Self { endpoint: Endpoint::Unix(Some(addr)) }
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.endpoint {
			Endpoint::Unspec => f.write_str("<unspecified>"),
			Endpoint::Inet { host, port } => {
				match host {
					Some(ip) => write!(f, "{}", std::net::Ipv4Addr::from(*ip))?,
					None => f.write_str("?")?,
				}
				write!(f, ":{}", port.unwrap_or(0))
			}
			Endpoint::Inet6 { host, port, .. } => {
				match host {
					Some(ip) => write!(f, "[{}]", std::net::Ipv6Addr::from(*ip))?,
					None => f.write_str("[?]")?,
				}
				write!(f, ":{}", port.unwrap_or(0))
			}
			Endpoint::Unix(Some(path)) if path.is_abstract() => {
				write!(f, "unix:@{}", String::from_utf8_lossy(path.path()))
			}
			Endpoint::Unix(Some(path)) => write!(f, "unix:{}", String::from_utf8_lossy(path.path())),
			Endpoint::Unix(None) => f.write_str("unix:?"),
		}
	}
}

/// Trait for address types that can be converted to raw sockaddr for syscalls.
pub trait ToSockAddr {
	/// Calls the provided closure with a pointer to the raw sockaddr and its size.
	/// Returns None if the address is invalid (e.g., path too long for Unix).
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R;
}

impl ToSockAddr for Address {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		match &self.endpoint {
			Endpoint::Unspec => None,
			Endpoint::Inet { host, port } => SocketAddrV4::new((*host)?, port.unwrap_or(0)).with_raw(f),
			Endpoint::Inet6 { host, port, scope_id } => {
				SocketAddrV6::with_scope((*host)?, port.unwrap_or(0), *scope_id).with_raw(f)
			}
			Endpoint::Unix(path) => path.as_ref()?.with_raw(f),
		}
	}
}

/// Trait for address types that can be created from raw sockaddr.
pub trait FromSockAddr: Sized {
	/// Creates address from raw sockaddr storage.
	///
	/// # Safety
	/// `addr` must point to at least `len` readable bytes.
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self>;
}

impl FromSockAddr for SocketAddrV4 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in) };
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for SocketAddrV6 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in6) };
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for UnixAddr {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_un) };
		Some(Self::from_raw(raw, len))
	}
}

impl FromSockAddr for Address {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t {
			return None;
		}
		let family = unsafe { (*addr).sa_family } as libc::c_int;
		unsafe {
			match family {
				libc::AF_INET => SocketAddrV4::from_sockaddr(addr, len).map(Address::from),
				libc::AF_INET6 => SocketAddrV6::from_sockaddr(addr, len).map(Address::from),
				libc::AF_UNIX => UnixAddr::from_sockaddr(addr, len).map(Address::from),
				_ => None,
			}
		}
	}
}

/// Reads an address back out of a `sockaddr_storage` filled by the kernel.
pub(crate) fn from_storage(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Result<Address> {
	unsafe {
		Address::from_sockaddr(storage as *const _ as *const libc::sockaddr, len)
			.ok_or(SocketError::InvalidAddress { reason: "unsupported address family" })
	}
}
