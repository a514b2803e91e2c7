//! Name and service resolution on top of `getaddrinfo`/`getnameinfo`.

use std::ffi::{CStr, CString};

use tracing::debug;

use super::{Address, Family, FromSockAddr, SocketAddrV4, SocketAddrV6, ToSockAddr};
use crate::error::{Result, SocketError};

/// NI_MAXHOST from <netdb.h>.
const HOST_MAX: usize = 1025;

/// Owned result list of `getaddrinfo`, released with `freeaddrinfo`.
struct AddrInfoList(*mut libc::addrinfo);

impl AddrInfoList {
	fn lookup(node: Option<&CStr>, service: Option<&CStr>, family: Family, socktype: libc::c_int) -> std::result::Result<Self, libc::c_int> {
		let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
		hints.ai_family = family.raw();
		hints.ai_socktype = socktype;
		if node.is_none() {
			hints.ai_flags = libc::AI_PASSIVE;
		}

		let mut res: *mut libc::addrinfo = std::ptr::null_mut();
		let rc = unsafe {
			libc::getaddrinfo(
				node.map_or(std::ptr::null(), CStr::as_ptr),
				service.map_or(std::ptr::null(), CStr::as_ptr),
				&hints,
				&mut res,
			)
		};
		if rc != 0 {
			return Err(rc);
		}
		Ok(Self(res))
	}

	/// First entry of the given family, decoded as `A`.
	fn first<A: FromSockAddr>(&self, family: Family) -> Option<A> {
		let mut cur = self.0;
		while !cur.is_null() {
			let info = unsafe { &*cur };
			if info.ai_family == family.raw() && !info.ai_addr.is_null() {
				return unsafe { A::from_sockaddr(info.ai_addr, info.ai_addrlen) };
			}
			cur = info.ai_next;
		}
		None
	}
}

impl Drop for AddrInfoList {
	fn drop(&mut self) {
		if !self.0.is_null() {
			unsafe { libc::freeaddrinfo(self.0) };
		}
	}
}

fn gai_message(code: libc::c_int) -> String {
	unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
		.to_string_lossy()
		.into_owned()
}

fn not_found(name: &str) -> SocketError {
	SocketError::HostNotFound { host: name.to_string() }
}

fn lookup_host(name: &str, family: Family) -> Result<AddrInfoList> {
	let node = CString::new(name).map_err(|_| not_found(name))?;
	AddrInfoList::lookup(Some(&node), None, family, libc::SOCK_STREAM).map_err(|code| {
		debug!(host = name, %family, reason = %gai_message(code), "host lookup failed");
		not_found(name)
	})
}

/// Resolves a dotted quad or host name to IPv4 bytes.
pub(crate) fn inet_host(name: &str) -> Result<[u8; 4]> {
	if let Ok(ip) = name.parse::<std::net::Ipv4Addr>() {
		return Ok(ip.octets());
	}
	lookup_host(name, Family::Inet)?
		.first::<SocketAddrV4>(Family::Inet)
		.map(|addr| addr.ip())
		.ok_or_else(|| not_found(name))
}

/// Resolves a textual IPv6 address or host name to IPv6 bytes.
pub(crate) fn inet6_host(name: &str) -> Result<[u8; 16]> {
	if let Ok(ip) = name.parse::<std::net::Ipv6Addr>() {
		return Ok(ip.octets());
	}
	lookup_host(name, Family::Inet6)?
		.first::<SocketAddrV6>(Family::Inet6)
		.map(|addr| addr.ip())
		.ok_or_else(|| not_found(name))
}

/// Looks up a service name for `protocol` ("tcp" or "udp").
///
/// Numeric strings are accepted without a lookup.
pub(crate) fn service_port(service: &str, protocol: &str, family: Family) -> Result<u16> {
	let invalid = || SocketError::InvalidPort { port: format!("{}/{}", service, protocol) };

	let socktype = match protocol {
		"tcp" => libc::SOCK_STREAM,
		"udp" => libc::SOCK_DGRAM,
		_ => return Err(invalid()),
	};
	if let Ok(port) = service.parse::<u16>() {
		return Ok(port);
	}

	let name = CString::new(service).map_err(|_| invalid())?;
	let list = AddrInfoList::lookup(None, Some(&name), family, socktype).map_err(|code| {
		debug!(service, protocol, reason = %gai_message(code), "service lookup failed");
		invalid()
	})?;
	let port = match family {
		Family::Inet6 => list.first::<SocketAddrV6>(family).map(|a| a.port()),
		_ => list.first::<SocketAddrV4>(Family::Inet).map(|a| a.port()),
	};
	port.ok_or_else(invalid)
}

/// Reverse-resolves an IPv4/IPv6 address. Without a registered name the
/// numeric form is returned.
pub(crate) fn host_name(addr: &Address) -> Result<String> {
	let mut host = [0 as libc::c_char; HOST_MAX];
	let rc = addr
		.with_raw(|ptr, len| unsafe {
			libc::getnameinfo(
				ptr,
				len,
				host.as_mut_ptr(),
				host.len() as libc::socklen_t,
				std::ptr::null_mut(),
				0,
				0,
			)
		})
		.ok_or(SocketError::InvalidAddress { reason: "incomplete address" })?;

	if rc != 0 {
		debug!(%addr, reason = %gai_message(rc), "reverse lookup failed");
		return Err(not_found(&addr.to_string()));
	}
	let name = unsafe { CStr::from_ptr(host.as_ptr()) };
	Ok(name.to_string_lossy().into_owned())
}
