use super::{copy_out, Address, Endpoint, Family, ToSockAddr};
use crate::error::{Result, SocketError};

/// Byte offset of `sun_path` inside `sockaddr_un`.
const PATH_OFFSET: usize = std::mem::offset_of!(libc::sockaddr_un, sun_path);

/// Unix domain socket address (file path or abstract).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixAddr {
	path: Vec<u8>,
	/// True if this is an abstract socket (Linux-only, no filesystem entry).
	is_abstract: bool,
}

impl UnixAddr {
	/// Creates a new Unix address from a filesystem path.
	pub fn new<P: AsRef<[u8]>>(path: P) -> Self {
		Self {
			path: path.as_ref().to_vec(),
			is_abstract: false,
		}
	}

	/// Creates an abstract socket address (Linux-only).
	///
	/// Abstract sockets exist only in memory, with no filesystem entry.
	pub fn abstract_socket<P: AsRef<[u8]>>(name: P) -> Self {
		Self {
			path: name.as_ref().to_vec(),
			is_abstract: true,
		}
	}

	/// Address of an unbound unix socket, as reported for its datagrams.
	pub fn unnamed() -> Self {
		Self {
			path: Vec::new(),
			is_abstract: false,
		}
	}

	/// True for the address of an unbound socket.
	pub fn is_unnamed(&self) -> bool {
		self.path.is_empty() && !self.is_abstract
	}

	/// Returns true if this is an abstract socket.
	pub fn is_abstract(&self) -> bool {
		self.is_abstract
	}

	/// Returns the path bytes (the name, for abstract sockets).
	pub fn path(&self) -> &[u8] {
		&self.path
	}

	/// Largest path (or abstract name) that fits `sun_path`.
	///
	/// Filesystem paths need a trailing NUL, abstract names a leading one.
	pub fn max_len() -> usize {
		std::mem::size_of::<libc::sockaddr_un>() - PATH_OFFSET - 1
	}

	/// Converts to the raw sockaddr_un and the length to pass to the kernel.
	pub(crate) fn to_raw(&self) -> Option<(libc::sockaddr_un, libc::socklen_t)> {
		if self.path.len() > Self::max_len() {
			return None;
		}
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

		// abstract names start after the leading NUL already there from zeroed()
		let start = usize::from(self.is_abstract);
		for (i, &byte) in self.path.iter().enumerate() {
			addr.sun_path[start + i] = byte as libc::c_char;
		}

		// one extra byte: the trailing NUL of a path, or the leading NUL of
		// an abstract name (which is length-delimited)
		let len = PATH_OFFSET + 1 + self.path.len();
		Some((addr, len as libc::socklen_t))
	}

	/// Creates from raw sockaddr_un, honouring the kernel-reported length.
	///
	/// An unnamed socket (as returned by accept on the client side) yields an
	/// empty, non-abstract path.
	pub(crate) fn from_raw(raw: &libc::sockaddr_un, len: libc::socklen_t) -> Self {
		let avail = (len as usize).saturating_sub(PATH_OFFSET).min(raw.sun_path.len());
		let bytes: Vec<u8> = raw.sun_path[..avail].iter().map(|&c| c as u8).collect();

		match bytes.split_first() {
			None => Self::unnamed(),
			Some((&0, name)) => Self { path: name.to_vec(), is_abstract: true },
			Some(_) => {
				let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
				Self { path: bytes[..end].to_vec(), is_abstract: false }
			}
		}
	}
}

impl ToSockAddr for UnixAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		// None if path too long
		let (raw, len) = self.to_raw()?;
		let ptr = &raw as *const _ as *const libc::sockaddr;
		Some(f(ptr, len))
	}
}

impl Address {
	/// Creates a unix-domain address for a filesystem path.
	pub fn unix<P: AsRef<[u8]>>(path: P) -> Self {
		UnixAddr::new(path).into()
	}

	fn set_unix(&mut self, value: UnixAddr) -> Result<()> {
		self.check(Family::Unix)?;
		if value.path.is_empty() && !value.is_abstract {
			return Err(SocketError::InvalidAddress { reason: "empty unix path" });
		}
		if value.path.len() > UnixAddr::max_len() {
			return Err(SocketError::InvalidAddress { reason: "unix path too long" });
		}
		if let Endpoint::Unix(path) = self.pin(Family::Unix) {
			*path = Some(value);
		}
		Ok(())
	}

	/// Sets a filesystem path.
	pub fn set_unix_path<P: AsRef<[u8]>>(&mut self, path: P) -> Result<()> {
		self.set_unix(UnixAddr::new(path))
	}

	/// Sets an abstract (Linux-only) socket name.
	pub fn set_unix_abstract<P: AsRef<[u8]>>(&mut self, name: P) -> Result<()> {
		self.set_unix(UnixAddr::abstract_socket(name))
	}

	/// Writes the path (or abstract name) into `buf` and returns its length.
	/// `buf` is untouched when the path does not fit.
	pub fn unix_path(&self, buf: &mut [u8]) -> Result<usize> {
		copy_out(self.unix_addr()?.path(), buf)
	}

	/// Borrows the unix-domain endpoint.
	pub fn unix_addr(&self) -> Result<&UnixAddr> {
		match self.expect(Family::Unix)? {
			Endpoint::Unix(Some(path)) => Ok(path),
			_ => Err(SocketError::InvalidAddress { reason: "path not set" }),
		}
	}
}
