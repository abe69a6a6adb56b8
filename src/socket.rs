/*!
 * Buffered Socket Wrapper
 *
 * Owns one non-blocking kernel socket and exposes the small operation set
 * the engine needs: create/bind/listen for the listening path, accept for
 * new clients, read/write for established connections. The descriptor is
 * released when the wrapper drops, on every exit path.
 */

use crate::error::{Error, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

/// Non-blocking socket with scoped descriptor ownership
pub struct BufferedSocket {
    inner: Socket,
}

impl BufferedSocket {
    /// Allocate a new kernel socket
    pub fn create(domain: Domain, ty: Type, protocol: Protocol) -> Result<Self> {
        let inner = Socket::new(domain, ty, Some(protocol))
            .map_err(|e| Error::Resource(format!("socket allocation refused: {e}")))?;
        Ok(Self { inner })
    }

    /// Wrap an already-open socket (as returned by `accept`)
    pub fn from_socket(inner: Socket) -> Self {
        Self { inner }
    }

    /// Create, configure and bind a TCP listening socket in one step
    pub fn listen_on(addr: SocketAddr, backlog: i32) -> Result<Self> {
        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Self::create(domain, Type::STREAM, Protocol::TCP)?;
        socket.set_reuse_address(true)?;
        socket.bind(addr)?;
        socket.set_nonblocking()?;
        socket.listen(backlog)?;
        Ok(socket)
    }

    pub fn bind(&self, addr: SocketAddr) -> Result<()> {
        self.inner.bind(&SockAddr::from(addr))?;
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> Result<()> {
        self.inner.listen(backlog)?;
        Ok(())
    }

    pub fn set_nonblocking(&self) -> Result<()> {
        self.inner.set_nonblocking(true)?;
        Ok(())
    }

    pub fn set_reuse_address(&self, on: bool) -> Result<()> {
        self.inner.set_reuse_address(on)?;
        Ok(())
    }

    /// Lower latency on small writes
    pub fn set_nodelay(&self, on: bool) -> Result<()> {
        self.inner.set_nodelay(on)?;
        Ok(())
    }

    /// Detect half-dead peers on a connection-oriented socket
    pub fn set_keepalive(&self, on: bool) -> Result<()> {
        self.inner.set_keepalive(on)?;
        Ok(())
    }

    /// Accept one pending connection on a listening socket
    ///
    /// Returns `System(WouldBlock)` when the readiness was spurious or the
    /// backlog has been fully drained.
    pub fn accept(&self) -> Result<(Socket, Option<SocketAddr>)> {
        let (socket, addr) = self.inner.accept()?;
        Ok((socket, addr.as_socket()))
    }

    /// Read into `buf`; `Ok(0)` signals orderly remote close,
    /// `System(WouldBlock)` signals "no more data right now"
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let n = (&self.inner).read(buf)?;
        Ok(n)
    }

    /// Write `bytes` once; partial writes are permitted and messages are
    /// small enough that the callers treat short writes as best-effort
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        let n = (&self.inner).write(bytes)?;
        Ok(n)
    }

    pub fn raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr().ok().and_then(|a| a.as_socket())
    }

    /// Address the socket is bound to; resolves ephemeral ports
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = self.inner.local_addr()?;
        addr.as_socket()
            .ok_or_else(|| Error::Unexpected("socket has no inet address".into()))
    }
}

impl From<std::net::TcpStream> for BufferedSocket {
    fn from(stream: std::net::TcpStream) -> Self {
        Self {
            inner: Socket::from(stream),
        }
    }
}

impl std::fmt::Debug for BufferedSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedSocket")
            .field("fd", &self.raw_fd())
            .finish()
    }
}

/// Check if an I/O error indicates the operation would block
#[inline]
pub fn would_block(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
}

/// Check if an I/O error is a harmless interruption to be retried
#[inline]
pub fn interrupted(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::Interrupted
}
