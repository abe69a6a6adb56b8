/*!
 * Per-Client Connection
 *
 * A connection couples one non-blocking socket with the receive buffer that
 * reassembles line-terminated frames, the identity of the client (username,
 * remote address) and the lifecycle flags the registry relies on.
 */

use crate::error::{Error, Result};
use crate::message::TERMINATOR;
use crate::socket::{interrupted, would_block, BufferedSocket};
use bytes::{Buf, BytesMut};
use mio::Token;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Read chunk used while draining the socket
const READ_CHUNK: usize = 1024;

/// Process-wide counter feeding auto-generated usernames
static USER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Placeholder until the registry assigns a carrier slot
const NO_TOKEN: usize = usize::MAX;

/// One client (or listening) socket plus its reassembly state
pub struct Connection {
    socket: BufferedSocket,
    /// Raw bytes received but not yet claimed by a complete frame
    buffer: Mutex<BytesMut>,
    username: Mutex<String>,
    /// Readiness events on a listening connection mean "accept", never "read"
    listening: bool,
    closed: AtomicBool,
    /// Carrier slot registered as the event payload for this descriptor
    token: AtomicUsize,
    /// Upper bound for `buffer`
    max_buffered: usize,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new(socket: BufferedSocket, listening: bool, max_buffered: usize) -> Self {
        let peer = socket.peer_addr();
        Self {
            socket,
            buffer: Mutex::new(BytesMut::with_capacity(READ_CHUNK)),
            username: Mutex::new(String::new()),
            listening,
            closed: AtomicBool::new(false),
            token: AtomicUsize::new(NO_TOKEN),
            max_buffered,
            peer,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection closed. Returns true only for the caller that
    /// performed the transition, so close-driven notifications fire once.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn raw_fd(&self) -> RawFd {
        self.socket.raw_fd()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn set_token(&self, token: Token) {
        self.token.store(token.0, Ordering::Release);
    }

    pub fn token(&self) -> Option<Token> {
        match self.token.load(Ordering::Acquire) {
            NO_TOKEN => None,
            slot => Some(Token(slot)),
        }
    }

    /// Accept one pending client on a listening connection
    pub fn accept(&self) -> Result<(socket2::Socket, Option<SocketAddr>)> {
        self.socket.accept()
    }

    /// Read from the socket until the kernel reports `WouldBlock` or close,
    /// appending everything to the receive buffer
    ///
    /// Edge-triggered registration requires the full drain: the readiness
    /// event does not re-fire until the kernel queue is empty.
    ///
    /// # Returns
    /// * `Ok(())` - all currently available data is buffered
    /// * `BufferOverflow` - appending would exceed the buffer cap
    /// * `ConnectionClosed` - orderly remote close, or the connection was
    ///   already marked closed
    /// * `System` - kernel error other than `WouldBlock`
    pub fn drain_into_buffer(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let mut buffer = self.buffer.lock();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.socket.read(&mut chunk) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => {
                    if buffer.len() + n > self.max_buffered {
                        log::error!(
                            "message length exceeded on socket {}",
                            self.raw_fd()
                        );
                        return Err(Error::BufferOverflow);
                    }
                    buffer.extend_from_slice(&chunk[..n]);
                }
                Err(Error::System(ref e)) if would_block(e) => return Ok(()),
                Err(Error::System(ref e)) if interrupted(e) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Take the longest prefix of the buffer ending at the last framing
    /// terminator, removing it from the buffer
    ///
    /// This is the hand-off point to the slow pool: one batch per readiness
    /// event, frames in receive order.
    pub fn take_complete_prefix(&self) -> Option<Vec<u8>> {
        let mut buffer = self.buffer.lock();
        let end = buffer.iter().rposition(|&b| b == TERMINATOR)? + 1;
        let prefix = buffer[..end].to_vec();
        buffer.advance(end);
        Some(prefix)
    }

    /// Bytes currently buffered (frames not yet complete)
    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Buffer cap this connection enforces; accepted clients inherit it
    /// from their listener
    pub fn max_buffered(&self) -> usize {
        self.max_buffered
    }

    /// Store `name` verbatim, or assign an auto-generated unique name when
    /// `name` is empty. Callers have already validated length and content.
    pub fn set_username(&self, name: &str) {
        let mut username = self.username.lock();
        if !name.is_empty() {
            *username = name.to_string();
            return;
        }

        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let id = USER_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        *username = format!("user_{epoch}_{id}");
    }

    pub fn username(&self) -> String {
        self.username.lock().clone()
    }

    /// Write raw bytes to the socket; no framing is added here. Callers that
    /// produce user-visible lines append the terminator themselves.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.socket.write(bytes)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.raw_fd())
            .field("listening", &self.listening)
            .field("closed", &self.is_closed())
            .field("username", &*self.username.lock())
            .finish()
    }
}
