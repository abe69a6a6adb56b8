/*!
 * Cross-Thread Notifier
 *
 * Descriptors accepted outside the readiness thread must be added to the
 * readiness set from the readiness thread itself, never while a wait is in
 * flight. The notifier pairs a waker registered with the multiplexer with a
 * short-mutex pending list: the listener thread appends a prepared
 * connection and wakes the loop; the loop drains the list before handling
 * any socket event of the batch.
 */

use crate::connection::Connection;
use crate::engine::Engine;
use crate::error::Result;
use crate::socket::BufferedSocket;
use mio::{Poll, Token, Waker};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Hand-off point between an out-of-loop accept path and the readiness loop
pub struct PendingRegistrations {
    waker: Waker,
    pending: Mutex<Vec<Arc<Connection>>>,
}

impl PendingRegistrations {
    pub fn new(poll: &Poll, token: Token) -> Result<Self> {
        Ok(Self {
            waker: Waker::new(poll.registry(), token)?,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Append a prepared connection and wake the readiness loop
    pub fn enqueue(&self, conn: Arc<Connection>) {
        log::debug!("notify loop about new socket {}", conn.raw_fd());
        self.pending.lock().push(conn);
        self.wake();
    }

    /// Force the readiness loop out of its wait
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            log::error!("unable to wake the readiness loop: {e}");
        }
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        std::mem::take(&mut *self.pending.lock())
    }
}

/// Accept clients on a dedicated thread and hand them to the readiness loop
///
/// The register variant runs this routine; the chat variant registers its
/// listening socket with the loop directly and has no listener thread. The
/// listener socket stays non-blocking so the thread can observe shutdown.
pub fn spawn_listener_thread(
    listener: BufferedSocket,
    engine: Arc<Engine>,
    max_buffered: usize,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("listener".into())
        .spawn(move || {
            log::debug!("listener thread routine");
            while !stop.load(Ordering::Acquire) && !engine.shutdown_requested() {
                match listener.accept() {
                    Ok((socket, addr)) => {
                        let socket = BufferedSocket::from_socket(socket);
                        if let Err(e) = prepare_client(&socket) {
                            log::error!("unable to prepare accepted socket: {e}");
                            continue;
                        }
                        log::debug!(
                            "new connect on socket {} from {:?}",
                            socket.raw_fd(),
                            addr
                        );
                        let conn = Arc::new(Connection::new(socket, false, max_buffered));
                        engine.pending().enqueue(conn);
                    }
                    Err(e) if e.is_would_block() => {
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => {
                        log::error!("accept failed on listener thread: {e}");
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            log::debug!("exiting from listener thread routine");
        })
}

/// Options every accepted client socket gets before registration
pub fn prepare_client(socket: &BufferedSocket) -> Result<()> {
    socket.set_nonblocking()?;
    socket.set_nodelay(true)?;
    socket.set_keepalive(true)?;
    Ok(())
}
