/*!
 * Readiness Loop
 *
 * The event loop multiplexes one listening socket and many accepted client
 * sockets on a dedicated thread. Each iteration waits with a bounded
 * timeout, dispatches the ready events into the worker pools, and only then
 * applies the deferred-delete list, so an event delivered in the same batch
 * as a close request can never dangle its connection.
 */

use crate::config::Config;
use crate::connection::Connection;
use crate::engine::{Engine, WAKER_TOKEN};
use crate::error::{Error, Result};
use crate::notify::prepare_client;
use crate::socket::{would_block, BufferedSocket};
use mio::{Events, Poll};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Capacity of one readiness batch
const MAX_EVENTS: usize = 1024;

/// Obsoleted by modern kernels but still required by the listen API
const LISTEN_BACKLOG: i32 = 100;

/// Bind the listening socket for `config` and wrap it in a listening
/// connection, not yet registered
pub fn bind_listener(config: &Config) -> Result<Arc<Connection>> {
    let addr = SocketAddr::new(config.tcp_if, config.tcp_port);
    log::debug!("bind to the address: {addr}");
    let socket = BufferedSocket::listen_on(addr, LISTEN_BACKLOG)?;
    Ok(Arc::new(Connection::new(socket, true, config.max_buffered)))
}

/// Create a poll, build the engine around it and pair it with its loop
///
/// The binaries and the integration tests share this wiring; the returned
/// loop is ready to run on a dedicated thread.
pub fn build_engine(
    config: &Config,
    dispatcher: Box<dyn crate::engine::Dispatcher>,
) -> Result<(Arc<Engine>, EventLoop)> {
    let poll = Poll::new()?;
    let engine = Engine::new(config, dispatcher, &poll)?;
    let event_loop = EventLoop::new(poll, Arc::clone(&engine), config.wait_timeout);
    Ok((engine, event_loop))
}

/// The readiness multiplexer and its dispatch loop
pub struct EventLoop {
    poll: Poll,
    events: Events,
    engine: Arc<Engine>,
    wait_timeout: Duration,
}

impl EventLoop {
    /// The poll instance must be the one the engine was built around
    pub fn new(poll: Poll, engine: Arc<Engine>, wait_timeout: Duration) -> Self {
        Self {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            engine,
            wait_timeout,
        }
    }

    /// Run until shutdown is requested. Any wait failure other than an
    /// interruption aborts the loop and triggers shutdown.
    pub fn run(&mut self) -> Result<()> {
        log::debug!("readiness loop started");
        while !self.engine.shutdown_requested() {
            if let Err(e) = self.cycle() {
                log::error!("failed to wait on connection events: {e}");
                self.engine.shutdown();
                return Err(e);
            }
        }
        log::debug!("exiting readiness loop");
        Ok(())
    }

    /// One wait/dispatch/cleanup iteration
    fn cycle(&mut self) -> Result<()> {
        match self.poll.poll(&mut self.events, Some(self.wait_timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(Error::System(e)),
        }

        // Shutdown may have been requested while waiting; skip the batch.
        if self.engine.shutdown_requested() {
            log::debug!("shutdown requested, skip event handling");
            return Ok(());
        }

        // Descriptors handed over by the listener thread are added before
        // any socket event of this batch is dispatched.
        self.register_pending();

        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            if event.is_error() {
                log::error!("TCP/IP stack error on token {:?}", event.token());
                continue;
            }
            // A dead carrier means the connection is already gone and the
            // event is stale; discard it.
            let Some(conn) = self.engine.registry().carrier(event.token()) else {
                continue;
            };
            if conn.is_listening() {
                accept_clients(&conn, &self.engine);
            } else {
                log::debug!("launch read on socket: {}", conn.raw_fd());
                self.engine.post_receive(conn);
            }
        }

        // Events observed in this batch are fully dispatched above; only now
        // may descriptors pending deletion be removed.
        self.engine.registry().apply_pending();
        Ok(())
    }

    fn register_pending(&self) {
        for conn in self.engine.pending().drain() {
            if let Err(e) = self.engine.registry().register(&conn) {
                log::error!(
                    "unable to register handed-over socket {}: {e}",
                    conn.raw_fd()
                );
            }
        }
    }
}

/// Accept every pending client on a listening connection
///
/// Edge-triggered registration obliges the loop to drain the backlog fully:
/// the readiness event will not re-fire for connections already queued.
fn accept_clients(listener: &Arc<Connection>, engine: &Arc<Engine>) {
    loop {
        match listener.accept() {
            Ok((socket, addr)) => {
                let socket = BufferedSocket::from_socket(socket);
                let fd = socket.raw_fd();
                log::debug!("new connect on socket {fd} from {addr:?}");
                if let Err(e) = prepare_client(&socket) {
                    log::error!("unable to prepare accepted socket {fd}: {e}");
                    continue;
                }
                let conn = Arc::new(Connection::new(socket, false, listener.max_buffered()));
                if let Err(e) = engine.registry().register(&conn) {
                    // Fatal for this accept attempt only: drop the socket,
                    // publish nothing.
                    log::error!("unable to register accepted socket {fd}: {e}");
                    continue;
                }
                engine.dispatcher().on_accept(&conn, engine);
            }
            Err(Error::System(ref e)) if would_block(e) => break,
            Err(e) => {
                log::error!("accept failed: {e}");
                break;
            }
        }
    }
}
