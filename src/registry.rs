/*!
 * Connection Registry
 *
 * Holds every live connection keyed by socket descriptor, hands out carrier
 * slots whose index is the event payload registered with the readiness
 * multiplexer, and applies deferred removals at the end of each readiness
 * cycle. The map and the pending-delete list have separate guards so that
 * event dispatch never sits behind a long critical section.
 */

use crate::connection::Connection;
use crate::error::{Error, Result};
use hashbrown::HashMap;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use parking_lot::Mutex;
use slab::Slab;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Weak};

/// Registry of live connections plus the carrier table for event payloads
pub struct ConnectionRegistry {
    poll_registry: Registry,
    /// Carrier slots: token index -> non-owning connection reference. The
    /// kernel side stores only the token; a dead slot upgrade yields None
    /// and the event is discarded.
    carriers: Mutex<Slab<Weak<Connection>>>,
    /// Descriptor -> connection; the sole strong owner besides in-flight tasks
    connections: Mutex<HashMap<RawFd, Arc<Connection>>>,
    /// Descriptors scheduled for removal after the current readiness cycle
    pending_delete: Mutex<Vec<RawFd>>,
}

impl ConnectionRegistry {
    pub fn new(poll_registry: Registry) -> Self {
        Self {
            poll_registry,
            carriers: Mutex::new(Slab::new()),
            connections: Mutex::new(HashMap::new()),
            pending_delete: Mutex::new(Vec::new()),
        }
    }

    /// Register `conn` with the readiness multiplexer and publish it in the map
    ///
    /// All registrations are edge-triggered; the accept and read paths drain
    /// until `WouldBlock`, which makes the listening socket's behavior
    /// equivalent to a level-triggered registration.
    pub fn register(&self, conn: &Arc<Connection>) -> Result<()> {
        let fd = conn.raw_fd();

        let token = {
            let mut carriers = self.carriers.lock();
            Token(carriers.insert(Arc::downgrade(conn)))
        };
        conn.set_token(token);

        if let Err(e) =
            self.poll_registry
                .register(&mut SourceFd(&fd), token, Interest::READABLE)
        {
            self.carriers.lock().try_remove(token.0);
            return Err(Error::System(e));
        }

        let mut connections = self.connections.lock();
        // Force-erase a stale mapping: the kernel may have reused a recently
        // closed descriptor before its old entry was purged.
        connections.remove(&fd);
        connections.insert(fd, Arc::clone(conn));
        Ok(())
    }

    /// Resolve an event payload back to its connection, if it still exists
    pub fn carrier(&self, token: Token) -> Option<Arc<Connection>> {
        self.carriers.lock().get(token.0)?.upgrade()
    }

    /// Schedule a descriptor for removal after the current readiness cycle
    ///
    /// Events for the descriptor may still be delivered in this wake's
    /// batch; destroying the connection now would dangle them.
    pub fn defer_remove(&self, fd: RawFd) {
        log::debug!("add pending removal for socket {fd}");
        self.pending_delete.lock().push(fd);
    }

    /// Apply the deferred-delete list: unregister each pending descriptor
    /// from the multiplexer and erase it from the map if its connection is
    /// marked closed
    ///
    /// Called by the readiness loop after each event batch, never
    /// concurrently with event dispatch for the same batch.
    pub fn apply_pending(&self) {
        let pending: Vec<RawFd> = {
            let mut list = self.pending_delete.lock();
            if list.is_empty() {
                return;
            }
            std::mem::take(&mut *list)
        };

        let mut connections = self.connections.lock();
        for fd in pending {
            // Two tasks can race to request removal of the same socket; the
            // second lookup simply misses.
            let Some(conn) = connections.get(&fd) else {
                continue;
            };
            if !conn.is_closed() {
                continue;
            }
            if let Err(e) = self.poll_registry.deregister(&mut SourceFd(&fd)) {
                log::debug!("deregister of socket {fd} failed ({e}), kernel already dropped it");
            }
            if let Some(token) = conn.token() {
                self.carriers.lock().try_remove(token.0);
            }
            connections.remove(&fd);
        }
    }

    /// Copy the current connections into a fresh list
    ///
    /// Callers iterate the snapshot without holding registry locks; writes
    /// to connections that close mid-iteration are skipped at write time.
    pub fn active_snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Linear scan for the connection currently owning `username`
    pub fn find_by_username(&self, username: &str) -> Result<Arc<Connection>> {
        if username.is_empty() {
            return Err(Error::InvalidArgument("username is empty".into()));
        }
        let connections = self.connections.lock();
        for conn in connections.values() {
            if conn.username() == username {
                return Ok(Arc::clone(conn));
            }
        }
        Err(Error::NotFound)
    }

    /// Assign `username` to the connection holding `fd`
    ///
    /// The uniqueness conflict is detected in the same pass that locates the
    /// target descriptor, so no window exists between check and update.
    ///
    /// # Returns
    /// * `Ok(())` - the name is now current for the target connection
    /// * `AlreadyDefined` - some connection (possibly the target itself)
    ///   already owns the name
    /// * `NotFound` - no connection holds `fd`
    pub fn assign_username(&self, fd: RawFd, username: &str) -> Result<()> {
        let connections = self.connections.lock();
        let mut target: Option<&Arc<Connection>> = None;
        for (candidate_fd, conn) in connections.iter() {
            if conn.username() == username {
                return Err(Error::AlreadyDefined);
            }
            if *candidate_fd == fd {
                target = Some(conn);
            }
        }
        match target {
            Some(conn) => {
                conn.set_username(username);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Shutdown sweep: unregister and drop every remaining connection
    pub fn close_all(&self) {
        let mut connections = self.connections.lock();
        for (fd, conn) in connections.drain() {
            log::warn!("deleting remaining socket: {fd}");
            conn.close();
            if let Err(e) = self.poll_registry.deregister(&mut SourceFd(&fd)) {
                log::debug!("deregister of socket {fd} failed during shutdown: {e}");
            }
        }
        self.carriers.lock().clear();
        self.pending_delete.lock().clear();
    }
}
