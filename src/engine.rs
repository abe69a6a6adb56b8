/*!
 * Engine Hub
 *
 * The engine owns the connection registry, the two worker pools and the
 * protocol dispatcher, and carries the process-wide shutdown flag. It is the
 * explicitly constructed replacement for the global singletons of older
 * designs: every component receives an `Arc<Engine>` instead of reaching for
 * process state.
 */

use crate::config::Config;
use crate::connection::Connection;
use crate::error::Result;
use crate::message::MessageContext;
use crate::notify::PendingRegistrations;
use crate::pool::{Job, WorkerPool};
use crate::registry::ConnectionRegistry;
use crate::task::{ProcessTask, ReceiveTask};
use mio::{Poll, Token};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Event payload reserved for the cross-thread waker. Carrier slots are
/// slab indices counting up from zero and can never collide with it;
/// `usize::MAX` itself is reserved by the multiplexer.
pub const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Protocol seam between the shared pipeline and the two server variants
///
/// The pipeline delivers complete framed batches through `dispatch`; the
/// remaining hooks let a variant react to connection lifecycle events.
pub trait Dispatcher: Send + Sync + 'static {
    /// Handle one framed batch (payload ends with the terminator)
    fn dispatch(&self, ctx: MessageContext, engine: &Arc<Engine>);

    /// A new client connection has been registered
    fn on_accept(&self, _conn: &Arc<Connection>, _engine: &Arc<Engine>) {}

    /// A connection has been closed for the first time
    fn on_disconnect(&self, _conn: &Arc<Connection>, _engine: &Arc<Engine>) {}

    /// The connection exceeded its receive buffer; reply best-effort before
    /// the engine closes it
    fn on_overflow(&self, _conn: &Arc<Connection>) {}
}

/// Shared dispatchers forward through the reference so a binary can keep a
/// handle for runtime toggles (maintenance, sleep) while the engine owns a
/// boxed copy
impl<D: Dispatcher> Dispatcher for Arc<D> {
    fn dispatch(&self, ctx: MessageContext, engine: &Arc<Engine>) {
        (**self).dispatch(ctx, engine)
    }

    fn on_accept(&self, conn: &Arc<Connection>, engine: &Arc<Engine>) {
        (**self).on_accept(conn, engine)
    }

    fn on_disconnect(&self, conn: &Arc<Connection>, engine: &Arc<Engine>) {
        (**self).on_disconnect(conn, engine)
    }

    fn on_overflow(&self, conn: &Arc<Connection>) {
        (**self).on_overflow(conn)
    }
}

/// Connection-management and task-pipeline hub
pub struct Engine {
    registry: ConnectionRegistry,
    fast_pool: WorkerPool,
    slow_pool: WorkerPool,
    dispatcher: Box<dyn Dispatcher>,
    pending: PendingRegistrations,
    shutdown: AtomicBool,
}

impl Engine {
    /// Build the engine around an existing poll instance and start the pools
    pub fn new(config: &Config, dispatcher: Box<dyn Dispatcher>, poll: &Poll) -> Result<Arc<Self>> {
        config.validate()?;

        let registry = ConnectionRegistry::new(poll.registry().try_clone()?);
        let pending = PendingRegistrations::new(poll, WAKER_TOKEN)?;

        let fast_pool = WorkerPool::new(config.fast_pool_size);
        let slow_pool = WorkerPool::new(config.slow_pool_size);
        fast_pool.initialize()?;
        slow_pool.initialize()?;

        Ok(Arc::new(Self {
            registry,
            fast_pool,
            slow_pool,
            dispatcher,
            pending,
            shutdown: AtomicBool::new(false),
        }))
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingRegistrations {
        &self.pending
    }

    pub fn dispatcher(&self) -> &dyn Dispatcher {
        self.dispatcher.as_ref()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queue a job on the fast (I/O) pool; silently skipped during shutdown
    pub fn post_fast(&self, job: Job) {
        if self.shutdown_requested() {
            return;
        }
        if let Err(e) = self.fast_pool.submit(job) {
            log::error!("unable to post fast task: {e}");
        }
    }

    /// Queue a job on the slow (parse/dispatch) pool
    pub fn post_slow(&self, job: Job) {
        if self.shutdown_requested() {
            return;
        }
        if let Err(e) = self.slow_pool.submit(job) {
            log::error!("unable to post slow task: {e}");
        }
    }

    /// Enqueue a receive task for `conn` on the fast pool
    pub fn post_receive(self: &Arc<Self>, conn: Arc<Connection>) {
        let engine = Arc::clone(self);
        self.post_fast(Box::new(move || {
            ReceiveTask::new(conn).execute(&engine);
        }));
    }

    /// Enqueue a process task for `ctx` on the slow pool
    pub fn post_process(self: &Arc<Self>, ctx: MessageContext) {
        let engine = Arc::clone(self);
        self.post_slow(Box::new(move || {
            ProcessTask::new(ctx).execute(&engine);
        }));
    }

    /// Close `conn` once: flag it, schedule the deferred removal and fire
    /// the disconnect hook. Safe to call from any thread, any number of
    /// times.
    pub fn close_connection(self: &Arc<Self>, conn: &Arc<Connection>) {
        if !conn.close() {
            return;
        }
        self.registry.defer_remove(conn.raw_fd());
        self.dispatcher.on_disconnect(conn, self);
    }

    /// Orderly shutdown: stop the pools, then sweep the remaining sockets
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("engine shutdown requested");
        self.fast_pool.shutdown();
        self.slow_pool.shutdown();
        self.registry.close_all();
        // Pop the readiness loop out of its wait so it observes the flag.
        self.pending.wake();
    }
}
