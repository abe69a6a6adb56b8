// Core modules for the parley chat broker and registrar service
pub mod command; // chat command grammar + ChatDispatcher
pub mod config; // runtime configuration structures and validation
pub mod connection; // per-client socket + frame reassembly buffer
pub mod engine; // registry + worker pools + dispatcher hub
pub mod error; // shared error kinds
pub mod message; // wire constants and MessageContext
pub mod net; // listener binding + readiness loop
pub mod notify; // cross-thread registration hand-off
pub mod pool; // condvar worker pool (fast/slow instances)
pub mod registry; // descriptor -> connection map with deferred deletes
pub mod repo; // user-record repository (register variant)
pub mod request; // REGISTER/GET dispatcher (register variant)
pub mod signal; // blocked-set signal thread
pub mod socket; // non-blocking socket wrapper
pub mod task; // Receive/Process/WriteAnswer pipeline tasks

// Re-export the types the binaries and tests wire together
pub use command::{parse_service_frame, validate_nickname, ChatDispatcher, ServiceCommand};
pub use config::{Config, DelayPolicy, RegisterConfig};
pub use connection::Connection;
pub use engine::{Dispatcher, Engine, WAKER_TOKEN};
pub use error::{Error, Result};
pub use message::{
    MessageContext, MAX_MESSAGE_LENGTH, MAX_NICKNAME_LENGTH, SERVER_SENDER_NAME,
    SERVICE_SENTINEL, TERMINATOR,
};
pub use net::{bind_listener, build_engine, EventLoop};
pub use notify::{spawn_listener_thread, PendingRegistrations};
pub use pool::WorkerPool;
pub use registry::ConnectionRegistry;
pub use repo::{FlatFileRepository, Repository, MAX_RECORDS};
pub use request::{parse_request, RegisterDispatcher, Request};
pub use socket::BufferedSocket;
pub use task::{ProcessTask, ReceiveTask, WriteAnswerTask};
