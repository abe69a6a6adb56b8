/*!
 * Task Pipeline
 *
 * The three concrete task types flowing through the worker pools:
 * ReceiveTask (fast pool) drains a socket and extracts a framed batch,
 * ProcessTask (slow pool) hands the batch to the protocol dispatcher,
 * WriteAnswerTask (fast pool) delivers composed messages to one or many
 * connections.
 */

use crate::connection::Connection;
use crate::engine::Engine;
use crate::error::Error;
use crate::message::{MessageContext, TERMINATOR};
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Drain one connection and push a framed batch down the pipeline
pub struct ReceiveTask {
    conn: Arc<Connection>,
}

impl ReceiveTask {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    pub fn execute(self, engine: &Arc<Engine>) {
        let fd = self.conn.raw_fd();

        match self.conn.drain_into_buffer() {
            Ok(()) => {}
            Err(Error::BufferOverflow) => {
                engine.dispatcher().on_overflow(&self.conn);
                engine.close_connection(&self.conn);
                return;
            }
            Err(Error::ConnectionClosed) => {
                log::debug!("remote end is closed on socket {fd}");
                engine.close_connection(&self.conn);
                return;
            }
            Err(e) => {
                log::error!("error while reading data on socket {fd}: {e}");
                return;
            }
        }

        let Some(prefix) = self.conn.take_complete_prefix() else {
            log::debug!("skip data processing on socket {fd}, no termination yet");
            return;
        };
        // A lone terminator carries nothing worth dispatching
        if prefix == [TERMINATOR] {
            return;
        }

        let payload = String::from_utf8_lossy(&prefix).into_owned();
        engine.post_process(MessageContext::from_sender(&self.conn, payload));
    }
}

/// Hand one framed batch to the protocol dispatcher
pub struct ProcessTask {
    ctx: MessageContext,
}

impl ProcessTask {
    pub fn new(ctx: MessageContext) -> Self {
        Self { ctx }
    }

    pub fn execute(self, engine: &Arc<Engine>) {
        debug_assert!(self.ctx.payload.ends_with(TERMINATOR as char));
        engine.dispatcher().dispatch(self.ctx, engine);
    }
}

/// Deliver composed messages to their targets
///
/// Broadcast construction captures a snapshot of the active connections at
/// submit time so that no registry lock is held during the writes. The
/// sender connection is dropped at construction: delivery must not extend
/// the sender's lifetime.
pub struct WriteAnswerTask {
    sender_fd: RawFd,
    messages: Vec<String>,
    targets: Vec<Arc<Connection>>,
    receiver: Option<Arc<Connection>>,
}

impl WriteAnswerTask {
    /// Deliver `messages` to every connection in `targets` except the
    /// sender's descriptor and listening sockets
    pub fn broadcast(sender_fd: RawFd, messages: Vec<String>, targets: Vec<Arc<Connection>>) -> Self {
        log::debug!("broadcast of {} message(s)", messages.len());
        Self {
            sender_fd,
            messages,
            targets,
            receiver: None,
        }
    }

    /// Deliver one payload to one receiver
    pub fn single(receiver: Arc<Connection>, payload: String) -> Self {
        Self {
            sender_fd: -1,
            messages: vec![payload],
            targets: Vec::new(),
            receiver: Some(receiver),
        }
    }

    pub fn execute(self) {
        if let Some(receiver) = self.receiver {
            let Some(payload) = self.messages.first() else {
                log::error!("attempt to execute an empty write task");
                return;
            };
            if receiver.is_closed() {
                log::debug!("skip write, receiver {} is closed", receiver.raw_fd());
                return;
            }
            if let Err(e) = receiver.write(payload.as_bytes()) {
                log::debug!("write to socket {} failed: {e}", receiver.raw_fd());
            }
            return;
        }

        if self.messages.is_empty() {
            log::error!("attempt to execute an empty broadcast task");
            return;
        }
        for message in &self.messages {
            for target in &self.targets {
                if target.is_listening()
                    || target.is_closed()
                    || target.raw_fd() == self.sender_fd
                {
                    continue;
                }
                if let Err(e) = target.write(message.as_bytes()) {
                    log::debug!("broadcast write to socket {} failed: {e}", target.raw_fd());
                }
            }
        }
    }
}
