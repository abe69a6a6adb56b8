/*!
 * Wire Constants and Message Context
 *
 * Shared definitions for the framed text protocol and the context structure
 * that the pipeline tasks pass between each other (receive -> process ->
 * write answer).
 */

use crate::connection::Connection;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Instant;

/// Byte that marks end-of-message on the wire
pub const TERMINATOR: u8 = b'\n';

/// Byte that marks a frame as a command rather than chat
pub const SERVICE_SENTINEL: u8 = b'\\';

/// Sender name used in server-originated lines; also a reserved nickname
pub const SERVER_SENDER_NAME: &str = "SERVER";

/// Maximum buffered input across all frames per connection
pub const MAX_MESSAGE_LENGTH: usize = 8192;

/// Maximum accepted nickname length
pub const MAX_NICKNAME_LENGTH: usize = 50;

/// Message context passed between pipeline tasks
///
/// Carries the raw framed payload together with the sender/receiver
/// connections. The sender reference is dropped as soon as a task no longer
/// needs it so that a broadcast does not extend the sender's lifetime.
pub struct MessageContext {
    /// Descriptor of the socket the data was received from
    pub sender_fd: RawFd,
    /// Connection that sent the initial message (nullable after hand-off)
    pub sender: Option<Arc<Connection>>,
    /// Connection the message will be sent to (nullable for broadcast)
    pub receiver: Option<Arc<Connection>>,
    /// Display name of the sender
    pub sender_name: String,
    /// Raw framed payload; always ends with [`TERMINATOR`] when handed to
    /// the slow pool
    pub payload: String,
    /// When the payload was taken off the socket; drives the register
    /// variant's response delay policies
    pub received_at: Instant,
}

impl MessageContext {
    /// Context for data read from a client socket
    pub fn from_sender(conn: &Arc<Connection>, payload: String) -> Self {
        Self {
            sender_fd: conn.raw_fd(),
            sender: Some(Arc::clone(conn)),
            receiver: None,
            sender_name: conn.username(),
            payload,
            received_at: Instant::now(),
        }
    }

    /// Context for a server-originated message addressed to one connection
    pub fn from_server(receiver: &Arc<Connection>, payload: String) -> Self {
        Self {
            sender_fd: receiver.raw_fd(),
            sender: None,
            receiver: Some(Arc::clone(receiver)),
            sender_name: SERVER_SENDER_NAME.to_string(),
            payload,
            received_at: Instant::now(),
        }
    }
}
