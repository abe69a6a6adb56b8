/*!
 * Chat Command State Machine
 *
 * Frames that begin with the service sentinel are parsed against the
 * command grammar and executed here; everything else is chat. Unknown or
 * malformed service frames deliberately fall back to plain chat so that
 * user text starting with a backslash is never lost.
 */

use crate::connection::Connection;
use crate::engine::{Dispatcher, Engine};
use crate::error::Error;
use crate::message::{
    MessageContext, MAX_NICKNAME_LENGTH, SERVER_SENDER_NAME, SERVICE_SENTINEL, TERMINATOR,
};
use crate::task::WriteAnswerTask;
use std::sync::Arc;

/// Parsed service command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCommand {
    /// `\help` - fixed help text to the sender
    Help,
    /// `\listall` - list of active participants to the sender
    ListAll,
    /// `\nickname <new nickname>` - claim a new nickname
    Nickname(String),
    /// `\private <nickname> <message>` - message one participant
    Private { target: String, text: String },
    /// `\quit` - close the sender's connection
    Quit,
    /// `\intro` - welcome for a new user, service account only
    Intro,
}

/// Parse one service frame: `\<cmd>[ <arg>][ <tail>]<terminator>`
///
/// The command name is case-sensitive ASCII letters; the argument is one
/// alphanumeric token; the tail is everything after it. Returns None for
/// anything that does not match the grammar, which callers treat as chat.
pub fn parse_service_frame(frame: &str) -> Option<ServiceCommand> {
    let body = frame.strip_suffix(TERMINATOR as char)?;
    let body = body.strip_suffix('\r').unwrap_or(body);
    let body = body.strip_prefix(SERVICE_SENTINEL as char)?;

    let name_len = body
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .count();
    if name_len == 0 {
        return None;
    }
    let (name, rest) = body.split_at(name_len);
    if !rest.is_empty() && !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return None;
    }

    // One alphanumeric token makes the argument; a token with other
    // characters in it belongs to the tail instead.
    let trimmed = rest.trim_start();
    let token_len = trimmed
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric())
        .count();
    let after = &trimmed[token_len..];
    let (arg, tail) = if token_len > 0
        && (after.is_empty() || after.starts_with(|c: char| c.is_ascii_whitespace()))
    {
        (&trimmed[..token_len], after.trim_start())
    } else {
        ("", trimmed)
    };

    match name {
        "help" => Some(ServiceCommand::Help),
        "listall" => Some(ServiceCommand::ListAll),
        "nickname" => Some(ServiceCommand::Nickname(arg.to_string())),
        "private" => Some(ServiceCommand::Private {
            target: arg.to_string(),
            text: tail.to_string(),
        }),
        "quit" => Some(ServiceCommand::Quit),
        "intro" => Some(ServiceCommand::Intro),
        _ => None,
    }
}

/// Check a nickname for length and reserved names
pub fn validate_nickname(nickname: &str) -> Result<(), String> {
    if nickname.is_empty()
        || nickname.len() > MAX_NICKNAME_LENGTH
        || nickname.eq_ignore_ascii_case(SERVER_SENDER_NAME)
    {
        return Err(format!(
            "Nickname error: \n\
             Nickname can contain only letters [a-z] and digits [0-9].\n\
             Empty nicknames are not allowed.\n\
             Maximum length of nickname is {MAX_NICKNAME_LENGTH} symbols.\n\
             Nickname cannot be the '{SERVER_SENDER_NAME}' service name."
        ));
    }
    Ok(())
}

fn help_text() -> String {
    format!(
        "Help message for the {} version {}:\n\
         \tList of commands available:\n\
         \t\\help - produces this help message\n\
         \t\\quit - quit chat\n\
         \t\\listall - list all active participants\n\
         \t\\nickname <new nickname> - change your nickname to a new one\n\
         \t\\private <nickname> <message> - post a private message to the dedicated participant",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )
}

fn intro_text(username: &str) -> String {
    format!(
        "Hello! You have just entered the chat server ({} v{}). \
         Your current nickname '{username}' is an auto-generated nickname, you may want \
         to use the '\\nickname' command to change it. For a detailed list of available \
         commands and options please use the \\help command.",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )
}

/// Chat protocol dispatcher: classifies frames, executes commands and
/// composes the outbound messages
pub struct ChatDispatcher;

impl ChatDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Reply to the originating connection with a `SERVER>` line
    fn post_server_message(&self, ctx: &MessageContext, text: &str, engine: &Arc<Engine>) {
        let Some(sender) = ctx.sender.clone() else {
            log::debug!("no originating connection for server reply");
            return;
        };
        let payload = format!("{SERVER_SENDER_NAME}> {text}\n");
        engine.post_fast(Box::new(move || {
            WriteAnswerTask::single(sender, payload).execute();
        }));
    }

    /// Flush collected chat lines as one broadcast over a fresh snapshot
    fn flush_chat(&self, ctx: &MessageContext, pending: &mut Vec<String>, engine: &Arc<Engine>) {
        if pending.is_empty() {
            return;
        }
        let messages = std::mem::take(pending);
        let targets = engine.registry().active_snapshot();
        let sender_fd = ctx.sender_fd;
        engine.post_fast(Box::new(move || {
            WriteAnswerTask::broadcast(sender_fd, messages, targets).execute();
        }));
    }

    /// Execute one service command. `Err(ConnectionClosed)` stops the batch;
    /// any other error sends the frame back through the chat fallback.
    fn execute_service(
        &self,
        command: ServiceCommand,
        ctx: &mut MessageContext,
        pending: &mut Vec<String>,
        engine: &Arc<Engine>,
    ) -> crate::Result<()> {
        match command {
            ServiceCommand::Quit => {
                if let Some(sender) = &ctx.sender {
                    engine.close_connection(sender);
                }
                Err(Error::ConnectionClosed)
            }
            ServiceCommand::Help => {
                self.post_server_message(ctx, &help_text(), engine);
                Ok(())
            }
            ServiceCommand::ListAll => {
                let mut text = String::from("Active users: ");
                for conn in engine.registry().active_snapshot() {
                    if conn.is_listening() || conn.is_closed() {
                        continue;
                    }
                    text.push(TERMINATOR as char);
                    text.push(' ');
                    text.push_str(&conn.username());
                }
                self.post_server_message(ctx, &text, engine);
                Ok(())
            }
            ServiceCommand::Nickname(nickname) => {
                if let Err(message) = validate_nickname(&nickname) {
                    self.post_server_message(ctx, &message, engine);
                    return Ok(());
                }
                match engine.registry().assign_username(ctx.sender_fd, &nickname) {
                    Err(Error::AlreadyDefined) => {
                        let message = format!(
                            "Nickname '{nickname}' is already in use. Please try another one."
                        );
                        self.post_server_message(ctx, &message, engine);
                        Ok(())
                    }
                    Err(e) => {
                        log::error!(
                            "unable to set username '{nickname}' for socket {}: {e}",
                            ctx.sender_fd
                        );
                        Err(e)
                    }
                    Ok(()) => {
                        self.post_server_message(ctx, "ok.", engine);
                        pending.push(format!(
                            "{SERVER_SENDER_NAME}> User '{}' is now known as '{nickname}'\n",
                            ctx.sender_name
                        ));
                        ctx.sender_name = nickname;
                        Ok(())
                    }
                }
            }
            ServiceCommand::Private { target, text } => {
                if target == ctx.sender_name {
                    self.post_server_message(
                        ctx,
                        "Private loop-back messages are not allowed.",
                        engine,
                    );
                    return Ok(());
                }
                if let Err(message) = validate_nickname(&target) {
                    self.post_server_message(ctx, &message, engine);
                    return Ok(());
                }
                match engine.registry().find_by_username(&target) {
                    Err(_) => {
                        let message =
                            format!("User with the nickname '{target}' doesn't exist.");
                        self.post_server_message(ctx, &message, engine);
                        Ok(())
                    }
                    Ok(receiver) => {
                        let payload = format!("{}:private> {text}\n", ctx.sender_name);
                        engine.post_fast(Box::new(move || {
                            WriteAnswerTask::single(receiver, payload).execute();
                        }));
                        Ok(())
                    }
                }
            }
            ServiceCommand::Intro => {
                // Reserved for the service account; anyone else typing
                // "\intro" is dropped without an echo.
                if ctx.sender_name != SERVER_SENDER_NAME {
                    return Ok(());
                }
                let Some(receiver) = ctx.receiver.clone() else {
                    return Ok(());
                };
                let payload = format!(
                    "{SERVER_SENDER_NAME}> {}\n",
                    intro_text(&receiver.username())
                );
                engine.post_fast(Box::new(move || {
                    WriteAnswerTask::single(receiver, payload).execute();
                }));
                Ok(())
            }
        }
    }
}

impl Default for ChatDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for ChatDispatcher {
    fn dispatch(&self, mut ctx: MessageContext, engine: &Arc<Engine>) {
        log::debug!("processing batch from socket {}", ctx.sender_fd);
        let frames: Vec<String> = ctx
            .payload
            .split_inclusive(TERMINATOR as char)
            .map(str::to_string)
            .collect();
        let mut pending: Vec<String> = Vec::new();

        for frame in frames {
            if frame.as_bytes().first() == Some(&SERVICE_SENTINEL) {
                // A state change must not be reordered behind earlier chat:
                // flush what has accumulated before running the command.
                self.flush_chat(&ctx, &mut pending, engine);
                match parse_service_frame(&frame) {
                    Some(command) => {
                        match self.execute_service(command, &mut ctx, &mut pending, engine) {
                            Ok(()) => {}
                            Err(Error::ConnectionClosed) => break,
                            Err(_) => {
                                pending.push(format!("{}> {frame}", ctx.sender_name));
                            }
                        }
                    }
                    // Wrong command from the user: keep it as plain chat
                    None => pending.push(format!("{}> {frame}", ctx.sender_name)),
                }
            } else {
                pending.push(format!("{}> {frame}", ctx.sender_name));
            }
        }

        self.flush_chat(&ctx, &mut pending, engine);
    }

    fn on_accept(&self, conn: &Arc<Connection>, engine: &Arc<Engine>) {
        conn.set_username("");
        let username = conn.username();

        let join = MessageContext::from_server(
            conn,
            format!("User '{username}' has joined the chat\n"),
        );
        engine.post_process(join);

        let intro = MessageContext::from_server(conn, format!("{}intro\n", SERVICE_SENTINEL as char));
        engine.post_process(intro);
    }

    fn on_disconnect(&self, conn: &Arc<Connection>, engine: &Arc<Engine>) {
        if conn.is_listening() {
            return;
        }
        let farewell = MessageContext::from_server(
            conn,
            format!("User '{}' has left the chat\n", conn.username()),
        );
        engine.post_process(farewell);
    }

    fn on_overflow(&self, conn: &Arc<Connection>) {
        let reply =
            format!("{SERVER_SENDER_NAME}> Message length exceeded, connection will be closed.\n");
        if let Err(e) = conn.write(reply.as_bytes()) {
            log::debug!("overflow reply to socket {} failed: {e}", conn.raw_fd());
        }
    }
}
