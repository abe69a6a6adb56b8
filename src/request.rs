/*!
 * Register Request Dispatcher
 *
 * The register variant replaces the chat command machine with a request
 * dispatcher over two verbs: `REGISTER username=<u>; email=<e>` and
 * `GET username=<u>`. Requests arrive as CRLF-terminated ASCII lines and
 * every outcome maps to a numeric response code.
 */

use crate::config::DelayPolicy;
use crate::connection::Connection;
use crate::engine::{Dispatcher, Engine};
use crate::error::Error;
use crate::message::MessageContext;
use crate::repo::Repository;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RESP_OK: &str = "200 OK";
const RESP_BAD_REQUEST: &str = "400 Bad request";
const RESP_NOT_FOUND: &str = "404 Not Found";
const RESP_OVERLOADED: &str = "405 Overloaded";
const RESP_NOT_ACCEPTABLE: &str = "406 Not Acceptable";
const RESP_CONFLICT: &str = "409 Conflict";
const RESP_UNAVAILABLE: &str = "503 Service unavailable";

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register { username: String, email: String },
    Get { username: String },
}

/// Strip `keyword` from the front of `input`, ASCII case-insensitive
fn strip_keyword_ci<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let head = input.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(&input[keyword.len()..])
    } else {
        None
    }
}

/// Strip a `<key> = ` assignment prefix, blanks tolerated around `=`
fn strip_assignment<'a>(input: &'a str, key: &str) -> Option<&'a str> {
    let rest = strip_keyword_ci(input.trim_start_matches([' ', '\t']), key)?;
    let rest = rest.trim_start_matches([' ', '\t']);
    let rest = rest.strip_prefix('=')?;
    Some(rest.trim_start_matches([' ', '\t']))
}

/// Parse one request line (no terminator). Verbs are case-insensitive and
/// blank-tolerant; argument values are validated later by the repository.
pub fn parse_request(line: &str) -> Option<Request> {
    let line = line.trim_matches([' ', '\t']);

    if let Some(rest) = strip_keyword_ci(line, "REGISTER") {
        // at least one blank between the verb and the first key
        if !rest.starts_with([' ', '\t']) {
            return None;
        }
        let rest = strip_assignment(rest, "username")?;
        let (username, rest) = rest.split_once(';')?;
        let email = strip_assignment(rest, "email")?;
        return Some(Request::Register {
            username: username.trim_matches([' ', '\t']).to_string(),
            email: email.trim_matches([' ', '\t']).to_string(),
        });
    }

    if let Some(rest) = strip_keyword_ci(line, "GET") {
        if !rest.starts_with([' ', '\t']) {
            return None;
        }
        let username = strip_assignment(rest, "username")?;
        return Some(Request::Get {
            username: username.trim_matches([' ', '\t']).to_string(),
        });
    }

    None
}

/// Register protocol dispatcher
///
/// Holds the repository, the maintenance switch (requests are parked while
/// it is on, acceptance continues) and the response delay settings.
pub struct RegisterDispatcher {
    repo: Arc<dyn Repository>,
    maint: AtomicBool,
    sleep: Mutex<Duration>,
    delay_policy: DelayPolicy,
    parked: Mutex<Vec<MessageContext>>,
}

impl RegisterDispatcher {
    pub fn new(repo: Arc<dyn Repository>, sleep: Duration, delay_policy: DelayPolicy) -> Self {
        Self {
            repo,
            maint: AtomicBool::new(false),
            sleep: Mutex::new(sleep),
            delay_policy,
            parked: Mutex::new(Vec::new()),
        }
    }

    pub fn maintenance(&self) -> bool {
        self.maint.load(Ordering::Acquire)
    }

    /// Toggle maintenance mode; leaving it replays every parked request
    pub fn set_maintenance(&self, on: bool, engine: &Arc<Engine>) {
        self.maint.store(on, Ordering::Release);
        if on {
            log::info!("maintenance mode enabled, parking incoming requests");
            return;
        }
        let parked = std::mem::take(&mut *self.parked.lock());
        if !parked.is_empty() {
            log::info!("maintenance lifted, replaying {} request batch(es)", parked.len());
        }
        for ctx in parked {
            engine.post_process(ctx);
        }
    }

    /// Adjust the response delay (SIGHUP reload)
    pub fn set_sleep(&self, sleep: Duration) {
        *self.sleep.lock() = sleep;
    }

    /// Run one request line against the repository, producing the response
    /// phrase without its CRLF
    fn process_line(&self, line: &str) -> String {
        log::debug!("processing request '{line}'");
        match parse_request(line) {
            Some(Request::Register { username, email }) => {
                log::debug!("REGISTER username='{username}' email='{email}'");
                match self.repo.register(&username, &email) {
                    Ok(()) => RESP_OK.to_string(),
                    Err(Error::InvalidArgument(_)) => RESP_NOT_ACCEPTABLE.to_string(),
                    Err(Error::AlreadyDefined) => RESP_CONFLICT.to_string(),
                    Err(Error::Resource(_)) => RESP_OVERLOADED.to_string(),
                    Err(_) => RESP_UNAVAILABLE.to_string(),
                }
            }
            Some(Request::Get { username }) => {
                log::debug!("GET username='{username}'");
                match self.repo.lookup(&username) {
                    Ok(email) => format!("{RESP_OK} email={email}"),
                    Err(Error::NotFound) => RESP_NOT_FOUND.to_string(),
                    Err(_) => RESP_UNAVAILABLE.to_string(),
                }
            }
            None => {
                log::warn!("bad request, command not recognized");
                RESP_BAD_REQUEST.to_string()
            }
        }
    }

    /// Hold the response back according to the configured delay policy
    fn apply_delay(&self, received_at: Instant, execution_started: Instant) {
        let sleep = *self.sleep.lock();
        if sleep.is_zero() {
            return;
        }
        match self.delay_policy {
            DelayPolicy::FromReceipt => {
                let target = received_at + sleep;
                let now = Instant::now();
                if target > now {
                    std::thread::sleep(target - now);
                }
            }
            DelayPolicy::FromExecution => {
                let target = execution_started + sleep;
                let now = Instant::now();
                if target > now {
                    std::thread::sleep(target - now);
                }
            }
            DelayPolicy::Trailing => std::thread::sleep(sleep),
        }
    }

    fn respond(&self, conn: &Arc<Connection>, response: &str) {
        if conn.is_closed() {
            log::debug!("connection is gone already, dropping response");
            return;
        }
        if let Err(e) = conn.write(format!("{response}\r\n").as_bytes()) {
            log::debug!("response write to socket {} failed: {e}", conn.raw_fd());
        }
    }
}

impl Dispatcher for RegisterDispatcher {
    fn dispatch(&self, ctx: MessageContext, _engine: &Arc<Engine>) {
        if self.maintenance() {
            log::debug!("maintenance mode, parking batch from socket {}", ctx.sender_fd);
            self.parked.lock().push(ctx);
            return;
        }

        let Some(sender) = ctx.sender.clone() else {
            log::error!("request batch without an originating connection");
            return;
        };

        for line in ctx.payload.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let execution_started = Instant::now();
            let response = self.process_line(line);
            self.apply_delay(ctx.received_at, execution_started);
            log::debug!("response for request '{line}' is ready: {response}");
            self.respond(&sender, &response);
        }
    }

    fn on_overflow(&self, conn: &Arc<Connection>) {
        if let Err(e) = conn.write(format!("{RESP_BAD_REQUEST}\r\n").as_bytes()) {
            log::debug!("overflow reply to socket {} failed: {e}", conn.raw_fd());
        }
    }
}
