use parley::{bind_listener, build_engine, ChatDispatcher, Config, Engine};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// In-process chat server on an ephemeral port
fn start_chat_server() -> (SocketAddr, Arc<Engine>, JoinHandle<()>) {
    let config = Config {
        tcp_port: 0,
        fast_pool_size: 4,
        slow_pool_size: 2,
        ..Config::default()
    };
    let (engine, mut event_loop) =
        build_engine(&config, Box::new(ChatDispatcher::new())).expect("engine");
    let listener = bind_listener(&config).expect("bind");
    let addr = listener.local_addr().expect("local addr");
    engine.registry().register(&listener).expect("register listener");

    let handle = std::thread::spawn(move || {
        let _ = event_loop.run();
    });
    (addr, engine, handle)
}

struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .expect("read timeout");
        let reader = BufReader::new(stream.try_clone().expect("clone"));
        Self { stream, reader }
    }

    fn send(&mut self, data: &str) {
        self.stream.write_all(data.as_bytes()).expect("send");
    }

    /// Next complete line, or None on remote close
    fn read_line_before(&mut self, deadline: Instant) -> Option<String> {
        let mut line = String::new();
        loop {
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) if line.ends_with('\n') => return Some(line),
                Ok(_) => continue,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    assert!(
                        Instant::now() < deadline,
                        "timed out waiting for a line, buffered so far: {line:?}"
                    );
                }
                Err(e) => panic!("read failed: {e}"),
            }
        }
    }

    /// Scan lines until one contains `needle`, skipping unrelated traffic
    fn expect_line(&mut self, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match self.read_line_before(deadline) {
                Some(line) if line.contains(needle) => return line,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {needle:?}"),
            }
        }
    }

    /// Assert nothing arrives for a short grace period
    fn expect_silence(&mut self) {
        let mut line = String::new();
        let deadline = Instant::now() + Duration::from_millis(300);
        while Instant::now() < deadline {
            match self.reader.read_line(&mut line) {
                Ok(0) => panic!("connection closed during silence check"),
                Ok(_) => panic!("unexpected line: {line:?}"),
                Err(_) => {}
            }
        }
    }

    /// Wait for the remote end to close the connection
    fn expect_close(&mut self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut line = String::new();
        loop {
            match self.reader.read_line(&mut line) {
                Ok(0) => return,
                Ok(_) => line.clear(),
                Err(_) => assert!(Instant::now() < deadline, "remote never closed"),
            }
        }
    }
}

#[test]
fn chat_is_broadcast_to_everyone_but_the_sender() {
    let (addr, engine, handle) = start_chat_server();

    let mut a = Client::connect(addr);
    a.expect_line("You have just entered the chat server");
    let mut b = Client::connect(addr);
    b.expect_line("You have just entered the chat server");
    a.expect_line("has joined the chat");

    a.send("hello\n");
    let line = b.expect_line("> hello");
    assert!(line.starts_with("user_"), "unexpected prefix: {line:?}");
    a.expect_silence();

    engine.shutdown();
    let _ = handle.join();
}

#[test]
fn nickname_changes_are_confirmed_and_announced() {
    let (addr, engine, handle) = start_chat_server();

    let mut a = Client::connect(addr);
    a.expect_line("You have just entered the chat server");
    let mut b = Client::connect(addr);
    b.expect_line("You have just entered the chat server");
    a.expect_line("has joined the chat");

    a.send("\\nickname alice\n");
    a.expect_line("SERVER> ok.");
    b.expect_line("is now known as 'alice'");

    // the name is taken now, by anyone including its current owner
    b.send("\\nickname alice\n");
    b.expect_line("already in use");
    a.send("\\nickname alice\n");
    a.expect_line("already in use");

    engine.shutdown();
    let _ = handle.join();
}

#[test]
fn private_messages_reach_only_their_target() {
    let (addr, engine, handle) = start_chat_server();

    let mut a = Client::connect(addr);
    a.expect_line("You have just entered the chat server");
    let mut b = Client::connect(addr);
    b.expect_line("You have just entered the chat server");
    a.expect_line("has joined the chat");

    a.send("\\nickname alice\n");
    a.expect_line("SERVER> ok.");
    b.expect_line("is now known as 'alice'");

    a.send("\\private bob hi there\n");
    a.expect_line("User with the nickname 'bob' doesn't exist.");

    b.send("\\nickname bob\n");
    b.expect_line("SERVER> ok.");
    a.expect_line("is now known as 'bob'");

    a.send("\\private bob hi there\n");
    b.expect_line("alice:private> hi there");

    a.send("\\private alice loop\n");
    a.expect_line("loop-back messages are not allowed");

    engine.shutdown();
    let _ = handle.join();
}

#[test]
fn help_and_listall_answer_the_sender() {
    let (addr, engine, handle) = start_chat_server();

    let mut a = Client::connect(addr);
    a.expect_line("You have just entered the chat server");

    a.send("\\help\n");
    a.expect_line("List of commands available");

    a.send("\\listall\n");
    a.expect_line("Active users:");
    a.expect_line("user_");

    engine.shutdown();
    let _ = handle.join();
}

#[test]
fn unknown_commands_fall_back_to_chat() {
    let (addr, engine, handle) = start_chat_server();

    let mut a = Client::connect(addr);
    a.expect_line("You have just entered the chat server");
    let mut b = Client::connect(addr);
    b.expect_line("You have just entered the chat server");
    a.expect_line("has joined the chat");

    a.send("\\frobnicate now\n");
    b.expect_line("\\frobnicate now");

    engine.shutdown();
    let _ = handle.join();
}

#[test]
fn oversized_input_gets_an_error_and_a_close() {
    let (addr, engine, handle) = start_chat_server();

    let mut a = Client::connect(addr);
    a.expect_line("You have just entered the chat server");

    let blob = vec![b'z'; 9000];
    a.stream.write_all(&blob).expect("write blob");
    a.expect_line("Message length exceeded");
    a.expect_close();

    // the close implies the deferred delete already ran: only the
    // listening connection remains registered
    assert_eq!(engine.registry().len(), 1);

    engine.shutdown();
    let _ = handle.join();
}

#[test]
fn quit_closes_the_connection_and_says_farewell() {
    let (addr, engine, handle) = start_chat_server();

    let mut a = Client::connect(addr);
    a.expect_line("You have just entered the chat server");
    let mut b = Client::connect(addr);
    b.expect_line("You have just entered the chat server");
    a.expect_line("has joined the chat");

    b.send("\\quit\n");
    b.expect_close();
    a.expect_line("has left the chat");

    engine.shutdown();
    let _ = handle.join();
}
