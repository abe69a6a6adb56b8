use parley::{
    build_engine, notify, BufferedSocket, Config, DelayPolicy, Engine, FlatFileRepository,
    RegisterConfig, RegisterDispatcher,
};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

static FILE_COUNTER: AtomicUsize = AtomicUsize::new(0);

struct TempDatafile(PathBuf);

impl TempDatafile {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!(
            "parley-register-{}-{}.db",
            std::process::id(),
            FILE_COUNTER.fetch_add(1, Ordering::Relaxed),
        ));
        std::fs::write(&path, b"").expect("create datafile");
        Self(path)
    }
}

impl Drop for TempDatafile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

struct Registrar {
    addr: SocketAddr,
    engine: Arc<Engine>,
    dispatcher: Arc<RegisterDispatcher>,
    listener_stop: Arc<AtomicBool>,
    loop_thread: Option<JoinHandle<()>>,
    listener_thread: Option<JoinHandle<()>>,
    _datafile: TempDatafile,
}

/// In-process registrar: listener thread + notifier + readiness loop,
/// wired the way the binary wires them
fn start_registrar(sleep: Duration) -> Registrar {
    let datafile = TempDatafile::new();
    let mut config = RegisterConfig {
        base: Config {
            tcp_port: 0,
            fast_pool_size: 4,
            slow_pool_size: 2,
            ..Config::default()
        },
        sleep,
        delay_policy: DelayPolicy::FromReceipt,
        ..RegisterConfig::default()
    };
    config.base.max_buffered = config.max_request_length();

    let repo = Arc::new(FlatFileRepository::new(&datafile.0));
    let dispatcher = Arc::new(RegisterDispatcher::new(repo, sleep, config.delay_policy));

    let (engine, mut event_loop) =
        build_engine(&config.base, Box::new(dispatcher.clone())).expect("engine");

    let listener =
        BufferedSocket::listen_on("127.0.0.1:0".parse().unwrap(), 100).expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let listener_stop = Arc::new(AtomicBool::new(false));
    let listener_thread = notify::spawn_listener_thread(
        listener,
        engine.clone(),
        config.base.max_buffered,
        listener_stop.clone(),
    )
    .expect("listener thread");

    let loop_thread = std::thread::spawn(move || {
        let _ = event_loop.run();
    });

    Registrar {
        addr,
        engine,
        dispatcher,
        listener_stop,
        loop_thread: Some(loop_thread),
        listener_thread: Some(listener_thread),
        _datafile: datafile,
    }
}

impl Drop for Registrar {
    fn drop(&mut self) {
        self.engine.shutdown();
        self.listener_stop.store(true, Ordering::Release);
        if let Some(handle) = self.loop_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.listener_thread.take() {
            let _ = handle.join();
        }
    }
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

    fn request(&mut self, line: &str) -> String {
        self.stream
            .write_all(format!("{line}\r\n").as_bytes())
            .expect("send");
        self.read_response()
    }

    fn read_response(&mut self) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut line = String::new();
        loop {
            match self.reader.read_line(&mut line) {
                Ok(0) => panic!("connection closed while waiting for a response"),
                Ok(_) if line.ends_with('\n') => return line.trim_end().to_string(),
                Ok(_) => continue,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    assert!(Instant::now() < deadline, "timed out waiting for response");
                }
                Err(e) => panic!("read failed: {e}"),
            }
        }
    }
}

#[test]
fn register_get_conflict_cycle() {
    let server = start_registrar(Duration::ZERO);
    let mut client = Client::connect(server.addr);

    assert_eq!(
        client.request("REGISTER username=John; email=john@a.com"),
        "200 OK"
    );
    assert_eq!(
        client.request("REGISTER username=John; email=john@a.com"),
        "409 Conflict"
    );
    assert_eq!(
        client.request("GET username=John"),
        "200 OK email=john@a.com"
    );
    assert_eq!(client.request("GET username=Jane"), "404 Not Found");
}

#[test]
fn invalid_input_maps_to_the_right_codes() {
    let server = start_registrar(Duration::ZERO);
    let mut client = Client::connect(server.addr);

    assert_eq!(client.request("FROB username=x"), "400 Bad request");
    assert_eq!(
        client.request("REGISTER username=; email=a@b.com"),
        "406 Not Acceptable"
    );
    assert_eq!(
        client.request("REGISTER username=Jane; email=not-an-email"),
        "406 Not Acceptable"
    );
}

#[test]
fn requests_are_parked_during_maintenance_and_replayed() {
    let server = start_registrar(Duration::ZERO);
    let mut client = Client::connect(server.addr);

    // settle the connection first
    assert_eq!(
        client.request("REGISTER username=Ann; email=ann@b.com"),
        "200 OK"
    );

    server.dispatcher.set_maintenance(true, &server.engine);
    client
        .stream
        .write_all(b"GET username=Ann\r\n")
        .expect("send");

    // nothing may come back while maintenance is on
    let mut probe = String::new();
    std::thread::sleep(Duration::from_millis(300));
    assert!(client.reader.read_line(&mut probe).is_err(), "got: {probe:?}");

    server.dispatcher.set_maintenance(false, &server.engine);
    assert_eq!(client.read_response(), "200 OK email=ann@b.com");
}

#[test]
fn responses_honor_the_receipt_delay() {
    let server = start_registrar(Duration::from_millis(300));
    let mut client = Client::connect(server.addr);

    let started = Instant::now();
    assert_eq!(
        client.request("REGISTER username=Slow; email=s@l.ow"),
        "200 OK"
    );
    assert!(
        started.elapsed() >= Duration::from_millis(250),
        "response arrived after only {:?}",
        started.elapsed()
    );
}

#[test]
fn pipelined_requests_each_get_a_response() {
    let server = start_registrar(Duration::ZERO);
    let mut client = Client::connect(server.addr);

    client
        .stream
        .write_all(b"REGISTER username=P1; email=p1@x.com\r\nGET username=P1\r\n")
        .expect("send");
    assert_eq!(client.read_response(), "200 OK");
    assert_eq!(client.read_response(), "200 OK email=p1@x.com");
}
