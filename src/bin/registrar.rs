/*!
 * Registrar Service Entry Point
 *
 * The register variant: requests are accepted on a dedicated listener
 * thread and handed to the readiness loop through the cross-thread
 * notifier; the dispatcher runs REGISTER/GET against the flat-file
 * repository. SIGHUP re-applies maintenance, sleep and log settings.
 */

use anyhow::{Context, Result};
use clap::Parser;
use parley::net::build_engine;
use parley::{
    notify, signal, BufferedSocket, Config, DelayPolicy, FlatFileRepository, RegisterConfig,
    RegisterDispatcher,
};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// User-registration service
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    tcp_if: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = 5280)]
    tcp_port: u16,

    /// Workers in the fast (I/O) pool
    #[arg(long, default_value_t = 10)]
    fast_pool_size: usize,

    /// Workers in the slow (parse/dispatch) pool
    #[arg(long, default_value_t = 5)]
    slow_pool_size: usize,

    /// Verbosity 0..=3 (error, warn, info, debug)
    #[arg(long, default_value_t = 2)]
    loglevel: u8,

    /// Start in maintenance mode (requests parked, acceptance continues)
    #[arg(long)]
    maint: bool,

    /// Minimum milliseconds between request receipt and response send
    #[arg(long, default_value_t = 0)]
    sleep: u64,

    /// Delay policy: receipt, execution or trailing
    #[arg(long, default_value = "receipt")]
    delay_policy: String,

    /// Path of the flat-file repository
    #[arg(long, default_value = "registrar.db")]
    datafile: PathBuf,
}

fn parse_delay_policy(name: &str) -> Result<DelayPolicy> {
    match name {
        "receipt" => Ok(DelayPolicy::FromReceipt),
        "execution" => Ok(DelayPolicy::FromExecution),
        "trailing" => Ok(DelayPolicy::Trailing),
        other => anyhow::bail!("unknown delay policy '{other}'"),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut config = RegisterConfig {
        base: Config {
            tcp_if: args.tcp_if,
            tcp_port: args.tcp_port,
            fast_pool_size: args.fast_pool_size,
            slow_pool_size: args.slow_pool_size,
            loglevel: args.loglevel,
            ..Config::default()
        },
        maint: args.maint,
        sleep: Duration::from_millis(args.sleep),
        delay_policy: parse_delay_policy(&args.delay_policy)?,
        datafile: args.datafile,
        ..RegisterConfig::default()
    };
    // Requests are capped well below the chat limit
    config.base.max_buffered = config.max_request_length();
    config.validate().context("configuration is invalid")?;
    config.base.apply_log_level();

    signal::block_signals().context("unable to block signals")?;

    // The repository refuses to serve a missing datafile; create it empty
    // on first start so a fresh deployment answers 404 rather than 503.
    if !config.datafile.exists() {
        std::fs::File::create(&config.datafile)
            .with_context(|| format!("unable to create datafile {}", config.datafile.display()))?;
    }
    let repo = Arc::new(FlatFileRepository::new(&config.datafile));

    let dispatcher = Arc::new(RegisterDispatcher::new(
        repo,
        config.sleep,
        config.delay_policy,
    ));
    let dispatcher_handle = dispatcher.clone();

    let (engine, mut event_loop) = build_engine(&config.base, Box::new(dispatcher))
        .context("unable to start the engine")?;

    if config.maint {
        dispatcher_handle.set_maintenance(true, &engine);
    }

    // Dedicated listener thread: accepted sockets reach the readiness set
    // through the notifier, never while a wait is in flight.
    let addr = SocketAddr::new(config.base.tcp_if, config.base.tcp_port);
    let listener = BufferedSocket::listen_on(addr, 100).context("unable to bind listener")?;
    log::info!("registrar listening on {addr}");
    let listener_stop = Arc::new(AtomicBool::new(false));
    let listener_thread = notify::spawn_listener_thread(
        listener,
        engine.clone(),
        config.base.max_buffered,
        listener_stop.clone(),
    )
    .context("unable to start listener thread")?;

    let reload_engine = engine.clone();
    let reload_config = config.clone();
    let signal_thread = signal::spawn_signal_thread(engine.clone(), move || {
        reload_config.base.apply_log_level();
        dispatcher_handle.set_sleep(reload_config.sleep);
        dispatcher_handle.set_maintenance(reload_config.maint, &reload_engine);
    })
    .context("unable to start signal thread")?;

    let loop_thread = std::thread::Builder::new()
        .name("readiness-loop".into())
        .spawn(move || event_loop.run())
        .context("unable to start readiness loop")?;

    let loop_result = loop_thread
        .join()
        .map_err(|_| anyhow::anyhow!("readiness loop panicked"))?;
    engine.shutdown();
    listener_stop.store(true, std::sync::atomic::Ordering::Release);
    let _ = listener_thread.join();
    let _ = signal_thread.join();

    loop_result.context("readiness loop failed")?;
    log::info!("registrar shut down");
    Ok(())
}
