/*!
 * Parley Chat Broker Entry Point
 *
 * Wires the chat variant together: logging, signal mask, engine with the
 * chat dispatcher, the listening socket registered directly with the
 * readiness loop, and the signal thread driving orderly shutdown.
 */

use anyhow::{Context, Result};
use clap::Parser;
use parley::net::build_engine;
use parley::{bind_listener, signal, ChatDispatcher, Config};
use std::net::IpAddr;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Multi-user text chat broker
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    tcp_if: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = 5222)]
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
}

fn main() -> Result<()> {
    // Respects RUST_LOG; the numeric loglevel caps it below
    env_logger::init();

    let args = Args::parse();
    let config = Config {
        tcp_if: args.tcp_if,
        tcp_port: args.tcp_port,
        fast_pool_size: args.fast_pool_size,
        slow_pool_size: args.slow_pool_size,
        loglevel: args.loglevel,
        ..Config::default()
    };
    config.validate().context("configuration is invalid")?;
    config.apply_log_level();

    // Install the mask before any thread exists so children inherit it
    signal::block_signals().context("unable to block signals")?;

    let (engine, mut event_loop) = build_engine(&config, Box::new(ChatDispatcher::new()))
        .context("unable to start the engine")?;

    let listener = bind_listener(&config).context("unable to bind listening socket")?;
    engine
        .registry()
        .register(&listener)
        .context("unable to register listening socket")?;
    log::info!(
        "parley listening on {}:{}",
        config.tcp_if,
        config.tcp_port
    );

    let reload_config = config.clone();
    let signal_thread = signal::spawn_signal_thread(engine.clone(), move || {
        // Configuration-file parsing lives outside this process; a reload
        // re-applies the dynamic subset of the startup settings.
        reload_config.apply_log_level();
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
    let _ = signal_thread.join();

    loop_result.context("readiness loop failed")?;
    log::info!("parley shut down");
    Ok(())
}
