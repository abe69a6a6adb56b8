/*!
 * Runtime Configuration
 *
 * Plain configuration structures with defaults and validation. Parsing of an
 * on-disk configuration file is an external concern; the binaries fill these
 * from command-line flags and re-apply the dynamic subset on SIGHUP.
 */

use crate::error::{Error, Result};
use crate::message::MAX_MESSAGE_LENGTH;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Bounds for both worker pools
const POOL_SIZE_RANGE: std::ops::RangeInclusive<usize> = 1..=50;

/// Settings shared by the chat and register variants
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the TCP listening socket binds to
    pub tcp_if: IpAddr,
    /// Port the TCP listening socket binds to
    pub tcp_port: u16,
    /// Worker count of the fast (I/O) pool
    pub fast_pool_size: usize,
    /// Worker count of the slow (parse/dispatch) pool
    pub slow_pool_size: usize,
    /// Verbosity 0..=3 (error, warn, info, debug)
    pub loglevel: u8,
    /// Upper bound for one readiness wait
    pub wait_timeout: Duration,
    /// Per-connection receive buffer cap
    pub max_buffered: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_if: IpAddr::from([127, 0, 0, 1]),
            tcp_port: 5222,
            fast_pool_size: 10,
            slow_pool_size: 5,
            loglevel: 2,
            wait_timeout: Duration::from_millis(100),
            max_buffered: MAX_MESSAGE_LENGTH,
        }
    }
}

impl Config {
    /// Reject settings outside their documented ranges
    pub fn validate(&self) -> Result<()> {
        if !POOL_SIZE_RANGE.contains(&self.fast_pool_size) {
            return Err(Error::InvalidArgument(format!(
                "fast_pool_size {} outside 1..=50",
                self.fast_pool_size
            )));
        }
        if !POOL_SIZE_RANGE.contains(&self.slow_pool_size) {
            return Err(Error::InvalidArgument(format!(
                "slow_pool_size {} outside 1..=50",
                self.slow_pool_size
            )));
        }
        if self.loglevel > 3 {
            return Err(Error::InvalidArgument(format!(
                "loglevel {} outside 0..=3",
                self.loglevel
            )));
        }
        Ok(())
    }

    /// Map the numeric level onto the logger's global filter. Safe to call
    /// again after a reload.
    pub fn apply_log_level(&self) {
        let filter = match self.loglevel {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        };
        log::set_max_level(filter);
    }
}

/// When the register variant sleeps relative to request handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    /// Respond no earlier than `sleep` after the request was received
    FromReceipt,
    /// Respond no earlier than `sleep` after execution started
    FromExecution,
    /// Sleep for the full `sleep` right before responding
    Trailing,
}

/// Settings specific to the register variant
#[derive(Debug, Clone)]
pub struct RegisterConfig {
    pub base: Config,
    /// Start in maintenance mode (requests parked, acceptance continues)
    pub maint: bool,
    /// Minimum delay between request receipt and response send
    pub sleep: Duration,
    /// Which of the three delay policies `sleep` follows
    pub delay_policy: DelayPolicy,
    /// Path of the flat-file repository
    pub datafile: PathBuf,
    /// Read chunk size; the request cap is four chunks
    pub buffer_chunk: usize,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            base: Config {
                tcp_port: 5280,
                ..Config::default()
            },
            maint: false,
            sleep: Duration::ZERO,
            delay_policy: DelayPolicy::FromReceipt,
            datafile: PathBuf::from("registrar.db"),
            buffer_chunk: 1600,
        }
    }
}

impl RegisterConfig {
    /// Longest request the server buffers before answering 400 and closing
    pub fn max_request_length(&self) -> usize {
        self.buffer_chunk * 4
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if self.buffer_chunk == 0 {
            return Err(Error::InvalidArgument("buffer_chunk must be > 0".into()));
        }
        Ok(())
    }
}
