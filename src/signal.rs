/*!
 * Signal Thread
 *
 * Lifecycle signals are consumed on a dedicated thread through a blocked
 * signal set and a timed wait. The mask must be installed before any other
 * thread starts so every child inherits it and no signal is delivered to a
 * worker. SIGTERM/SIGINT request orderly shutdown, SIGHUP invokes the
 * reload callback.
 */

use crate::engine::Engine;
use crate::error::{Error, Result};
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Upper bound of one sigtimedwait, in milliseconds
const SIGNAL_WAIT_TIMEOUT_MS: i64 = 300;

/// Signals the engine reacts to
const HANDLED_SIGNALS: [libc::c_int; 3] = [libc::SIGTERM, libc::SIGINT, libc::SIGHUP];

fn handled_sigset() -> libc::sigset_t {
    // Safety: sigemptyset/sigaddset only write into the provided set.
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(set.as_mut_ptr());
        let mut set = set.assume_init();
        for signal in HANDLED_SIGNALS {
            libc::sigaddset(&mut set, signal);
        }
        set
    }
}

/// Block the handled signals on the calling thread
///
/// Call from `main` before spawning anything: child threads inherit the
/// mask, which is what routes the signals to the signal thread's wait.
pub fn block_signals() -> Result<()> {
    let set = handled_sigset();
    // Safety: pthread_sigmask with a valid set; the old mask is not needed.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(Error::System(std::io::Error::from_raw_os_error(rc)));
    }
    Ok(())
}

/// Spawn the thread consuming the blocked set
///
/// Runs until the engine shuts down. `reload` is invoked on SIGHUP and is
/// expected to re-apply the dynamic configuration settings.
pub fn spawn_signal_thread<F>(engine: Arc<Engine>, reload: F) -> Result<JoinHandle<()>>
where
    F: Fn() + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            let set = handled_sigset();
            let timeout = libc::timespec {
                tv_sec: 0,
                tv_nsec: SIGNAL_WAIT_TIMEOUT_MS * 1_000_000,
            };
            loop {
                // Safety: valid set and timeout; siginfo is ignored.
                let signal = unsafe {
                    libc::sigtimedwait(&set, std::ptr::null_mut(), &timeout)
                };
                if signal == -1 {
                    let err = std::io::Error::last_os_error();
                    match err.raw_os_error() {
                        // timeout or interruption: check for shutdown, wait again
                        Some(libc::EAGAIN) | Some(libc::EINTR) => {
                            if engine.shutdown_requested() {
                                break;
                            }
                            continue;
                        }
                        _ => {
                            log::error!("sigtimedwait failed: {err}");
                            break;
                        }
                    }
                }

                log::debug!("signal thread handling signal {signal}");
                match signal {
                    libc::SIGTERM | libc::SIGINT => {
                        engine.shutdown();
                        break;
                    }
                    libc::SIGHUP => {
                        log::info!("reload requested, re-applying dynamic settings");
                        reload();
                    }
                    _ => {}
                }
            }
            log::debug!("exiting signal thread");
        })
        .map_err(Error::System)?;
    Ok(handle)
}
