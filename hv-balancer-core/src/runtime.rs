//! Shared tick loop and SIGINT-driven shutdown flag.
//!
//! Both balancer binaries run the same shape: sleep for the configured
//! interval, run one tick to completion, repeat until asked to stop.
//! Shutdown is only ever observed between ticks — a tick in progress
//! always finishes — mirroring how the maintenance/export daemon
//! threads this design is adapted from run to completion each pass
//! rather than checking a flag mid-work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Installs a `SIGINT` handler that flips a shared flag instead of
/// terminating the process immediately, and returns it.
///
/// # Panics
///
/// Panics if a handler is already installed (`ctrlc` only allows one
/// per process); both balancer binaries call this exactly once at
/// startup.
pub fn install_shutdown_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested, finishing current tick");
        flag.store(true, Ordering::SeqCst);
    })
    .expect("failed to install SIGINT handler");
    shutdown
}

/// Runs `tick` every `interval`, forever, until `shutdown` is set.
///
/// The first tick runs immediately; the interval is slept *after* each
/// tick, so a slow tick never compounds with the sleep. `tick` returning
/// `Err` is treated as fatal and propagated — this design has no retry
/// or backoff policy for hypervisor errors.
pub fn run_loop<E>(
    interval: Duration,
    shutdown: &AtomicBool,
    mut tick: impl FnMut() -> Result<(), E>,
) -> Result<(), E> {
    loop {
        tick()?;
        std::thread::sleep(interval);
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("shutdown flag observed, exiting cleanly");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn stops_after_shutdown_flag_set() {
        let shutdown = AtomicBool::new(false);
        let count = AtomicUsize::new(0);
        let result: Result<(), ()> = run_loop(Duration::from_millis(0), &shutdown, || {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= 3 {
                shutdown.store(true, Ordering::SeqCst);
            }
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn propagates_tick_error() {
        let shutdown = AtomicBool::new(false);
        let result: Result<(), &'static str> =
            run_loop(Duration::from_millis(0), &shutdown, || Err("boom"));
        assert_eq!(result, Err("boom"));
    }
}
