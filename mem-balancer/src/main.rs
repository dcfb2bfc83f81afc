//! mem-balancer — periodic guest memory balloon balancing daemon.
//!
//! Takes one positional argument, the tick interval in seconds, connects
//! to the local hypervisor, and reclaims from memory-rich guests while
//! granting to starved ones, subject to host and guest floors/ceilings.

use std::process::ExitCode;
use std::time::Duration;

use hv_balancer_core::adapter::HypervisorAdapter;
use hv_balancer_core::guest::Guest;
use hv_balancer_core::libvirt_adapter::{LOCAL_URI, LibvirtAdapter};
use hv_balancer_core::mem::{self, MemLoopState, Thresholds};
use hv_balancer_core::runtime;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let interval_secs = match parse_args(std::env::args().skip(1).collect()) {
        Ok(secs) => secs,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::SUCCESS;
        }
    };

    let mut adapter = match LibvirtAdapter::connect(LOCAL_URI) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("failed to connect to hypervisor: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut state = MemLoopState::default();
    match adapter.list_active() {
        Ok(ids) => {
            for id in ids {
                state.guests.push(Guest::new(id));
                if let Err(e) = adapter.set_mem_stats_period(id, interval_secs as i32) {
                    eprintln!("failed to enable memory stats for guest: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        Err(e) => {
            eprintln!("failed to enumerate guests: {e}");
            return ExitCode::FAILURE;
        }
    }
    tracing::info!(guests = state.guests.len(), "mem-balancer starting");

    let thresholds = Thresholds::default();
    let shutdown = runtime::install_shutdown_handler();
    let result = runtime::run_loop(Duration::from_secs(interval_secs), &shutdown, || {
        mem::tick(&adapter, &mut state, &thresholds).map(|_report| ())
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("adapter error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Parses the single positional `interval` argument.
///
/// Mirrors `cpu-balancer`'s contract: a wrong argument count or a
/// non-positive/non-numeric interval is a configuration error, reported
/// and exited with status 0 without opening a hypervisor session.
fn parse_args(args: Vec<String>) -> Result<u64, String> {
    if args.len() != 1 {
        return Err("usage: mem-balancer <interval-seconds>".to_string());
    }
    match args[0].parse::<u64>() {
        Ok(0) | Err(_) => Err(format!(
            "interval must be a positive integer, got {:?}",
            args[0]
        )),
        Ok(secs) => Ok(secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_argument_count() {
        assert!(parse_args(vec![]).is_err());
        assert!(parse_args(vec!["5".into(), "6".into()]).is_err());
    }

    #[test]
    fn rejects_non_numeric_interval() {
        assert!(parse_args(vec!["five".into()]).is_err());
    }

    #[test]
    fn accepts_positive_interval() {
        assert_eq!(parse_args(vec!["10".into()]), Ok(10));
    }
}
