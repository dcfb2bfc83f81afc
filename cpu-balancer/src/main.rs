//! cpu-balancer — periodic vCPU re-pinning daemon.
//!
//! Takes one positional argument, the tick interval in seconds, connects
//! to the local hypervisor, and re-pins vCPUs whenever the physical CPUs'
//! utilization spreads too far from the mean.

use std::process::ExitCode;
use std::time::Duration;

use hv_balancer_core::adapter::HypervisorAdapter;
use hv_balancer_core::cpu::{self, CpuLoopState};
use hv_balancer_core::guest::Guest;
use hv_balancer_core::libvirt_adapter::{LOCAL_URI, LibvirtAdapter};
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

    let mut state = CpuLoopState::default();
    match adapter.list_active() {
        Ok(ids) => {
            for id in ids {
                state.guests.push(Guest::new(id));
            }
        }
        Err(e) => {
            eprintln!("failed to enumerate guests: {e}");
            return ExitCode::FAILURE;
        }
    }
    tracing::info!(guests = state.guests.len(), "cpu-balancer starting");

    let shutdown = runtime::install_shutdown_handler();
    let result = runtime::run_loop(Duration::from_secs(interval_secs), &shutdown, || {
        cpu::tick(&adapter, &mut state, interval_secs).map(|_report| ())
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
/// An incorrect argument count or a non-positive/non-numeric interval is
/// a configuration error: the caller is expected to print the returned
/// message and exit with status 0, matching the original C tool's
/// `argc != 2` contract.
fn parse_args(args: Vec<String>) -> Result<u64, String> {
    if args.len() != 1 {
        return Err("usage: cpu-balancer <interval-seconds>".to_string());
    }
    match args[0].parse::<u64>() {
        Ok(0) | Err(_) => Err(format!(
            "interval must be a positive integer, got {:?}",
            args[0]
        )),
        Ok(secs) => Ok(secs),
    }
}
