//! # hv-balancer-core
//!
//! Shared hypervisor adapter trait and balancing algorithms for
//! [`cpu-balancer`](../cpu_balancer/index.html) and
//! [`mem-balancer`](../mem_balancer/index.html).
//!
//! This crate has no `main`. It exists to keep the pure policy math —
//! utilization derivation, imbalance detection, LPT placement, donor/
//! acceptor classification, reclaim and grant sizing — testable without
//! a live libvirt connection, and to share that math between the two
//! balancer binaries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use hv_balancer_core::adapter::HypervisorAdapter;
//! use hv_balancer_core::cpu::{self, CpuLoopState};
//! use hv_balancer_core::guest::Guest;
//! use hv_balancer_core::libvirt_adapter::{LibvirtAdapter, LOCAL_URI};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut adapter = LibvirtAdapter::connect(LOCAL_URI)?;
//! let mut state = CpuLoopState::default();
//! for id in adapter.list_active()? {
//!     state.guests.push(Guest::new(id));
//! }
//!
//! let report = cpu::tick(&adapter, &mut state, 5)?;
//! println!("mean={:.2} stddev={:.2}", report.mean_pct, report.stddev_pct);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`adapter`] — the [`adapter::HypervisorAdapter`] trait and its data types
//! - [`libvirt_adapter`] — real implementation over the `virt` crate
//! - [`mock`] — in-memory implementation, behind the `test-util` feature
//! - [`guest`] / [`pcpu`] / [`host`] — per-guest, per-pCPU, and host state
//! - [`cpu`] — utilization sampling, imbalance detection, LPT re-pinning
//! - [`mem`] — donor/acceptor classification, reclaim, and grant
//! - [`runtime`] — the shared sleep/tick/shutdown loop
//! - [`error`] — adapter error types

pub mod adapter;
pub mod cpu;
pub mod error;
pub mod guest;
pub mod host;
pub mod libvirt_adapter;
pub mod mem;
pub mod pcpu;
pub mod runtime;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;
