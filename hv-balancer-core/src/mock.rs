//! In-memory [`HypervisorAdapter`] test double.
//!
//! Lets the scenarios in the system design's testable-properties section
//! run against synthetic samples without a live hypervisor. Enabled by
//! the `test-util` feature so dependent crates can reuse it from their
//! own test suites as well as this crate's `#[cfg(test)]` modules.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::adapter::{GuestMemStats, HypervisorAdapter, VcpuMap};
use crate::error::AdapterError;
use crate::guest::GuestId;
use crate::host::HostMemory;

/// One synthetic guest's state, set up by a test before a tick runs.
#[derive(Debug, Clone, Default)]
pub struct MockGuest {
    /// Value `cpu_time_ns` returns.
    pub cpu_time_ns: u64,
    /// Value `vcpu_map` returns.
    pub vcpu_map: VcpuMap,
    /// Value `mem_stats` returns.
    pub mem_stats: GuestMemStats,
}

/// Records a single call the algorithm made against the mock, so tests
/// can assert on the mutation sequence without inspecting internal state.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    /// `pin_vcpu(guest, vcpu_id, pcpu_id)`.
    PinVcpu(GuestId, u32, u32),
    /// `set_balloon_target(guest, target_kb)`.
    SetBalloonTarget(GuestId, u64),
}

/// A fully in-memory hypervisor, configured by a test and driven through
/// `HypervisorAdapter`.
#[derive(Default)]
pub struct MockAdapter {
    guests: HashMap<u32, MockGuest>,
    order: Vec<GuestId>,
    pcpu_count: u32,
    host: HostMemory,
    /// Every mutating call made against this adapter, in call order.
    pub calls: RefCell<Vec<RecordedCall>>,
    /// If set, `pin_vcpu` fails for this `(guest, vcpu_id)` pair — used to
    /// exercise the "abort remaining pins for this tick" edge case.
    pub fail_pin_for: Option<(GuestId, u32)>,
}

impl MockAdapter {
    /// Creates an adapter with `pcpu_count` physical CPUs and no guests.
    pub fn new(pcpu_count: u32) -> Self {
        Self {
            pcpu_count,
            ..Default::default()
        }
    }

    /// Adds a guest, returning the `GuestId` it will be discovered with.
    pub fn add_guest(&mut self, guest: MockGuest) -> GuestId {
        let id = GuestId(self.order.len() as u32);
        self.order.push(id);
        self.guests.insert(id.0, guest);
        id
    }

    /// Sets the host free/total memory returned by `node_memory`.
    pub fn set_host_memory(&mut self, free_kb: u64, total_kb: u64) {
        self.host = HostMemory { free_kb, total_kb };
    }

    /// Updates an existing guest's CPU-time sample (simulating elapsed
    /// busy time between ticks).
    pub fn set_cpu_time(&mut self, guest: GuestId, ns: u64) {
        if let Some(g) = self.guests.get_mut(&guest.0) {
            g.cpu_time_ns = ns;
        }
    }

    /// Updates an existing guest's vCPU affinity map.
    pub fn set_vcpu_map(&mut self, guest: GuestId, map: VcpuMap) {
        if let Some(g) = self.guests.get_mut(&guest.0) {
            g.vcpu_map = map;
        }
    }

    /// Updates an existing guest's memory stats.
    pub fn set_mem_stats(&mut self, guest: GuestId, stats: GuestMemStats) {
        if let Some(g) = self.guests.get_mut(&guest.0) {
            g.mem_stats = stats;
        }
    }
}

impl HypervisorAdapter for MockAdapter {
    fn list_active(&mut self) -> Result<Vec<GuestId>, AdapterError> {
        Ok(self.order.clone())
    }

    fn pcpu_count(&self) -> Result<u32, AdapterError> {
        Ok(self.pcpu_count)
    }

    fn cpu_time_ns(&self, guest: GuestId) -> Result<u64, AdapterError> {
        self.guests
            .get(&guest.0)
            .map(|g| g.cpu_time_ns)
            .ok_or(AdapterError::GuestVanished(guest))
    }

    fn vcpu_map(&self, guest: GuestId) -> Result<VcpuMap, AdapterError> {
        self.guests
            .get(&guest.0)
            .map(|g| g.vcpu_map.clone())
            .ok_or(AdapterError::GuestVanished(guest))
    }

    fn pin_vcpu(&self, guest: GuestId, vcpu_id: u32, pcpu_id: u32) -> Result<(), AdapterError> {
        if self.fail_pin_for == Some((guest, vcpu_id)) {
            return Err(AdapterError::Mutate(Box::new(std::io::Error::other(
                "synthetic pin failure",
            ))));
        }
        self.calls
            .borrow_mut()
            .push(RecordedCall::PinVcpu(guest, vcpu_id, pcpu_id));
        Ok(())
    }

    fn node_memory(&self) -> Result<HostMemory, AdapterError> {
        Ok(self.host)
    }

    fn set_mem_stats_period(&self, _guest: GuestId, _seconds: i32) -> Result<(), AdapterError> {
        Ok(())
    }

    fn mem_stats(&self, guest: GuestId) -> Result<GuestMemStats, AdapterError> {
        self.guests
            .get(&guest.0)
            .map(|g| g.mem_stats)
            .ok_or(AdapterError::GuestVanished(guest))
    }

    fn set_balloon_target(&self, guest: GuestId, target_kb: u64) -> Result<(), AdapterError> {
        self.calls
            .borrow_mut()
            .push(RecordedCall::SetBalloonTarget(guest, target_kb));
        Ok(())
    }
}
