//! Uniform read/write surface over the hypervisor.
//!
//! The adapter performs no policy: it normalizes units (nanoseconds,
//! kilobytes) and returns raw samples, or applies a single mutation
//! requested by a balancer. Everything policy-shaped — deciding
//! *whether* and *how* to pin or balloon — lives in [`crate::cpu`] and
//! [`crate::mem`], which only ever see plain data, never a `dyn
//! HypervisorAdapter`'s connection internals.

use crate::error::AdapterError;
use crate::guest::GuestId;
use crate::host::HostMemory;

/// Per-vCPU affinity info for one guest, as returned by `vcpu_map`.
#[derive(Debug, Clone, Default)]
pub struct VcpuMap {
    /// Maximum configured vCPU count.
    pub max_vcpus: u32,
    /// Current live vCPU count.
    pub cur_vcpus: u32,
    /// `pinning[i]` is the pCPU index vCPU `i` is currently pinned to.
    pub pinning: Vec<u32>,
}

/// Guest balloon telemetry, as returned by `mem_stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestMemStats {
    /// Guest-reported free (unused) memory, in kilobytes.
    pub unused_kb: u64,
    /// Actual balloon size currently negotiated with the guest, in
    /// kilobytes. The original C source read this same statistic into
    /// two fields (`available` and `balloon`) and treated them as
    /// synonymous; this type stores it once.
    pub actual_balloon_kb: u64,
}

/// The abstract hypervisor surface both balancer loops are built on.
///
/// A concrete implementation either talks to a real libvirt daemon
/// (see [`crate::libvirt_adapter::LibvirtAdapter`]) or, for tests,
/// holds its state entirely in memory (see [`crate::mock::MockAdapter`],
/// behind the `test-util` feature).
pub trait HypervisorAdapter {
    /// Enumerates the guests currently active on the host. Called once
    /// at startup; the resulting table is not resized afterward (see
    /// the data model's guest-lifecycle note).
    fn list_active(&mut self) -> Result<Vec<GuestId>, AdapterError>;

    /// Number of physical CPUs on the host.
    fn pcpu_count(&self) -> Result<u32, AdapterError>;

    /// Cumulative busy time across all vCPUs since guest boot, in
    /// nanoseconds.
    fn cpu_time_ns(&self, guest: GuestId) -> Result<u64, AdapterError>;

    /// Current vCPU → pCPU affinity map, plus vCPU counts.
    fn vcpu_map(&self, guest: GuestId) -> Result<VcpuMap, AdapterError>;

    /// Pins a single vCPU to a single pCPU (one-hot affinity mask).
    fn pin_vcpu(&self, guest: GuestId, vcpu_id: u32, pcpu_id: u32) -> Result<(), AdapterError>;

    /// Host-wide free/total memory.
    fn node_memory(&self) -> Result<HostMemory, AdapterError>;

    /// Enables periodic balloon-stat collection for a guest.
    fn set_mem_stats_period(&self, guest: GuestId, seconds: i32) -> Result<(), AdapterError>;

    /// Current unused/balloon memory statistics for a guest.
    fn mem_stats(&self, guest: GuestId) -> Result<GuestMemStats, AdapterError>;

    /// Requests the balloon driver move `actual` toward `target_kb`.
    fn set_balloon_target(&self, guest: GuestId, target_kb: u64) -> Result<(), AdapterError>;
}
