//! Host-wide memory state, as seen by the memory balancer.

/// Free and total memory on the host, in kilobytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMemory {
    /// Free memory on the host, in kilobytes.
    pub free_kb: u64,
    /// Total memory on the host, in kilobytes.
    pub total_kb: u64,
}
