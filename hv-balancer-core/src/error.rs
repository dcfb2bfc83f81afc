//! Error types for the hypervisor adapter and the two balancer loops.

use thiserror::Error;

/// Errors surfaced by a [`crate::adapter::HypervisorAdapter`] implementation.
///
/// Every adapter call in this crate fails into exactly one of these three
/// kinds, matching the contract in the system design: connecting to the
/// hypervisor, querying it for samples, and mutating guest/host state via
/// pinning or balloon-target writes. The underlying cause is boxed rather
/// than tied to `virt::error::Error` directly, so the in-memory test
/// double (`test-util` feature) can manufacture adapter errors without a
/// real libvirt error value.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Failed to establish or maintain a session with the hypervisor.
    #[error("hypervisor connect failed: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to read a sample (CPU time, vCPU map, memory stats, node info).
    #[error("hypervisor query failed: {0}")]
    Query(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to apply a mutation (vCPU pin, balloon target, stats period).
    #[error("hypervisor mutate failed: {0}")]
    Mutate(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A guest present at `list_active` time was gone by a later per-guest
    /// call in the same tick.
    #[error("guest {0:?} disappeared mid-tick")]
    GuestVanished(crate::guest::GuestId),
}

impl AdapterError {
    /// Wraps a libvirt connect failure.
    pub fn connect(e: virt::error::Error) -> Self {
        Self::Connect(Box::new(e))
    }

    /// Wraps a libvirt query failure.
    pub fn query(e: virt::error::Error) -> Self {
        Self::Query(Box::new(e))
    }

    /// Wraps a libvirt mutate failure.
    pub fn mutate(e: virt::error::Error) -> Self {
        Self::Mutate(Box::new(e))
    }
}
