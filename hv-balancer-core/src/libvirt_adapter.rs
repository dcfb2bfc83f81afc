//! Real [`HypervisorAdapter`] backed by libvirt, via the `virt` crate.

use std::collections::HashMap;

use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys;

use crate::adapter::{GuestMemStats, HypervisorAdapter, VcpuMap};
use crate::error::AdapterError;
use crate::guest::GuestId;
use crate::host::HostMemory;

/// The local hypervisor endpoint. The design hard-codes this rather than
/// reading it from the environment.
pub const LOCAL_URI: &str = "qemu:///system";

/// Field name libvirt uses for cumulative CPU time in
/// `virDomainGetCPUStats` output.
const CPU_TIME_FIELD: &str = "cpu_time";

/// `HypervisorAdapter` implementation over a live libvirt connection.
///
/// Built once at startup via [`LibvirtAdapter::connect`]; the session is
/// closed when the adapter is dropped, on every exit path.
pub struct LibvirtAdapter {
    conn: Connect,
    domains: HashMap<u32, Domain>,
    next_id: u32,
}

impl LibvirtAdapter {
    /// Binds to the local hypervisor endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Connect`] if libvirt cannot be reached.
    pub fn connect(uri: &str) -> Result<Self, AdapterError> {
        let conn = Connect::open(Some(uri)).map_err(AdapterError::connect)?;
        Ok(Self {
            conn,
            domains: HashMap::new(),
            next_id: 0,
        })
    }

    fn domain(&self, guest: GuestId) -> Result<&Domain, AdapterError> {
        self.domains
            .get(&guest.0)
            .ok_or(AdapterError::GuestVanished(guest))
    }
}

impl HypervisorAdapter for LibvirtAdapter {
    fn list_active(&mut self) -> Result<Vec<GuestId>, AdapterError> {
        let active = self
            .conn
            .list_all_domains(sys::VIR_CONNECT_LIST_DOMAINS_ACTIVE)
            .map_err(AdapterError::query)?;

        let mut ids = Vec::with_capacity(active.len());
        for domain in active {
            let id = GuestId(self.next_id);
            self.next_id += 1;
            self.domains.insert(id.0, domain);
            ids.push(id);
        }
        Ok(ids)
    }

    fn pcpu_count(&self) -> Result<u32, AdapterError> {
        let (cpus, _map, _online) = self
            .conn
            .get_cpu_map()
            .map_err(AdapterError::query)?;
        Ok(cpus)
    }

    fn cpu_time_ns(&self, guest: GuestId) -> Result<u64, AdapterError> {
        let domain = self.domain(guest)?;
        let stats = domain
            .get_cpu_stats(1, 0, 1, 0)
            .map_err(AdapterError::query)?;
        for period in &stats {
            for param in period {
                if param.name() == CPU_TIME_FIELD {
                    return Ok(param.as_u64());
                }
            }
        }
        Ok(0)
    }

    fn vcpu_map(&self, guest: GuestId) -> Result<VcpuMap, AdapterError> {
        let domain = self.domain(guest)?;
        let max_vcpus = domain
            .get_max_vcpus()
            .map_err(AdapterError::query)? as u32;
        let cur_vcpus = domain
            .get_vcpus_flags(sys::VIR_DOMAIN_AFFECT_CURRENT)
            .map_err(AdapterError::query)? as u32;

        let (infos, _cpumaps) = domain
            .get_vcpus(max_vcpus as i32, (max_vcpus as usize).div_ceil(8) as i32)
            .map_err(AdapterError::query)?;

        let mut pinning = vec![0u32; infos.len()];
        for (vcpu_id, info) in infos.iter().enumerate() {
            pinning[vcpu_id] = info.cpu as u32;
        }

        Ok(VcpuMap {
            max_vcpus,
            cur_vcpus,
            pinning,
        })
    }

    fn pin_vcpu(&self, guest: GuestId, vcpu_id: u32, pcpu_id: u32) -> Result<(), AdapterError> {
        let domain = self.domain(guest)?;
        let maplen = (pcpu_id as usize / 8 + 1).max(1);
        let mut cpumap = vec![0u8; maplen];
        cpumap[(pcpu_id as usize) / 8] |= 1 << (pcpu_id % 8);

        domain
            .pin_vcpu(vcpu_id, cpumap.as_slice())
            .map_err(AdapterError::mutate)
    }

    fn node_memory(&self) -> Result<HostMemory, AdapterError> {
        let stats = self
            .conn
            .node_get_memory_stats(sys::VIR_NODE_MEMORY_STATS_ALL_CELLS, 0)
            .map_err(AdapterError::query)?;

        let mut host = HostMemory::default();
        for stat in stats {
            match stat.field.as_str() {
                "free" => host.free_kb = stat.value,
                "total" => host.total_kb = stat.value,
                _ => {}
            }
        }
        Ok(host)
    }

    fn set_mem_stats_period(&self, guest: GuestId, seconds: i32) -> Result<(), AdapterError> {
        let domain = self.domain(guest)?;
        domain
            .set_memory_stats_period(seconds, sys::VIR_DOMAIN_AFFECT_LIVE)
            .map_err(AdapterError::mutate)
    }

    fn mem_stats(&self, guest: GuestId) -> Result<GuestMemStats, AdapterError> {
        let domain = self.domain(guest)?;
        let stats = domain.memory_stats(0).map_err(AdapterError::query)?;

        let mut out = GuestMemStats::default();
        for stat in stats {
            match stat.tag {
                t if t == sys::VIR_DOMAIN_MEMORY_STAT_UNUSED => out.unused_kb = stat.val,
                t if t == sys::VIR_DOMAIN_MEMORY_STAT_ACTUAL_BALLOON => {
                    out.actual_balloon_kb = stat.val;
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn set_balloon_target(&self, guest: GuestId, target_kb: u64) -> Result<(), AdapterError> {
        let domain = self.domain(guest)?;
        domain.set_memory(target_kb).map_err(AdapterError::mutate)
    }
}

impl Drop for LibvirtAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.conn.close() {
            tracing::warn!("error closing hypervisor connection: {e}");
        }
    }
}
