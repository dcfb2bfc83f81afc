//! CPU balancer: per-tick sampling, imbalance detection, and LPT re-pinning.
//!
//! The math here is deliberately adapter-free — every function takes and
//! returns plain data, so the properties in the system design's testable-
//! properties section can be checked directly against synthetic inputs
//! without a mock hypervisor. [`tick`] is the only function that talks to
//! a [`HypervisorAdapter`]; it samples, calls the pure helpers, and
//! applies the resulting [`PinOp`]s.

use crate::adapter::HypervisorAdapter;
use crate::error::AdapterError;
use crate::guest::{Guest, GuestId};
use crate::pcpu::PhysicalCpu;

/// Conversion factor from seconds to nanoseconds.
const SECS_TO_NANOS: u64 = 1_000_000_000;

/// Imbalance is declared only when the spread exceeds this fraction of
/// the mean pCPU utilization.
const IMBALANCE_RATIO: f64 = 0.05;

/// All guests tracked by the CPU balancer, plus the derived pCPU table.
#[derive(Debug, Default)]
pub struct CpuLoopState {
    /// Guests discovered at startup, in discovery order.
    pub guests: Vec<Guest>,
    /// One entry per physical CPU, rebuilt every tick.
    pub pcpus: Vec<PhysicalCpu>,
    /// Number of ticks run so far.
    pub iteration: u64,
}

/// A single vCPU pin the greedy placement decided to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinOp {
    /// The guest owning the vCPU.
    pub guest: GuestId,
    /// The vCPU index within the guest.
    pub vcpu_id: u32,
    /// The pCPU it should be pinned to.
    pub pcpu_id: u32,
}

/// Outcome of one CPU balancer tick, for logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuTickReport {
    /// Mean pCPU utilization this tick.
    pub mean_pct: f64,
    /// Population standard deviation of pCPU utilization this tick.
    pub stddev_pct: f64,
    /// Whether a re-pin pass was triggered.
    pub acted: bool,
    /// Number of `pin_vcpu` calls that succeeded before any failure.
    pub pins_applied: usize,
}

/// Step 2: derives `utilization_pct` for one guest from its current and
/// previous cumulative CPU-time samples.
///
/// `u = 100 · (current − previous) / (interval · 10^9)`. Guests without a
/// previous sample keep `utilization_pct == 0` and simply record the
/// current sample as `prev_cpu_time_ns` for next tick.
pub fn derive_utilization(guest: &mut Guest, interval_secs: u64) {
    let cpu = &mut guest.cpu;
    if cpu.has_prev {
        let delta = cpu.cpu_time_ns.saturating_sub(cpu.prev_cpu_time_ns);
        let denom = (interval_secs * SECS_TO_NANOS) as f64;
        cpu.utilization_pct = if denom > 0.0 {
            100.0 * delta as f64 / denom
        } else {
            0.0
        };
    } else {
        cpu.utilization_pct = 0.0;
        cpu.has_prev = true;
    }
    cpu.prev_cpu_time_ns = cpu.cpu_time_ns;
}

/// Step 3: attributes each guest's utilization across its current vCPUs
/// onto the pCPUs they are presently pinned to.
///
/// Each vCPU of a guest contributes `u / cur_vcpus` to the pCPU it is
/// pinned to; the sum over all guests and vCPUs lands in `pcpus`.
pub fn attribute_to_pcpus(guests: &[Guest], pcpus: &mut [PhysicalCpu]) {
    for p in pcpus.iter_mut() {
        p.utilization_pct = 0.0;
    }
    for guest in guests {
        let cur_vcpus = guest.cpu.cur_vcpus.max(1);
        let per_vcpu = guest.cpu.utilization_pct / f64::from(cur_vcpus);
        for &pcpu_id in &guest.cpu.vcpu_pcpu {
            if let Some(p) = pcpus.get_mut(pcpu_id as usize) {
                p.utilization_pct += per_vcpu;
            }
        }
    }
}

/// Step 4: mean, population standard deviation, and whether the spread
/// is large enough to warrant re-pinning (`σ > 0.05·μ`, and `μ > 0`).
pub fn imbalance(pcpus: &[PhysicalCpu]) -> (f64, f64, bool) {
    if pcpus.is_empty() {
        return (0.0, 0.0, false);
    }
    let n = pcpus.len() as f64;
    let mean = pcpus.iter().map(|p| p.utilization_pct).sum::<f64>() / n;
    let variance = pcpus
        .iter()
        .map(|p| (p.utilization_pct - mean).powi(2))
        .sum::<f64>()
        / n;
    let stddev = variance.sqrt();

    let needs_action = mean > 0.0 && stddev > IMBALANCE_RATIO * mean;
    (mean, stddev, needs_action)
}

/// Step 5: longest-processing-time-first greedy re-pin.
///
/// Guests are visited in descending utilization order; for each of a
/// guest's vCPUs (in vCPU-index order), the least-loaded pCPU (ties
/// broken by lowest index) receives `u / cur_vcpus` and the vCPU is
/// assigned to it. A vCPU's previous pCPU is not consulted: the
/// algorithm is stateless across ticks beyond the CPU-time counter.
pub fn lpt_pin(guests: &[Guest], pcpu_count: usize) -> Vec<PinOp> {
    if pcpu_count == 0 {
        return Vec::new();
    }

    let mut order: Vec<&Guest> = guests.iter().collect();
    order.sort_by(|a, b| {
        b.cpu
            .utilization_pct
            .partial_cmp(&a.cpu.utilization_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut load = vec![0.0_f64; pcpu_count];
    let mut ops = Vec::new();

    for guest in order {
        let cur_vcpus = guest.cpu.cur_vcpus.max(1);
        let per_vcpu = guest.cpu.utilization_pct / f64::from(cur_vcpus);
        for vcpu_id in 0..cur_vcpus {
            let target = least_loaded(&load);
            load[target] += per_vcpu;
            ops.push(PinOp {
                guest: guest.id,
                vcpu_id,
                pcpu_id: target as u32,
            });
        }
    }

    ops
}

/// Index of the smallest value in `load`, ties broken by lowest index.
fn least_loaded(load: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in load.iter().enumerate().skip(1) {
        if v < load[best] {
            best = i;
        }
    }
    best
}

/// Runs one full CPU balancer tick: sample, derive, attribute, decide,
/// and — if imbalanced — apply a new pinning.
///
/// If a `pin_vcpu` call fails, the tick stops applying further pins and
/// returns the error; pins already applied this tick stay in effect
/// (per the "abort remaining pins for this tick" edge case).
pub fn tick<A: HypervisorAdapter>(
    adapter: &A,
    state: &mut CpuLoopState,
    interval_secs: u64,
) -> Result<CpuTickReport, AdapterError> {
    let pcpu_count = adapter.pcpu_count()? as usize;
    if state.pcpus.len() != pcpu_count {
        state.pcpus = crate::pcpu::new_table(pcpu_count);
    }

    for guest in &mut state.guests {
        guest.cpu.cpu_time_ns = adapter.cpu_time_ns(guest.id)?;
        let map = adapter.vcpu_map(guest.id)?;
        guest.cpu.max_vcpus = map.max_vcpus;
        guest.cpu.cur_vcpus = map.cur_vcpus;
        guest.cpu.vcpu_pcpu = map.pinning;
    }

    for guest in &mut state.guests {
        derive_utilization(guest, interval_secs);
    }

    attribute_to_pcpus(&state.guests, &mut state.pcpus);
    let (mean_pct, stddev_pct, needs_action) = imbalance(&state.pcpus);

    tracing::info!(
        iteration = state.iteration,
        mean_pct,
        stddev_pct,
        "cpu balancer sampled"
    );

    let mut report = CpuTickReport {
        mean_pct,
        stddev_pct,
        acted: needs_action,
        pins_applied: 0,
    };

    if needs_action {
        let ops = lpt_pin(&state.guests, pcpu_count);
        for op in ops {
            match adapter.pin_vcpu(op.guest, op.vcpu_id, op.pcpu_id) {
                Ok(()) => report.pins_applied += 1,
                Err(e) => {
                    tracing::error!(
                        guest = ?op.guest,
                        vcpu = op.vcpu_id,
                        pcpu = op.pcpu_id,
                        "pin_vcpu failed, aborting remaining pins for this tick"
                    );
                    return Err(e);
                }
            }
        }
    }

    state.iteration += 1;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::CpuView;

    fn guest_with(id: u32, utilization_pct: f64, cur_vcpus: u32, pin: u32) -> Guest {
        Guest {
            id: GuestId(id),
            cpu: CpuView {
                max_vcpus: cur_vcpus,
                cur_vcpus,
                vcpu_pcpu: vec![pin; cur_vcpus as usize],
                cpu_time_ns: 0,
                prev_cpu_time_ns: 0,
                has_prev: true,
                utilization_pct,
            },
            mem: Default::default(),
        }
    }

    #[test]
    fn utilization_formula_matches_spec() {
        let mut g = guest_with(0, 0.0, 1, 0);
        g.cpu.has_prev = true;
        g.cpu.prev_cpu_time_ns = 1_000_000_000;
        g.cpu.cpu_time_ns = 1_000_000_000 + 5_000_000_000; // 5s of busy time
        derive_utilization(&mut g, 10); // over a 10s interval => 50%
        assert!((g.cpu.utilization_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn first_tick_has_zero_utilization() {
        let mut g = Guest::new(GuestId(0));
        g.cpu.cpu_time_ns = 123_456;
        derive_utilization(&mut g, 5);
        assert_eq!(g.cpu.utilization_pct, 0.0);
        assert!(g.cpu.has_prev);
        assert_eq!(g.cpu.prev_cpu_time_ns, 123_456);
    }

    #[test]
    fn pcpu_attribution_conserves_total_utilization() {
        let guests = vec![
            guest_with(0, 80.0, 1, 0),
            guest_with(1, 60.0, 1, 0),
            guest_with(2, 40.0, 2, 1),
        ];
        let mut pcpus = crate::pcpu::new_table(2);
        attribute_to_pcpus(&guests, &mut pcpus);

        let total_guest: f64 = guests.iter().map(|g| g.cpu.utilization_pct).sum();
        let total_pcpu: f64 = pcpus.iter().map(|p| p.utilization_pct).sum();
        assert!((total_guest - total_pcpu).abs() < 1e-9);
    }

    #[test]
    fn no_action_when_balanced() {
        // Scenario S2: 4 pCPUs at {24,25,26,25}; mean=25, stddev≈0.71.
        let pcpus = vec![
            PhysicalCpu { utilization_pct: 24.0 },
            PhysicalCpu { utilization_pct: 25.0 },
            PhysicalCpu { utilization_pct: 26.0 },
            PhysicalCpu { utilization_pct: 25.0 },
        ];
        let (mean, stddev, needs_action) = imbalance(&pcpus);
        assert!((mean - 25.0).abs() < 1e-9);
        assert!(stddev < 0.05 * mean);
        assert!(!needs_action);
    }

    #[test]
    fn zero_mean_never_acts() {
        let pcpus = vec![PhysicalCpu::default(); 4];
        let (_, _, needs_action) = imbalance(&pcpus);
        assert!(!needs_action);
    }

    #[test]
    fn cpu_rebalance_scenario_s1() {
        // 2 pCPUs, 2 guests each 1 vCPU, both pinned to pCPU 0, utils 80/60.
        let guests = vec![guest_with(0, 80.0, 1, 0), guest_with(1, 60.0, 1, 0)];
        let mut pcpus = crate::pcpu::new_table(2);
        attribute_to_pcpus(&guests, &mut pcpus);
        let (_, _, needs_action) = imbalance(&pcpus);
        assert!(needs_action);

        let ops = lpt_pin(&guests, 2);
        assert_eq!(ops.len(), 2);

        let mut load = vec![0.0; 2];
        for op in &ops {
            let u = guests.iter().find(|g| g.id == op.guest).unwrap().cpu.utilization_pct;
            load[op.pcpu_id as usize] += u;
        }
        let mut sorted_load = load.clone();
        sorted_load.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted_load, vec![60.0, 80.0]);
    }

    #[test]
    fn lpt_never_increases_spread() {
        let guests = vec![
            guest_with(0, 90.0, 1, 0),
            guest_with(1, 10.0, 1, 0),
            guest_with(2, 50.0, 1, 0),
            guest_with(3, 30.0, 1, 0),
        ];
        let pcpu_count = 2;

        let mut before = crate::pcpu::new_table(pcpu_count);
        attribute_to_pcpus(&guests, &mut before);
        let (_, stddev_before, _) = imbalance(&before);

        let ops = lpt_pin(&guests, pcpu_count);
        let mut after = crate::pcpu::new_table(pcpu_count);
        for op in ops {
            let u = guests
                .iter()
                .find(|g| g.id == op.guest)
                .unwrap()
                .cpu
                .utilization_pct;
            after[op.pcpu_id as usize].utilization_pct += u;
        }
        let (_, stddev_after, _) = imbalance(&after);

        assert!(stddev_after <= stddev_before + 1e-9);
    }

    #[test]
    fn idempotent_pin_plan_at_steady_state() {
        let guests = vec![guest_with(0, 80.0, 1, 0), guest_with(1, 60.0, 1, 0)];
        let first = lpt_pin(&guests, 2);
        let second = lpt_pin(&guests, 2);
        assert_eq!(first, second);
    }
}
