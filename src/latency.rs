//! Distance- and bandwidth-derived link latency (spec §4.2). A pure
//! function of current positions and node load; no randomness, so it is
//! safe to call repeatedly within a single simulated tick.

const SLA_FLOOR: f64 = 0.05;

/// A node's bandwidth degrades linearly with its load (spec §4.2):
/// `B = max(SLA, 1 - (1-SLA)*|clients|/slots)`.
pub fn bandwidth(clients: usize, slots: usize, unlimited: bool) -> f64 {
    if unlimited || slots == 0 {
        return 1.0;
    }
    let load = clients as f64 / slots as f64;
    (1.0 - (1.0 - SLA_FLOOR) * load).max(SLA_FLOOR)
}

/// Total one-way latency in seconds for a hop of `distance_m` meters over a
/// link with bandwidth `bandwidth_gbps` and processing `hardware_tier`.
pub fn link_latency(distance_m: f64, bandwidth_gbps: f64, hardware_tier: u32) -> f64 {
    let t = -0.008 * bandwidth_gbps + 0.088;
    let p = (distance_m / 1000.0) * 0.0035;
    let q = hardware_tier as f64 * 0.01 + 0.05;
    let z = (1.0 / (2.0 * bandwidth_gbps)).min(50.0);
    (t + p + q + z) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_floors_at_sla() {
        assert_eq!(bandwidth(100, 1, false), SLA_FLOOR);
    }

    #[test]
    fn bandwidth_is_full_when_idle() {
        assert_eq!(bandwidth(0, 10, false), 1.0);
    }

    #[test]
    fn bandwidth_unlimited_ignores_load() {
        assert_eq!(bandwidth(1000, 1, true), 1.0);
    }

    #[test]
    fn latency_increases_with_distance() {
        let near = link_latency(10.0, 1.0, 1);
        let far = link_latency(10_000.0, 1.0, 1);
        assert!(far > near);
    }

    #[test]
    fn latency_is_nonnegative() {
        assert!(link_latency(0.0, 1.0, 1) >= 0.0);
    }
}
