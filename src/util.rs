//! Line-rate arithmetic shared by probes and report tables.

/// 10 Gb/s per port; 20 B of per-frame overhead (preamble + IFG).
const PORT_RATE_BPS: f64 = 10_000_000_000.0;
const FRAME_OVERHEAD: f64 = 20.0;

/// Theoretical packets per second at line rate for the given packet size,
/// aggregated over `n_ports` ports.
pub fn line_rate_to_pps(pkt_size: u32, n_ports: u32) -> f64 {
    n_ports as f64 * (PORT_RATE_BPS / 8.0) / (pkt_size as f64 + FRAME_OVERHEAD)
}
