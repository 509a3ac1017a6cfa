//! Result formatting for terminal output.

use std::fmt::Write as _;

use crate::model::{FullResult, PingResult, SpeedResult, TracerouteResult, TransferTotals};

/// `9.41 Gbps` above a gigabit, `245.3 Mbps` below.
pub fn format_rate(bits_per_second: f64) -> String {
    let mbps = bits_per_second / 1_000_000.0;
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Byte count in 1000-based units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = u;
    }
    format!("{value:.1} {unit}")
}

fn format_transfer(label: &str, totals: &TransferTotals) -> String {
    format!(
        "{label}: {} ({} in {:.1}s)",
        format_rate(totals.bandwidth_bps),
        format_bytes(totals.bytes),
        totals.duration_sec
    )
}

pub fn format_speed(result: &SpeedResult) -> String {
    let mut summary = format!(
        "{}\n{}",
        format_transfer("Download", &result.download),
        format_transfer("Upload", &result.upload)
    );
    if let Some(jitter) = result.jitter_ms {
        let _ = write!(summary, "\nJitter: {:.2}ms", jitter);
    }
    if let Some(loss) = result.packet_loss_pct {
        let _ = write!(summary, "\nLoss: {:.2}%", loss);
    }
    summary
}

pub fn format_ping(result: &PingResult) -> String {
    format!(
        "Ping {}: {}/{} received, {}% loss\nrtt min/avg/max/stddev = {:.3}/{:.3}/{:.3}/{:.3} ms",
        result.host,
        result.packets_received,
        result.packets_transmitted,
        result.packet_loss_pct,
        result.times.min,
        result.times.avg,
        result.times.max,
        result.times.stddev,
    )
}

pub fn format_traceroute(result: &TracerouteResult) -> String {
    let mut out = format!("Route to {} ({} hops)", result.host, result.hops.len());
    for hop in &result.hops {
        let who = match &hop.hostname {
            Some(name) => format!("{name} ({})", hop.address),
            None => hop.address.clone(),
        };
        let times: Vec<String> = hop
            .round_trip_times_ms
            .iter()
            .map(|t| if *t < 0.0 { "*".to_string() } else { format!("{t:.3} ms") })
            .collect();
        let _ = write!(out, "\n{:>3}  {who}  {}", hop.hop_index, times.join("  "));
    }
    out
}

pub fn format_full(result: &FullResult) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        format_ping(&result.ping),
        format_speed(&result.speed),
        format_traceroute(&result.traceroute)
    )
}
