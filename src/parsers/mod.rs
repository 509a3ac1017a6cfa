//! Line-oriented parsers for the diagnostic tools' text output.
//!
//! Each parser sees one complete line at a time, in stream order, and may
//! turn it into a typed event. Once the stream has ended, `finish` yields the
//! final result or a `Parse` error; parsers never invent a default result.

pub mod bandwidth;
pub mod ping;
pub mod traceroute;

use crate::error::EngineError;

pub use self::bandwidth::{BandwidthParser, BandwidthSummary, IntervalSample};
pub use self::ping::{PingParser, PingReply};
pub use self::traceroute::TracerouteParser;

/// Common "line in, typed event out" contract.
pub trait OutputParser {
    type Event;
    type Output;

    /// Inspect one line (without terminator).
    fn parse_line(&mut self, line: &str) -> Option<Self::Event>;

    /// Produce the final result from everything seen so far.
    fn finish(self) -> Result<Self::Output, EngineError>;
}

/// Scale a decimal quantity by an SI prefix (`K`, `M`, `G`, `T`, or none).
///
/// Works on the decimal text so that e.g. `85.5` with `G` is exactly
/// 85 500 000 000 rather than the nearest product of two floats.
pub(crate) fn si_scaled(value: &str, prefix: &str) -> Option<f64> {
    let exponent: u32 = match prefix {
        "" => 0,
        "K" | "k" => 3,
        "M" => 6,
        "G" => 9,
        "T" => 12,
        _ => return None,
    };

    let (int_part, frac_part) = value.split_once('.').unwrap_or((value, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{int_part}{frac_part}");
    let mantissa: u128 = digits.parse().ok()?;
    let frac_len = frac_part.len() as u32;

    if frac_len <= exponent {
        let scaled = mantissa.checked_mul(10u128.checked_pow(exponent - frac_len)?)?;
        Some(scaled as f64)
    } else {
        Some(mantissa as f64 / 10f64.powi((frac_len - exponent) as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_si_scaling_is_exact() {
        assert_eq!(si_scaled("85.5", "G"), Some(85_500_000_000.0));
        assert_eq!(si_scaled("99.6", "G"), Some(99_600_000_000.0));
        assert_eq!(si_scaled("10000", "M"), Some(10_000_000_000.0));
        assert_eq!(si_scaled("941", "M"), Some(941_000_000.0));
        assert_eq!(si_scaled("0.1", "K"), Some(100.0));
        assert_eq!(si_scaled("1.2345", "K"), Some(1234.5));
        assert_eq!(si_scaled("512", ""), Some(512.0));
    }

    #[test]
    fn test_every_gm_value_matches_power_of_ten() {
        for tenths in 0..2000u64 {
            let text = format!("{}.{}", tenths / 10, tenths % 10);
            assert_eq!(si_scaled(&text, "G"), Some((tenths * 100_000_000) as f64), "{text} G");
            assert_eq!(si_scaled(&text, "M"), Some((tenths * 100_000) as f64), "{text} M");
        }
    }

    #[test]
    fn test_si_scaling_rejects_garbage() {
        assert_eq!(si_scaled("abc", "M"), None);
        assert_eq!(si_scaled("1.2.3", "M"), None);
        assert_eq!(si_scaled("", "M"), None);
        assert_eq!(si_scaled("5", "X"), None);
    }
}
