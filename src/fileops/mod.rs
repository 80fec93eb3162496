//! Progressive filesystem primitives.
//!
//! Every operation here is two-phase (analyse, then act) so totals are known
//! before anything is touched, and advances one entry or one chunk at a time,
//! yielding back to the scheduler in between. Cancellation is observed only
//! at those step boundaries.

mod copy;
mod delete;
mod moves;

pub use copy::{copy_directory_with_progress, copy_file_with_progress, debug_log_skip_set, CopyProgress, CopyStats};
pub use delete::{delete_directory_with_progress, DeleteProgress};
pub use moves::{move_entries, move_entry, MoveSummary};

use std::time::Instant;

/// Throughput between two successive samples.
#[derive(Debug)]
pub(crate) struct RateMeter {
    last_at: Instant,
    last_bytes: u64,
}

impl RateMeter {
    pub(crate) fn new() -> Self {
        Self {
            last_at: Instant::now(),
            last_bytes: 0,
        }
    }

    /// Bytes per second since the previous sample.
    pub(crate) fn sample(&mut self, total_bytes: u64) -> u64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_at).as_secs_f64();
        let delta = total_bytes.saturating_sub(self.last_bytes);

        self.last_at = now;
        self.last_bytes = total_bytes;

        if elapsed <= f64::EPSILON {
            return 0;
        }
        (delta as f64 / elapsed) as u64
    }
}

/// Human readable byte count for status lines.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_picks_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(16 * 1024), "16.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 + 512 * 1024), "3.5 MiB");
    }

    #[test]
    fn rate_meter_never_goes_negative() {
        let mut meter = RateMeter::new();
        meter.sample(1000);
        assert_eq!(meter.sample(500), 0);
    }
}
