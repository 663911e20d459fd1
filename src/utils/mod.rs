//! Common utilities and helpers

use std::time::Duration;

pub mod warp;

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let milliseconds = duration.subsec_millis();

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, milliseconds)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, seconds, milliseconds)
    }
}

/// Format file size for display
pub fn format_file_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Completed share of `total` as a percentage
pub fn progress_percent(completed: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (completed.min(total) as f32 / total as f32) * 100.0
    }
}

/// Remaining time extrapolated from the rate so far
pub fn estimate_remaining(completed: u64, total: u64, elapsed: Duration) -> Option<Duration> {
    if completed == 0 || completed >= total || elapsed.is_zero() {
        return None;
    }
    let rate = completed as f64 / elapsed.as_secs_f64();
    Some(Duration::from_secs_f64((total - completed) as f64 / rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(62_500)), "01:02.500");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05.000");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1_536), "1.50 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_progress_helpers() {
        assert_eq!(progress_percent(150, 300), 50.0);
        assert_eq!(progress_percent(301, 300), 100.0);
        assert_eq!(progress_percent(1, 0), 0.0);
        assert_eq!(
            estimate_remaining(100, 300, Duration::from_secs(10)),
            Some(Duration::from_secs(20))
        );
        assert_eq!(estimate_remaining(0, 300, Duration::from_secs(10)), None);
    }
}
