//! Formatting utilities

/// Format a duration in human-readable form
pub fn duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{}s", seconds as u64)
    } else if seconds < 3600.0 {
        let mins = (seconds / 60.0) as u64;
        let secs = (seconds % 60.0) as u64;
        format!("{}m {}s", mins, secs)
    } else {
        let hours = (seconds / 3600.0) as u64;
        let mins = ((seconds % 3600.0) / 60.0) as u64;
        format!("{}h {}m", hours, mins)
    }
}

/// Round a fraction to a whole percentage, never below zero
pub fn percent(ratio: f64) -> u32 {
    (ratio * 100.0).round().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        assert_eq!(duration(42.0), "42s");
        assert_eq!(duration(300.0), "5m 0s");
        assert_eq!(duration(3720.0), "1h 2m");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.154), 15);
        assert_eq!(percent(0.156), 16);
        assert_eq!(percent(1.0), 100);
        assert_eq!(percent(-0.5), 0);
    }
}
