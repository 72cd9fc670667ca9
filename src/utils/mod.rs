//! Utilities module for logging, metrics, and helper functions
//!
//! This module provides:
//! - Structured logging with tracing
//! - Positive-class precision/recall/F1, threshold search, PR curves and AUC
//! - Error handling types
//! - General helper functions

pub mod error;
pub mod logging;
pub mod metrics;

// Re-export main types for convenience
pub use error::{RelExtError, Result};
pub use logging::{init_logging, LogConfig};
pub use metrics::{PositiveCounts, PrfScore};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Render a score as a fixed-width percentage bar, e.g. for F1 in summaries
pub fn format_score_bar(score: f64, width: usize) -> String {
    let clamped = score.clamp(0.0, 1.0);
    let filled = (clamped * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);

    format!(
        "[{}{}] {:.1}%",
        "█".repeat(filled),
        "░".repeat(empty),
        clamped * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_format_score_bar() {
        let bar = format_score_bar(0.5, 10);
        assert!(bar.contains("50.0%"));
        assert!(bar.contains("█████░░░░░"));
        // F1 starts at -1 before the first dev evaluation
        assert!(format_score_bar(-1.0, 4).contains("0.0%"));
    }
}
