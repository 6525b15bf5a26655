//! Tracing helpers for cloud operations.
//!
//! Enable output by initializing a subscriber in the application:
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // Set RUST_LOG=cloud_inspect=debug for detailed output.
//! ```

use std::time::Instant;
use tracing::{debug, info, Span};

/// A performance timer that logs duration on drop.
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("cloud_operation", operation = name);
        debug!(target: "cloud_inspect::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer that also records the input size.
    pub fn with_points(name: &'static str, point_count: usize) -> Self {
        let span = tracing::info_span!("cloud_operation", operation = name, points = point_count);
        debug!(
            target: "cloud_inspect::timing",
            operation = name,
            points = point_count,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// The span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "cloud_inspect::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "Operation completed"
        );
    }
}

/// Log point cloud statistics at debug level.
pub fn log_cloud_stats(cloud: &crate::types::PointCloud, context: &str) {
    let (black, red) = cloud.color_counts();
    match cloud.bounds() {
        Some((min, max)) => debug!(
            context,
            points = cloud.len(),
            flagged = red,
            unflagged = black,
            min = ?(min.x, min.y, min.z),
            max = ?(max.x, max.y, max.z),
            "cloud stats"
        ),
        None => debug!(context, points = 0usize, "cloud stats (empty)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_measures_elapsed_time() {
        let timer = OperationTimer::new("test_op");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }

    #[test]
    fn stats_logging_handles_empty_clouds() {
        // Just exercises both branches without a subscriber installed.
        let cloud = crate::types::PointCloud::new();
        log_cloud_stats(&cloud, "empty");

        let mut cloud = crate::types::PointCloud::new();
        cloud.push_coords(1.0, 2.0, 3.0);
        log_cloud_stats(&cloud, "single");
    }
}
