//! Metric names and labels for the rainbow relay.
//!
//! Recording goes through the `metrics` crate facade, so nothing is collected
//! until the host process installs a recorder (Prometheus exporter, etc.).
//!
//! ```rust,ignore
//! use rainbow_metrics::{counter, relay};
//!
//! counter!(relay::EVENTS_TOTAL, "kind" => "created").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
