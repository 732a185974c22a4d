//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher and service produce:
//!     → tracing events (structured fields: worker, bucket, token, peer)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Metric calls go through the `metrics` facade; without an installed
//!   recorder they are no-ops, so library users and tests pay nothing
//! - Log level comes from config, `RUST_LOG` overrides it

pub mod logging;
pub mod metrics;
