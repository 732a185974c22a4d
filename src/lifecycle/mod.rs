//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Ctrl+C / caller ──trigger──▶ Shutdown ──broadcast──▶ distributor actor, worker tasks
//!                                                        → listener closed
//!                                                        → queued connections closed
//! ```

pub mod shutdown;

pub use shutdown::{shutdown_signal, Shutdown};
