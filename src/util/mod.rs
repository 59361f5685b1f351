//! General utilities
// (c) 2025 Consign contributors

mod tracing;

pub use tracing::setup_tracing;
