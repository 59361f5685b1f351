//! Focused services behind the dispatcher
// (c) 2025 Consign contributors

mod bandwidth;
mod config_io;
mod log_export;

pub use bandwidth::BandwidthController;
pub use config_io::ConfigImportExport;
pub use log_export::LogExportPurge;
