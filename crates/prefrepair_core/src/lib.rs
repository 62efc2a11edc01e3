pub mod config_file;
pub mod error;
pub mod logging;
pub mod platform;
pub mod preferences;
pub mod reconcile;
pub mod repair;
pub mod runtime;

pub use error::RepairError;
