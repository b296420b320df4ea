//! Stratus command line support: configuration and logging setup
//!
//! The backup control plane itself lives in the `stratus-core`, `stratus-backends`
//! and `stratus-backup` crates.

pub mod config;
pub mod logging;

pub use config::AppConfig;
