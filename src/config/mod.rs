//! Configuration module for Coffer
//!
//! This module provides configuration management including:
//! - Base directory and file path resolution
//! - Settings persistence (store location, retention, KDF cost, migrations)

pub mod paths;
pub mod settings;

pub use paths::CofferPaths;
pub use settings::Settings;
