//! Configuration module for the HELSSA gate.
//!
//! Handles loading and validating gate configuration from TOML files.

mod settings;

pub use settings::*;
