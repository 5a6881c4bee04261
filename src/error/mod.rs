//! Error types for the HELSSA gate.
//!
//! Provides a unified error handling system using thiserror. Every error maps to
//! a status class and a machine-readable code so the enforcement layer can turn
//! any failure into a structured rejection.

mod types;

pub use types::*;
