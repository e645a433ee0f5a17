//! `SerialVault` Core Library
//!
//! Shared functionality for `SerialVault` components:
//! - Configuration resolution and hierarchy
//! - `SQLite` pool helpers and the `define_database!` macro
//! - Model name and serial number validation
//! - Tracing initialization
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;
pub mod validation;

pub use config::{Config, KeystoreKind, Secret};
pub use error::{Error, Result};
pub use validation::{ValidationError, validate_model_name, validate_serial_number};
