//! # Attribution Common Library
//!
//! Shared code for the attribution pipeline workspace:
//! - Error and Result types
//! - Configuration resolution (CLI > env > TOML > OS default)
//! - Database layer: pool init, schema creation, typed models, queries

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
