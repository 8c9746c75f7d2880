//! Collie Common Library
//!
//! This crate provides shared constants, configuration loading and the
//! supervisor contract for all collie workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Region names, defaults and exit codes
//! - [`config`] - Configuration loading traits and engine configuration types
//! - [`watchdog`] - Supervisor contract for the controller process
//!
//! # Usage
//!
//! ```rust
//! use collie_common::config::{ConfigLoader, EngineConfig};
//! use collie_common::consts::DEFAULT_DELAY_MS;
//! ```

pub mod config;
pub mod consts;
pub mod watchdog;
