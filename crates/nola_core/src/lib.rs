//! Shared remote-build domain primitives.
//!
//! This crate owns the wire contract between the `nola` client and the build
//! function, the object key and bucket naming rules, and project configuration.
//! It intentionally excludes AWS SDK, Lambda runtime and subprocess concerns.

pub mod config;
pub mod contract;
pub mod storage_keys;
