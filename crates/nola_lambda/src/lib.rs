//! AWS-oriented adapters and the build function handler.
//!
//! This crate owns runtime integration details (Lambda handler, S3 and Lambda
//! gateways, the package-manager subprocess, zip archives and scratch
//! directories) and exposes a single runtime module boundary for contract,
//! config and storage key primitives.

pub mod adapters;
pub mod archive;
pub mod handlers;
pub mod runtime;
pub mod scratch;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
