//! # ubinit-common
//!
//! Shared error definitions, boot configuration, and constants used
//! across the ubinit workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and knows nothing about syscalls.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
