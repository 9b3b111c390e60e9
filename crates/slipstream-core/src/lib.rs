//! # slipstream-core
//!
//! Foundation types for the slipstream proxy.
//!
//! This crate provides the shared vocabulary the other slipstream crates
//! depend on:
//!
//! - **Errors**: [`ProxyError`] hierarchy via `thiserror`, with HTTP status
//!   and Anthropic wire-type mapping
//! - **Redaction**: scrubbing of account and credential material from
//!   client-facing error text
//! - **IDs**: generated `toolu_` / `msg_` identifiers
//! - **Reset parsing**: extraction of rate-limit reset times from 429
//!   responses
//! - **Constants**: retry limits, wait thresholds, size caps

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod redact;
pub mod reset;

pub use errors::{ProxyError, ProxyResult};
