//! # slipstream-upstream
//!
//! Everything that talks to the Cloud Code upstream:
//!
//! - **SSE**: byte-stream → `data:` payload parsing with trailing-buffer
//!   flush
//! - **Client**: the two-endpoint HTTP client, request envelope, and
//!   response classification
//! - **Scheduler**: the attempt loop of sticky selection, wait-vs-switch,
//!   endpoint failover, and the one-shot fallback model

#![deny(unsafe_code)]

pub mod client;
pub mod scheduler;
pub mod sse;

pub use client::UpstreamClient;
pub use scheduler::{Dispatched, Scheduler};
