//! # slipstream-accounts
//!
//! In-memory account pool for the scheduler.
//!
//! - **Store**: account identities plus mutable state: enabled/invalid
//!   flags and per-model rate limits, with a single-flight token cache
//!   and a persistence hook for write-back
//! - **Sticky pins**: soft `model → account` preference that maximizes
//!   upstream prompt-cache hits
//! - **Worker**: the 30-second proactive-refresh tick
//!
//! All state mutations go through [`AccountStore`]; pins are observers and
//! never own accounts.

#![deny(unsafe_code)]

pub mod sticky;
pub mod store;
pub mod worker;

pub use sticky::StickyPins;
pub use store::{AccountSnapshot, AccountStore, ModelLimit};
pub use worker::spawn_refresh_loop;
