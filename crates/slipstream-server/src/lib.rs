//! # slipstream-server
//!
//! The HTTP surface of the proxy:
//!
//! - `POST /v1/messages`: validate, repair, translate, schedule, respond
//!   (JSON or Anthropic-compatible SSE)
//! - `POST /v1/messages/count_tokens`: cheap token estimate
//! - `GET /v1/models`, `GET /health`, `GET /account-limits`,
//!   `POST /refresh-token`: meta endpoints
//!
//! The router is assembled in [`server::build_router`] so tests can drive
//! it in-process.

#![deny(unsafe_code)]

pub mod config;
pub mod handlers;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod validate;

pub use config::Config;
pub use state::AppState;
