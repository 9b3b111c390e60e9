//! # slipstream-auth
//!
//! OAuth token lifecycle for the account pool.
//!
//! - **Types**: [`OAuthTokens`], the persisted accounts-file schema, and
//!   epoch-millisecond time helpers
//! - **Refresh**: the OAuth 2.0 `refresh_token` grant and Cloud Code
//!   project discovery
//! - **Registry**: per-account token lifetime metadata, proactive-refresh
//!   policy, and failure backoff
//! - **Storage**: accounts-file I/O with restrictive permissions
//!
//! Enrollment (the browser-mediated PKCE flow) is an external collaborator;
//! this crate only consumes its output: `(email, refresh_token, project_id?)`.

#![deny(unsafe_code)]

pub mod refresh;
pub mod registry;
pub mod storage;
pub mod types;

pub use refresh::{RefreshError, RefreshedToken};
pub use registry::{TokenRegistry, TokenStatus};
pub use types::{AccountsFile, OAuthTokens, StoredAccount, now_ms};
