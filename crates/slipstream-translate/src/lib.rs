//! # slipstream-translate
//!
//! The bidirectional mapping between Anthropic Messages content and the
//! upstream's `contents`/`parts` schema:
//!
//! - **Types**: Anthropic wire structs ([`anthropic`]) and upstream wire
//!   structs ([`gemini`]), both as tagged sum types
//! - **Inbound**: Anthropic request → upstream `GenerateContentRequest`
//! - **Outbound**: upstream response → Anthropic response, non-streaming
//!   ([`outbound`]) and streaming ([`stream`])
//! - **Sanitizer**: JSON-Schema allowlist walk for tool declarations
//! - **Signature cache**: content → thought-signature memoization
//! - **Integrity**: repair passes for resumed conversations with lost
//!   signatures or broken tool sequences

#![deny(unsafe_code)]

pub mod anthropic;
pub mod gemini;
pub mod inbound;
pub mod integrity;
pub mod outbound;
pub mod sanitize;
pub mod signature_cache;
pub mod stream;

pub use signature_cache::SignatureCache;
