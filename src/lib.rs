//! # Claude Tap
//!
//! A transparent capture proxy for the Claude Messages API.
//!
//! ## Overview
//!
//! This library forwards HTTP traffic between a CLI agent client and the
//! Anthropic Messages API byte-identically, while extracting telemetry
//! (token usage, model, reconstructed response text) on the side.
//!
//! The proxy handles:
//! - Hop-by-hop header sanitization and host rewriting
//! - Stream vs. plain-JSON response classification
//! - Incremental SSE decoding without buffering the relayed body
//! - Best-effort capture that never alters the forwarded bytes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use claude_tap::config::ProxyConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from environment variables
//! let config = ProxyConfig::from_env()?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types and handling
//! - [`capture`] - In-memory store of captured exchanges
//! - [`events`] - SSE event data structures
//! - [`headers`] - Request/response header sanitization
//! - [`proxy`] - Axum router and forwarding handler
//! - [`tee`] - Pass-through byte relay with telemetry accumulation
//! - [`telemetry`] - Usage and text extraction from responses

pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod proxy;
pub mod tee;
pub mod telemetry;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
