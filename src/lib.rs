//! # endpoint-proxy
//!
//! A local forwarding proxy for an AI chat/completion API. Clients address the proxy;
//! it transparently forwards each request to one of several configured upstream
//! endpoints, handling authentication substitution, streaming responses, health
//! tracking, cooldown, and failover.
//!
//! The engineering lives in three tightly coupled subsystems:
//!
//! - [`core::registry`] + [`core::health`] + [`core::groups`] + [`core::selector`] — the
//!   Endpoint Manager: the registry of upstream endpoints, their health/cooldown state,
//!   and the policy that picks the next endpoint to try.
//! - [`core::forwarding`] — the Forwarding Engine: the per-request state machine that
//!   attempts one or more endpoints, streams responses, classifies errors, and retries
//!   or fails over while preserving at-most-once billing semantics.
//! - [`core::tracker`] — the Request Lifecycle Tracker: a bounded in-memory hot pool
//!   that collapses updates and flushes asynchronously to durable storage.
//!
//! [`core::manager::Manager`] wires all of the above together and exposes the
//! operations an operator-facing surface (or, in this crate, the HTTP listener itself)
//! invokes.

pub mod config;
pub mod core;
pub mod server;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use core::manager::Manager;
pub use utils::error::{ProxyError, Result};
