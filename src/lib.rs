//! Vidgate - caching proxy for video metadata and payloads
//!
//! Vidgate sits between clients and a federation of volunteer-run video API
//! instances. It resolves video metadata through a rotating instance pool,
//! persists it in SQLite until the embedded stream signatures lapse, and
//! relays bounded, length-verified payloads from the best playable format.
//!
//! ## Services
//!
//! - **Resolver**: cache-then-upstream metadata resolution with instance rotation
//! - **Proxy**: ranked-format payload relay with a size ceiling and buffer cache
//! - **Instance pool**: directory-backed rotation with TTL blacklisting
//! - **Admin**: API-key guarded cache flush

pub mod cache;
pub mod config;
pub mod error;
pub mod proxy;
pub mod resolve;
pub mod routes;
pub mod server;
pub mod store;
pub mod upstream;

pub use config::Args;
pub use error::{Error, Result};
pub use server::{run, AppState};
