//! Tidegate - HTTP gateway for torrent download sessions.
//!
//! Tidegate brokers access to a shared, content-addressed resource: a
//! torrent session identified by its infohash. Many concurrent HTTP
//! requests may create, reuse, or relinquish interest in the same session
//! while the session performs long-running background work. Sessions
//! survive short gaps between requests and are torn down once the last
//! reference is gone and a configurable grace window has elapsed.
//!
//! # Architecture
//!
//! ```text
//! HTTP request ──► http handlers ──► TorrentLoader ──► TorrentEngine
//!                        │               │  └─ RefRegistry (refcount + grace)
//!                        │               └─ DescriptorStore (persisted descriptors)
//!                        └─ /events ──► event bridge ──► ChangeFeed subscription
//! ```
//!
//! The transfer engine itself sits behind the [`engine::TorrentEngine`]
//! trait; [`engine::MemoryEngine`] is the in-process implementation used
//! by the CLI and the test suite.

pub mod config;
pub mod engine;
pub mod events;
pub mod http;
pub mod infohash;
pub mod loader;
pub mod metrics;
pub mod registry;
pub mod store;

pub use config::GatewayConfig;
pub use infohash::InfoHash;
pub use loader::{TorrentLease, TorrentLoader};
pub use metrics::GatewayMetrics;
pub use registry::RefRegistry;

/// Crate version reported in the `/status` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
