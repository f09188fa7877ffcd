//! gatewire - an HTTP/WebSocket reverse-proxy gateway with dynamic, database-backed routing.
//!
//! Routing configuration is not a static file: backends are created, listed and inspected
//! through an Admin API and persisted to SQLite or PostgreSQL, then served from an in-memory
//! routing table kept current by a control plane (`core::service::BackendService`) pushing
//! snapshots into the data plane (`core::gateway::Gateway`). This library exposes the building
//! blocks; the binary wires them together.
//!
//! # Features
//! - Longest-prefix-match HTTP and WebSocket proxying with round-robin load balancing
//! - Active health checking (single GET probe per tick, no threshold smoothing)
//! - Admin API for backend CRUD and health history, backed by SQLite/PostgreSQL
//! - Per-request access logging and Prometheus-style metrics via `tracing` and `metrics`
//! - Graceful shutdown with connection draining
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! business logic inside `core`. End users should prefer the re-exports documented below
//! instead of reaching into internal modules directly.
//!
//! # Error Handling
//! Fallible APIs return `eyre::Result<T>` or a domain-specific error type (`ServiceError`,
//! `StorageError`, `HandlerError`). Context is attached with `WrapErr` for debuggability.
//!
//! # Concurrency & Data Structures
//! The routing table and backend cache are plain `std::sync::RwLock<HashMap<..>>`, read far
//! more often than written. The connection tracker, which churns on every WebSocket session,
//! uses `scc::HashMap` instead for its finer-grained concurrent access.
//!
//! # License
//! Licensed under Apache-2.0.
// Re-export public modules with explicit visibility controls
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{
        HealthChecker, HttpClientAdapter, HttpHandler, SqlRepository, access_log_middleware,
        admin_router,
    },
    core::{BackendService, Gateway},
    ports::http_client::HttpClient,
    utils::{ConnectionTracker, GracefulShutdown},
};
