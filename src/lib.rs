//! Cross-exchange order mirroring engine — library crate.
//!
//! The binary (`main.rs`) is a thin wiring layer: load configuration, build
//! concrete `SourceClient`/`MirrorClient` adapters, construct a `Supervisor`,
//! run it until shutdown. Everything else lives here so integration tests
//! under `tests/` can drive the reconciliation core directly against
//! `MockExchange` without going through a process boundary.

pub mod analyzer;
pub mod cancel_sync;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod hash_cache;
pub mod margin_guard;
pub mod mirror_record;
pub mod notifier;
pub mod persistence;
pub mod placement;
pub mod price_tracker;
pub mod reconciler;
pub mod signing;
pub mod snapshot;
pub mod stats;
pub mod supervisor;
pub mod types;
