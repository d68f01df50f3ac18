//! # chapmap
//!
//! Chapter boundary detection and normalization for book adaptations.
//!
//! chapmap takes the raw text of a book, finds its chapters (from a table of
//! contents, from header patterns, or by word budget), reconciles them to a
//! target chapter count with deterministic merge/split operations, and
//! records every attempt as a durable, auditable run in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │  detect  │──▶│normalize │──▶│orchestrator│──▶│  SQLite  │
//! │ TOC/regex│   │merge/split│  │ lock + runs│   │  runs +  │
//! │ wordcount│   └──────────┘   └─────┬──────┘   │ chapters │
//! └──────────┘                        │          └──────────┘
//!                         ┌───────────┴───────┐
//!                         ▼                   ▼
//!                    ┌──────────┐       ┌──────────┐
//!                    │   CLI    │       │   HTTP   │
//!                    │(chapmap) │       │  (axum)  │
//!                    └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`Store`](chapmap_core::store::Store) backend |
//! | [`guard`] | Adaptation lock and reprocess cooldown |
//! | [`orchestrator`] | Normalization runs and status reads |
//! | [`server`] | HTTP API |
//!
//! Detection, normalization and the data model live in `chapmap-core`.

pub mod config;
pub mod db;
pub mod guard;
pub mod migrate;
pub mod orchestrator;
pub mod server;
pub mod sqlite_store;

pub use chapmap_core as core;
