//! # chapmap core
//!
//! Side-effect-free logic for chapmap: data models, text utilities,
//! chapter detection, merge/split normalization, the run error taxonomy,
//! and the storage abstraction.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Detection and
//! normalization are deterministic functions of their inputs; everything
//! with side effects lives behind the [`store::Store`] trait.
//!
//! ```text
//! raw text ──▶ detect ──▶ normalize ──▶ (orchestrator) ──▶ Store
//! ```

pub mod detect;
pub mod error;
pub mod models;
pub mod normalize;
pub mod store;
pub mod text;
