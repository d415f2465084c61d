//! Core data models for the ingest pipeline.
//!
//! `video` maps the metadata table via `sqlx::FromRow`; the rest are
//! request-scoped values and the persisted reference encoding.

pub mod aspect;
pub mod asset;
pub mod reference;
pub mod video;
