//! Postforge: batch publishing automation for locally authored content.
//!
//! The pipeline walks a fixed sequence of stages over content items and their
//! media assets, tracking per-item progress durably in SQLite so that a
//! crash, a rate limit, or a required manual step never forces the whole
//! batch to restart.
//!
//! Content transformation itself (keyword/location enrichment, raster
//! transforms, the publishing wire protocol) lives behind the collaborator
//! traits in [`enrich`], [`media`], and [`publish`]; the orchestration core
//! treats every stage identically.

pub mod config;
pub mod enrich;
pub mod maintenance;
pub mod media;
pub mod pipeline;
pub mod publish;
pub mod stages;
