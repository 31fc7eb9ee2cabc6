//! backboard-core: event aggregation and behavioral clustering for
//! lecture analytics
//!
//! Students watching lecture videos emit interaction events (play, pause,
//! seek, rewind, drop-off, speed changes, notes). This crate is the engine
//! that turns that raw stream into instructor-facing insight:
//!
//! - [`ingest`] validates and normalizes untrusted client events, resolving
//!   playback positions to lecture concepts
//! - [`store`] defines the append-only timeline contract and ships a
//!   SQLite reference backend
//! - [`analytics`] derives per-concept struggle scores, assigns students
//!   to behavioral cohorts, and rolls cohorts up per course
//!
//! Everything derived is a pure function of the append-only event log and
//! can be recomputed at any time.

pub mod analytics;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod store;
pub mod types;

pub use analytics::{
    aggregate, assign_cluster, rollup, CancelToken, ClusterAssignment, StudentFeatures,
};
pub use config::Config;
pub use error::{Error, Result};
pub use ingest::{ingest, BatchResult, IngestPipeline};
pub use store::{Database, TimelineStore};
