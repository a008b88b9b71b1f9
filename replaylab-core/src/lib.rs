//! ReplayLab Core: market records, source adapters, merge scheduler, matching.
//!
//! This crate contains the replay substrate:
//! - Domain types (bar and tick records, orders, fills, identities)
//! - Source adapters over synchronous sequences and blocking channels
//! - Chronological multi-source merge producing combined snapshots
//! - Matching engine with incremental fills and fulfil-once orders
//! - Event bus and portfolio tracker collaborators
//! - History query shapes and an in-memory provider
//! - Seeded synthetic bar data

pub mod bus;
pub mod domain;
pub mod history;
pub mod matching;
pub mod merge;
pub mod portfolio;
pub mod source;
pub mod synthetic;
