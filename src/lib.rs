// src/lib.rs
//
// Batch reconciliation of POI records into the canonical Party graph.
// Each binary runs one pass; everything they share lives here.

pub mod clients;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod matching;
pub mod merge;
pub mod models;
pub mod results;
pub mod store;
pub mod workers;

pub use config::{AppConfig, MappingTables};
pub use results::PassOutcome;
