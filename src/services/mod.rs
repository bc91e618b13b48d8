// src/services/mod.rs

pub mod backfill;
pub mod enrichment;
pub mod evaluator;
pub mod importer;
pub mod mock;
pub mod recorder;
