//! Footy LM Library
//!
//! Football fixture statistics in, per-market classifiers and bet builders out

pub mod backfill;
pub mod bet_builder;
pub mod config;
pub mod error;
pub mod ml_engine;
pub mod types;
