//! Storage module for persistent data storage
//!
//! Provides SQLite-based persistence for memo chunks and rate-limit counters.

mod database;

pub use database::MemoDb;
