//! Client sessions
//!
//! This module handles:
//! * Connection string parsing
//! * Per-session cluster slots over a shared pool
//! * Query routing, result shaping and query intents

mod connection_string;
mod database;
mod intent;
mod result;

pub use database::Database;
pub use intent::{QueryIntent, RawQuery, SelectBy};
pub use result::QueryResult;
