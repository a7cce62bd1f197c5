//! Core types and trait definitions for the Recall memory store.
//!
//! This crate has no database dependency. It owns the record model and its
//! validation rules, configuration resolution, query parsing, the query-result
//! cache, and the [`MemoryStore`](store::MemoryStore) trait that storage
//! backends implement.

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod query;
pub mod record;
pub mod store;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
