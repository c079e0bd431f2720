//! Configuration for Strata.
//!
//! This module provides configuration structures for the store and its tools.

mod store;

pub use store::{InsertConfig, JournalMode, SelectConfig, StoreConfig};
