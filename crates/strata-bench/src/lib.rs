//! Strata performance benchmarks.
//!
//! Benchmarks cover:
//! - Document ingestion through the buffered inserter
//! - Layer creation by running a tagger over a collection
//! - Selection with attribute queries and attached detached layers
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench -p strata-bench
//! ```

pub mod utils;
