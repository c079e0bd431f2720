//! # strata-store
//!
//! A store of annotated text documents on SQLite.
//!
//! A [`Storage`] holds named collections. Each collection keeps its
//! documents in one table and tracks a structure: the layers every
//! document carries (attached, stored inside the document) and layers
//! stored in tables of their own (detached, one row per document, or
//! fragmented, several rows per document). Layers are added after
//! ingestion by running taggers over the documents, possibly in parallel
//! blocks.
//!
//! ```text
//!   Storage ── connection, config
//!      │
//!      └── Collection ── documents table, structure table
//!            │
//!            ├── DocumentInserter ── buffered, per-flush commits
//!            ├── Selection ── Query ─▶ SQL, chunked reads
//!            └── lifecycle ── add / create / delete tabled layers
//! ```
//!
//! ## Example
//!
//! ```rust
//! use strata_common::config::StoreConfig;
//! use strata_model::Document;
//! use strata_store::{CollectionOptions, Storage};
//!
//! # fn main() -> strata_store::StoreResult<()> {
//! let storage = Storage::open_in_memory(StoreConfig::for_testing())?;
//! let collection = storage.create_collection("news", CollectionOptions::new())?;
//! collection.insert_documents([Document::new("Tere maailm.")])?;
//! assert_eq!(collection.len()?, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod error;
pub mod inserter;
pub mod lifecycle;
pub mod lock;
pub mod query;
pub mod selection;
pub mod sql;
pub mod storage;
pub mod structure;

pub use collection::{Collection, ExportMode, ExportOptions, FragmentRow, LayerMetaRow};
pub use error::{StoreError, StoreResult};
pub use inserter::{DocumentInserter, DocumentRow, InsertSummary};
pub use lifecycle::{CreateMode, LayerCreationReport, LayerOptions};
pub use lock::WriteLock;
pub use query::{MetaScope, Query};
pub use selection::{SelectedDocument, Selection, SelectionIter};
pub use storage::{CollectionInfo, CollectionOptions, Storage};
pub use structure::{CollectionState, CollectionStructure, LayerDescriptor};
