//! Identifier types for Strata.
//!
//! These types provide type-safe wrappers around document keys and
//! partition blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{StrataError, StrataResult};

/// Document identifier - the stable primary key of a document row.
///
/// Document ids are assigned on insertion when the caller does not
/// provide one, starting at 0.
///
/// # Example
///
/// ```rust
/// use strata_common::types::DocumentId;
///
/// let id = DocumentId::new(41);
/// assert_eq!(id.next().as_i64(), 42);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct DocumentId(i64);

impl DocumentId {
    /// The id given to the first document of an empty collection.
    pub const FIRST: Self = Self(0);

    /// Creates a new `DocumentId` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the next document id.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DocumentId {
    #[inline]
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

impl From<DocumentId> for i64 {
    #[inline]
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// Partition block - selects documents whose id satisfies
/// `id mod modulus = remainder`.
///
/// Workers annotating the same collection concurrently each take a
/// distinct remainder of one modulus; the blocks of a modulus partition
/// the collection.
///
/// # Example
///
/// ```rust
/// use strata_common::types::{Block, DocumentId};
///
/// let block = Block::new(3, 1).unwrap();
/// assert!(block.contains(DocumentId::new(4)));
/// assert!(!block.contains(DocumentId::new(5)));
/// assert_eq!(Block::partition(3).unwrap().len(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBlock")]
pub struct Block {
    modulus: i64,
    remainder: i64,
}

/// Unvalidated wire form of [`Block`].
#[derive(Deserialize)]
struct RawBlock {
    modulus: i64,
    remainder: i64,
}

impl TryFrom<RawBlock> for Block {
    type Error = StrataError;

    fn try_from(raw: RawBlock) -> StrataResult<Self> {
        Self::new(raw.modulus, raw.remainder)
    }
}

impl Block {
    /// Creates a block, requiring `modulus > 0` and `0 <= remainder < modulus`.
    pub fn new(modulus: i64, remainder: i64) -> StrataResult<Self> {
        if modulus <= 0 {
            return Err(StrataError::invalid_argument(format!(
                "block modulus must be positive, got {modulus}"
            )));
        }
        if remainder < 0 || remainder >= modulus {
            return Err(StrataError::invalid_argument(format!(
                "block remainder must be in [0, {modulus}), got {remainder}"
            )));
        }
        Ok(Self { modulus, remainder })
    }

    /// Returns every block of the given modulus.
    pub fn partition(modulus: i64) -> StrataResult<Vec<Self>> {
        (0..modulus.max(1)).map(|r| Self::new(modulus, r)).collect()
    }

    /// Returns the modulus.
    #[inline]
    #[must_use]
    pub const fn modulus(self) -> i64 {
        self.modulus
    }

    /// Returns the remainder.
    #[inline]
    #[must_use]
    pub const fn remainder(self) -> i64 {
        self.remainder
    }

    /// Checks whether the document belongs to this block.
    #[inline]
    #[must_use]
    pub const fn contains(self, id: DocumentId) -> bool {
        id.0.rem_euclid(self.modulus) == self.remainder
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.modulus, self.remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id() {
        let id = DocumentId::new(7);
        assert_eq!(id.as_i64(), 7);
        assert_eq!(id.next(), DocumentId::new(8));
        assert_eq!(DocumentId::FIRST.as_i64(), 0);
        assert_eq!(i64::from(id), 7);
        assert_eq!(format!("{id:?}"), "DocumentId(7)");
    }

    #[test]
    fn test_block_validation() {
        assert!(Block::new(0, 0).is_err());
        assert!(Block::new(-2, 0).is_err());
        assert!(Block::new(2, 2).is_err());
        assert!(Block::new(2, -1).is_err());
        assert!(Block::new(1, 0).is_ok());
    }

    #[test]
    fn test_block_partition() {
        let blocks = Block::partition(4).unwrap();
        for id in 0..40 {
            let owners = blocks
                .iter()
                .filter(|b| b.contains(DocumentId::new(id)))
                .count();
            assert_eq!(owners, 1, "document {id} must belong to exactly one block");
        }
    }

    #[test]
    fn test_block_deserialize_validates() {
        let block: Block = serde_json::from_str(r#"{"modulus": 3, "remainder": 2}"#).unwrap();
        assert_eq!(block, Block::new(3, 2).unwrap());
        assert!(serde_json::from_str::<Block>(r#"{"modulus": 0, "remainder": 0}"#).is_err());
        assert!(serde_json::from_str::<Block>(r#"{"modulus": 2, "remainder": 5}"#).is_err());
    }

    #[test]
    fn test_block_display() {
        assert_eq!(Block::new(4, 3).unwrap().to_string(), "(4, 3)");
    }
}
