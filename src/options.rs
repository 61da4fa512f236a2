//! Contains all of the types needed to specify options to operations.
//!
//! Most of the options structs in this module use the
//! [`typed-builder`](https://crates.io/crates/typed-builder) crate to derive a type-safe builder
//! API on them. For example, to create an instance of
//! [`FindOptions`](struct.FindOptions.html) with only `limit` and `batch_size` set, the builder
//! API can be used as follows:
//!
//! ```rust
//! # use mongodb_core_operations::options::FindOptions;
//! #
//! # let options = FindOptions::builder()
//! #                   .limit(20)
//! #                   .batch_size(5)
//! #                   .build();
//! ```

use serde::{Deserialize, Serialize};

use crate::bson::{Bson, Document};

pub use crate::{
    change_stream::options::*,
    collation::*,
    concern::*,
    max_time::MaxTime,
    operation::{
        AggregateOptions,
        BulkWriteOptions,
        ChangeStreamPreAndPostImages,
        ClusteredIndex,
        CommitQuorum,
        CountDocumentsOptions,
        CountOptions,
        CreateCollectionOptions,
        CreateIndexesOptions,
        CursorType,
        FindOneAndDeleteOptions,
        FindOneAndReplaceOptions,
        FindOneAndUpdateOptions,
        FindOptions,
        GeoNearOptions,
        IndexModel,
        IndexOptions,
        ListCollectionsOptions,
        MapReduceOptions,
        MapReduceOutputMode,
        ReturnDocument,
        TimeseriesGranularity,
        TimeseriesOptions,
        ValidationAction,
        ValidationLevel,
    },
    selection_criteria::*,
    session::SessionOptions,
};

/// Specifies the index to use for an operation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Hint {
    /// Specifies the keys of the index to use.
    Keys(Document),
    /// Specifies the name of the index to use.
    Name(String),
}

impl Hint {
    pub(crate) fn to_bson(&self) -> Bson {
        match self {
            Hint::Keys(ref d) => Bson::Document(d.clone()),
            Hint::Name(ref s) => Bson::String(s.clone()),
        }
    }
}

impl From<Document> for Hint {
    fn from(keys: Document) -> Self {
        Self::Keys(keys)
    }
}

impl From<&str> for Hint {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}
