//! Contains the types of results returned by write operations.

use std::collections::HashMap;

use serde::Serialize;

use crate::bson::Bson;

/// The result of a [`BulkWrite`](crate::operation::BulkWrite) operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BulkWriteResult {
    /// Whether the server acknowledged the writes. When `false` every count is zero.
    pub acknowledged: bool,

    /// The number of documents inserted.
    pub inserted_count: i64,

    /// The number of documents matched by update and replace requests.
    pub matched_count: i64,

    /// The number of documents modified by update and replace requests.
    pub modified_count: i64,

    /// The number of documents deleted.
    pub deleted_count: i64,

    /// The documents inserted by upserts.
    pub upserts: Vec<BulkWriteUpsert>,

    /// Indices of the requests that were sent to the server, in request order.
    pub processed_requests: Vec<usize>,

    /// The `_id` of each inserted document, keyed by the index of its insert request.
    pub inserted_ids: HashMap<usize, Bson>,
}

impl BulkWriteResult {
    /// The number of documents inserted by upserts.
    pub fn upserted_count(&self) -> i64 {
        self.upserts.len() as i64
    }

    pub(crate) fn merge(&mut self, other: BulkWriteResult) {
        self.inserted_count += other.inserted_count;
        self.matched_count += other.matched_count;
        self.modified_count += other.modified_count;
        self.deleted_count += other.deleted_count;
        self.upserts.extend(other.upserts);
        self.processed_requests.extend(other.processed_requests);
        self.inserted_ids.extend(other.inserted_ids);
    }

    /// Puts the per-request lists back into request order after unordered batches ran out of
    /// order.
    pub(crate) fn sort(&mut self) {
        self.upserts.sort_by_key(|upsert| upsert.index);
        self.processed_requests.sort_unstable();
    }
}

/// A document inserted by an upsert, identified by the index of the request that caused it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[non_exhaustive]
pub struct BulkWriteUpsert {
    /// Index of the request in the list originally passed to the bulk write.
    pub index: usize,

    /// The `_id` of the upserted document.
    pub id: Bson,
}

/// The result of a [`CreateIndexes`](crate::operation::CreateIndexes) operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CreateIndexesResult {
    /// The list containing the names of all indexes created in the `createIndexes` command.
    pub index_names: Vec<String>,
}
