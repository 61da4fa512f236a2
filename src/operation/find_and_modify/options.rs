use serde::{Deserialize, Deserializer, Serialize, Serializer};
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    collation::Collation,
    concern::WriteConcern,
    max_time::MaxTime,
    operation::UpdateModifications,
    options::Hint,
};

/// Indicates whether a find-one-and-modify operation should return the document before or after
/// modification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReturnDocument {
    /// Return the document after modification.
    After,
    /// Return the document before modification.
    Before,
}

impl<'de> Deserialize<'de> for ReturnDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "after" => Ok(ReturnDocument::After),
            "before" => Ok(ReturnDocument::Before),
            other => Err(serde::de::Error::custom(format!(
                "Unknown return document value: {other}"
            ))),
        }
    }
}

/// Specifies the options to a [`FindAndModify::delete`](super::FindAndModify::delete)
/// operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct FindOneAndDeleteOptions {
    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the operation with an arbitrary value to help trace it through the database profiler,
    /// currentOp and logs. Servers before 4.4 reject it.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Variables accessible from the filter as `$$name`.
    pub let_vars: Option<Document>,

    /// The maximum amount of time to allow the query to run.
    pub max_time: Option<MaxTime>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// Determines which document the operation modifies if the query selects multiple
    /// documents.
    pub sort: Option<Document>,

    /// The level of the write concern used by this operation.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a [`FindAndModify::replace`](super::FindAndModify::replace)
/// operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct FindOneAndReplaceOptions {
    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the operation with an arbitrary value. Servers before 4.4 reject it.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Variables accessible from the filter as `$$name`.
    pub let_vars: Option<Document>,

    /// The maximum amount of time to allow the query to run.
    pub max_time: Option<MaxTime>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// Whether the operation should return the document before or after modification.
    pub return_document: Option<ReturnDocument>,

    /// Determines which document the operation modifies if the query selects multiple
    /// documents.
    pub sort: Option<Document>,

    /// If true, insert a document if no matching document is found.
    pub upsert: Option<bool>,

    /// The level of the write concern used by this operation.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a [`FindAndModify::update`](super::FindAndModify::update)
/// operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct FindOneAndUpdateOptions {
    /// A set of filters specifying to which array elements an update should apply.
    pub array_filters: Option<Vec<Document>>,

    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the operation with an arbitrary value. Servers before 4.4 reject it.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Variables accessible from the filter and update as `$$name`.
    pub let_vars: Option<Document>,

    /// The maximum amount of time to allow the query to run.
    pub max_time: Option<MaxTime>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// Whether the operation should return the document before or after modification.
    pub return_document: Option<ReturnDocument>,

    /// Determines which document the operation modifies if the query selects multiple
    /// documents.
    pub sort: Option<Document>,

    /// If true, insert a document if no matching document is found.
    pub upsert: Option<bool>,

    /// The level of the write concern used by this operation.
    pub write_concern: Option<WriteConcern>,
}

#[derive(Clone, Debug, Serialize)]
pub(super) enum Modification {
    #[serde(rename = "remove", serialize_with = "self::serialize_true")]
    Delete,
    #[serde(rename = "update")]
    Update(UpdateModifications),
}

fn serialize_true<S: Serializer>(s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_bool(true)
}

/// The options shared by every findAndModify variant, in wire form.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, TypedBuilder, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FindAndModifyOptions {
    #[serde(flatten)]
    pub(super) modification: Modification,

    #[builder(default)]
    pub(super) sort: Option<Document>,

    #[builder(default)]
    pub(super) new: Option<bool>,

    #[builder(default)]
    pub(super) upsert: Option<bool>,

    #[builder(default)]
    #[serde(skip)]
    pub(super) bypass_document_validation: Option<bool>,

    #[builder(default)]
    #[serde(skip)]
    pub(super) write_concern: Option<WriteConcern>,

    #[builder(default)]
    pub(super) array_filters: Option<Vec<Document>>,

    #[builder(default)]
    #[serde(rename = "maxTimeMS")]
    pub(super) max_time: Option<MaxTime>,

    #[builder(default)]
    #[serde(rename = "fields")]
    pub(super) projection: Option<Document>,

    #[builder(default)]
    pub(super) collation: Option<Collation>,

    #[builder(default)]
    pub(super) hint: Option<Hint>,

    #[builder(default)]
    pub(super) comment: Option<Bson>,

    #[builder(default)]
    #[serde(rename = "let")]
    pub(super) let_vars: Option<Document>,
}

impl FindAndModifyOptions {
    pub(super) fn from_find_one_and_delete_options(
        opts: FindOneAndDeleteOptions,
    ) -> FindAndModifyOptions {
        FindAndModifyOptions::builder()
            .modification(Modification::Delete)
            .collation(opts.collation)
            .comment(opts.comment)
            .hint(opts.hint)
            .let_vars(opts.let_vars)
            .max_time(opts.max_time)
            .projection(opts.projection)
            .sort(opts.sort)
            .write_concern(opts.write_concern)
            .build()
    }

    pub(super) fn from_find_one_and_replace_options(
        replacement: Document,
        opts: FindOneAndReplaceOptions,
    ) -> FindAndModifyOptions {
        let replacement = UpdateModifications::Document(replacement);
        FindAndModifyOptions::builder()
            .modification(Modification::Update(replacement))
            .bypass_document_validation(opts.bypass_document_validation)
            .collation(opts.collation)
            .comment(opts.comment)
            .hint(opts.hint)
            .let_vars(opts.let_vars)
            .max_time(opts.max_time)
            .projection(opts.projection)
            .new(return_document_to_bool(opts.return_document))
            .sort(opts.sort)
            .upsert(opts.upsert)
            .write_concern(opts.write_concern)
            .build()
    }

    pub(super) fn from_find_one_and_update_options(
        update: UpdateModifications,
        opts: FindOneAndUpdateOptions,
    ) -> FindAndModifyOptions {
        FindAndModifyOptions::builder()
            .modification(Modification::Update(update))
            .array_filters(opts.array_filters)
            .bypass_document_validation(opts.bypass_document_validation)
            .collation(opts.collation)
            .comment(opts.comment)
            .hint(opts.hint)
            .let_vars(opts.let_vars)
            .max_time(opts.max_time)
            .projection(opts.projection)
            .new(return_document_to_bool(opts.return_document))
            .sort(opts.sort)
            .upsert(opts.upsert)
            .write_concern(opts.write_concern)
            .build()
    }
}

fn return_document_to_bool(return_document: Option<ReturnDocument>) -> Option<bool> {
    return_document.map(|return_document| match return_document {
        ReturnDocument::After => true,
        ReturnDocument::Before => false,
    })
}
