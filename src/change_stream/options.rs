//! Contains options for change streams.
use serde::{Serialize, Serializer};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Timestamp},
    change_stream::event::ResumeToken,
    collation::Collation,
    concern::ReadConcern,
    max_time::MaxTime,
    operation::AggregateOptions,
};

/// These are the valid options that can be passed to a
/// [`ChangeStreamAggregate`](crate::operation::ChangeStreamAggregate) to open a
/// [`ChangeStream`](crate::change_stream::ChangeStream).
///
/// The fields that are serialized make up the `$changeStream` stage; the rest are options of the
/// `aggregate` command that carries it.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamOptions {
    #[rustfmt::skip]
    /// Configures how the
    /// [`ChangeStreamEvent::full_document`](crate::change_stream::event::ChangeStreamEvent::full_document)
    /// field will be populated. By default, the field will be empty for updates.
    pub full_document: Option<FullDocumentType>,

    /// Configures how the
    /// [`ChangeStreamEvent::full_document_before_change`](
    /// crate::change_stream::event::ChangeStreamEvent::full_document_before_change) field will be
    /// populated. Requires MongoDB 6.0.
    pub full_document_before_change: Option<FullDocumentBeforeChangeType>,

    /// Specifies the logical starting point for the new change stream. Note that if a watched
    /// collection is dropped and recreated or newly renamed, `start_after` should be set instead.
    /// `resume_after` and `start_after` cannot be set simultaneously.
    pub resume_after: Option<ResumeToken>,

    /// The change stream will only provide changes that occurred at or after the specified
    /// timestamp. Any command run against the server will return an operation time that can be
    /// used here. Requires MongoDB 4.0.
    pub start_at_operation_time: Option<Timestamp>,

    /// Takes a resume token and starts a new change stream returning the first notification after
    /// the token. This will allow users to watch collections that have been dropped and
    /// recreated or newly renamed collections without missing any notifications.
    ///
    /// This feature is only available on MongoDB 4.1.1+.
    pub start_after: Option<ResumeToken>,

    /// Enables the server to send the 'expanded' list of change stream events.
    pub show_expanded_events: Option<bool>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a change
    /// stream query.
    #[serde(skip)]
    pub max_await_time: Option<MaxTime>,

    /// The number of documents to return per batch.
    #[serde(skip)]
    pub batch_size: Option<u32>,

    /// Specifies a collation.
    #[serde(skip)]
    pub collation: Option<Collation>,

    /// The read concern to use for the operation.
    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    /// Tags the query with an arbitrary [`Bson`] value to help trace the operation through the
    /// database profiler, currentOp and logs.
    #[serde(skip)]
    pub comment: Option<Bson>,
}

impl ChangeStreamOptions {
    pub(crate) fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            batch_size: self.batch_size,
            collation: self.collation.clone(),
            comment: self.comment.clone(),
            max_await_time: self.max_await_time,
            read_concern: self.read_concern.clone(),
            ..Default::default()
        }
    }

    /// Whether any of the options that set the starting point of the stream is present.
    pub(crate) fn has_starting_point(&self) -> bool {
        self.resume_after.is_some()
            || self.start_after.is_some()
            || self.start_at_operation_time.is_some()
    }
}

/// Describes the modes for configuring the
/// [`ChangeStreamEvent::full_document`](
/// crate::change_stream::event::ChangeStreamEvent::full_document) field.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum FullDocumentType {
    /// The field will be populated with a copy of the entire document that was updated.
    UpdateLookup,

    /// The field will be populated for replace and update change events if the post-image for this
    /// event is available. Requires MongoDB 6.0.
    WhenAvailable,

    /// The same behavior as `WhenAvailable` except that an error is raised if the post-image is
    /// not available. Requires MongoDB 6.0.
    Required,

    /// User-defined other types for forward compatibility.
    Other(String),
}

impl FullDocumentType {
    fn as_str(&self) -> &str {
        match self {
            Self::UpdateLookup => "updateLookup",
            Self::WhenAvailable => "whenAvailable",
            Self::Required => "required",
            Self::Other(s) => s,
        }
    }

    /// Whether this mode reads post-images, which servers before 6.0 do not record.
    pub(crate) fn uses_post_images(&self) -> bool {
        matches!(self, Self::WhenAvailable | Self::Required)
    }
}

impl Serialize for FullDocumentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Describes the modes for configuring the
/// [`ChangeStreamEvent::full_document_before_change`](
/// crate::change_stream::event::ChangeStreamEvent::full_document_before_change) field.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum FullDocumentBeforeChangeType {
    /// The field will be populated for replace, update, and delete change events if the pre-image
    /// for this event is available.
    WhenAvailable,

    /// The same behavior as `WhenAvailable` except that an error is raised if the pre-image is
    /// not available.
    Required,

    /// Do not send a value.
    Off,

    /// User-defined other types for forward compatibility.
    Other(String),
}

impl Serialize for FullDocumentBeforeChangeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            Self::WhenAvailable => "whenAvailable",
            Self::Required => "required",
            Self::Off => "off",
            Self::Other(s) => s,
        })
    }
}
