#[cfg(test)]
mod test;

use std::{num::NonZeroU64, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Document},
    cmap::{Command, CommandResponse, ConnectionDescription},
    collation::Collation,
    concern::WriteConcern,
    error::Result,
    feature::Feature,
    namespace::Namespace,
    operation::{
        append_options,
        append_write_concern,
        ensure_option_supported,
        executable,
        ExecutionContext,
        OperationWithDefaults,
        WriteConcernOnlyBody,
    },
    serde_util,
};

/// These are the valid options for creating a collection or view with a [`Create`] operation.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct CreateCollectionOptions {
    /// Whether the collection should be capped. If true, `size` must also be set.
    pub capped: Option<bool>,

    /// The maximum size (in bytes) for a capped collection. This option is ignored if `capped` is
    /// not set to true.
    #[serde(serialize_with = "serde_util::serialize_nonzero_u64_option_as_i64")]
    pub size: Option<NonZeroU64>,

    /// The maximum number of documents in a capped collection. The `size` limit takes precedence
    /// over this option.
    #[serde(serialize_with = "serde_util::serialize_nonzero_u64_option_as_i64")]
    pub max: Option<NonZeroU64>,

    /// The storage engine that the collection should use, in the form
    /// `{ <storage-engine-name>: <options> }`.
    pub storage_engine: Option<Document>,

    /// Restricts the schema of documents which can exist in the collection.
    pub validator: Option<Document>,

    /// How strictly the validation rules are applied to existing documents during an update.
    pub validation_level: Option<ValidationLevel>,

    /// Whether invalid documents are rejected or only logged.
    pub validation_action: Option<ValidationAction>,

    /// The name of the source collection or view to base this view on. If specified, this will
    /// cause a view to be created rather than a collection.
    pub view_on: Option<String>,

    /// The aggregation pipeline that defines the contents of the view.
    pub pipeline: Option<Vec<Document>>,

    /// The default collation for the collection or view.
    pub collation: Option<Collation>,

    /// The write concern for the operation. Not sent to servers that predate write concern on
    /// `create`.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    /// The default configuration for indexes created on this collection, including the _id index.
    pub index_option_defaults: Option<Document>,

    /// Options for creating a time series collection.
    pub timeseries: Option<TimeseriesOptions>,

    /// Used to automatically delete documents in time series or clustered collections.
    #[serde(
        serialize_with = "serde_util::serialize_duration_option_as_int_seconds",
        rename = "expireAfterSeconds"
    )]
    pub expire_after: Option<Duration>,

    /// Options for supporting change stream pre- and post-images.
    pub change_stream_pre_and_post_images: Option<ChangeStreamPreAndPostImages>,

    /// Options for clustered collections.
    pub clustered_index: Option<ClusteredIndex>,
}

/// Specifies how strictly the database should apply validation rules to existing documents during
/// an update.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum ValidationLevel {
    /// Perform no validation for inserts and updates.
    Off,
    /// Perform validation on all inserts and updates.
    Strict,
    /// Perform validation on inserts as well as updates on existing valid documents, but do not
    /// perform validations on updates on existing invalid documents.
    Moderate,
}

/// Specifies whether the database should return an error or simply raise a warning if inserted
/// documents do not pass the validation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum ValidationAction {
    /// Return an error if inserted documents do not pass the validation.
    Error,
    /// Raise a warning if inserted documents do not pass the validation.
    Warn,
}

/// Specifies options for a clustered collection. Some fields have required values; the `Default`
/// impl uses those values.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ClusteredIndex {
    /// Key pattern; currently required to be `{_id: 1}`.
    pub key: Document,

    /// Currently required to be `true`.
    pub unique: bool,

    /// Optional; will be automatically generated if not provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional; currently must be `2` if provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v: Option<i32>,
}

impl Default for ClusteredIndex {
    fn default() -> Self {
        Self {
            key: doc! { "_id": 1 },
            unique: true,
            name: None,
            v: None,
        }
    }
}

/// Specifies options for creating a timeseries collection.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct TimeseriesOptions {
    /// Name of the top-level field to be used for time. Inserted documents must have this field,
    /// and the field must be of the BSON UTC datetime type.
    #[builder(!default)]
    pub time_field: String,

    /// Name of the top-level field describing the series.
    pub meta_field: Option<String>,

    /// The expected interval between subsequent measurements.
    pub granularity: Option<TimeseriesGranularity>,
}

/// The units you'd use to describe the expected interval between subsequent measurements for a
/// time-series.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum TimeseriesGranularity {
    /// The expected interval between subsequent measurements is in seconds.
    Seconds,
    /// The expected interval between subsequent measurements is in minutes.
    Minutes,
    /// The expected interval between subsequent measurements is in hours.
    Hours,
}

/// Whether change streams on the collection can see pre- and post-images of modified documents.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChangeStreamPreAndPostImages {
    /// If `true`, change streams will be able to include pre- and post-images.
    pub enabled: bool,
}

/// Creates a collection, or a view when `view_on` is set.
#[derive(Debug)]
pub struct Create {
    ns: Namespace,
    options: Option<CreateCollectionOptions>,
}

impl Create {
    pub fn new(ns: Namespace, options: impl Into<Option<CreateCollectionOptions>>) -> Self {
        Self {
            ns,
            options: options.into(),
        }
    }

    fn check_features(&self, description: &ConnectionDescription) -> Result<()> {
        let Some(ref options) = self.options else {
            return Ok(());
        };
        if options.validator.is_some()
            || options.validation_level.is_some()
            || options.validation_action.is_some()
        {
            Feature::DOCUMENT_VALIDATION.ensure_supported(&description.server_version)?;
        }
        ensure_option_supported(options.view_on.as_ref(), &Feature::VIEWS, description)?;
        ensure_option_supported(options.collation.as_ref(), &Feature::COLLATION, description)?;
        ensure_option_supported(
            options.timeseries.as_ref(),
            &Feature::TIME_SERIES_COLLECTIONS,
            description,
        )?;
        ensure_option_supported(
            options.clustered_index.as_ref(),
            &Feature::CLUSTERED_INDEXES,
            description,
        )?;
        ensure_option_supported(
            options.change_stream_pre_and_post_images.as_ref(),
            &Feature::CHANGE_STREAM_PRE_POST_IMAGES,
            description,
        )?;
        Ok(())
    }
}

impl OperationWithDefaults for Create {
    type O = ();

    const NAME: &'static str = "create";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        self.check_features(description)?;

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };
        append_options(&mut body, self.options.as_ref())?;

        if Feature::COMMANDS_THAT_WRITE_ACCEPT_WRITE_CONCERN.is_supported(&description.server_version)
        {
            append_write_concern(&mut body, self.write_concern())?;
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        response.body::<WriteConcernOnlyBody>()?.validate()
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }
}

executable!(Create, command => ());
