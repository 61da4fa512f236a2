#[cfg(test)]
mod test;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, CommandResponse, ConnectionDescription},
    collation::Collation,
    concern::{ReadConcern, WriteConcern},
    cursor::CursorSpecification,
    error::Result,
    feature::Feature,
    max_time::MaxTime,
    namespace::Namespace,
    operation::{
        append_options,
        append_write_concern,
        ensure_option_supported,
        executable,
        CursorBody,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
        WriteConcernOnlyBody,
    },
    options::Hint,
    serde_util,
};

/// Specifies the options to an [`Aggregate`] operation.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Enables writing to temporary files.
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server should return per cursor batch.
    #[serde(
        serialize_with = "serde_util::serialize_u32_option_as_batch_size",
        rename(serialize = "cursor")
    )]
    pub batch_size: Option<u32>,

    /// Opt out of document-level validation. Only sent for pipelines ending in `$out` or
    /// `$merge`.
    #[serde(skip_serializing)]
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary value to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Variables accessible from the pipeline as `$$name`.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a tailable
    /// await cursor query.
    #[serde(skip)]
    pub max_await_time: Option<MaxTime>,

    /// The maximum amount of time to allow the query to run.
    #[serde(rename = "maxTimeMS")]
    pub max_time: Option<MaxTime>,

    /// The read concern to use for the operation.
    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    /// The write concern to use for pipelines that write their output.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// What an aggregation runs against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggregateTarget {
    /// A database-level aggregation, e.g. one starting with `$currentOp`.
    Database(String),

    /// A collection-level aggregation.
    Collection(Namespace),
}

impl AggregateTarget {
    fn to_bson(&self) -> Bson {
        match self {
            AggregateTarget::Database(_) => Bson::Int32(1),
            AggregateTarget::Collection(ref ns) => Bson::String(ns.coll.to_string()),
        }
    }

    pub(crate) fn db_name(&self) -> &str {
        match self {
            AggregateTarget::Database(ref s) => s.as_str(),
            AggregateTarget::Collection(ref ns) => ns.db.as_str(),
        }
    }

    /// The namespace reported for results returned inline rather than through a cursor.
    fn result_namespace(&self) -> Namespace {
        match self {
            AggregateTarget::Database(ref db) => Namespace::new(db.as_str(), "$cmd.aggregate"),
            AggregateTarget::Collection(ref ns) => ns.clone(),
        }
    }
}

impl From<Namespace> for AggregateTarget {
    fn from(ns: Namespace) -> Self {
        AggregateTarget::Collection(ns)
    }
}

impl From<String> for AggregateTarget {
    fn from(db_name: String) -> Self {
        AggregateTarget::Database(db_name)
    }
}

impl From<&str> for AggregateTarget {
    fn from(db_name: &str) -> Self {
        AggregateTarget::Database(db_name.to_string())
    }
}

/// Runs an aggregation pipeline, returning a cursor over its results.
#[derive(Debug)]
pub struct Aggregate {
    target: AggregateTarget,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
    cursor_result: bool,
}

impl Aggregate {
    pub fn new(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Self {
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options: options.into(),
            cursor_result: true,
        }
    }

    /// Returns whether this is a $out or $merge aggregation operation.
    fn is_out_or_merge(&self) -> bool {
        matches!(self.last_stage_name(), Some("$out") | Some("$merge"))
    }

    fn last_stage_name(&self) -> Option<&str> {
        self.pipeline.last().and_then(bson_util::first_key)
    }

    fn check_features(&self, description: &ConnectionDescription) -> Result<()> {
        let version = &description.server_version;
        Feature::AGGREGATE.ensure_supported(version)?;
        match self.last_stage_name() {
            Some("$out") => Feature::AGGREGATE_OUT.ensure_supported(version)?,
            Some("$merge") => Feature::AGGREGATE_MERGE.ensure_supported(version)?,
            _ => {}
        }

        let Some(ref options) = self.options else {
            return Ok(());
        };
        ensure_option_supported(
            options.allow_disk_use.as_ref(),
            &Feature::AGGREGATE_ALLOW_DISK_USE,
            description,
        )?;
        ensure_option_supported(options.collation.as_ref(), &Feature::COLLATION, description)?;
        ensure_option_supported(
            options.comment.as_ref(),
            &Feature::AGGREGATE_COMMENT,
            description,
        )?;
        ensure_option_supported(options.hint.as_ref(), &Feature::AGGREGATE_HINT, description)?;
        ensure_option_supported(options.let_vars.as_ref(), &Feature::AGGREGATE_LET, description)?;
        ensure_option_supported(options.max_time.as_ref(), &Feature::MAX_TIME, description)?;
        if self.is_out_or_merge() {
            ensure_option_supported(
                options.bypass_document_validation.as_ref(),
                &Feature::BYPASS_DOCUMENT_VALIDATION,
                description,
            )?;
        }
        Ok(())
    }
}

impl OperationWithDefaults for Aggregate {
    type O = CursorSpecification;

    const NAME: &'static str = "aggregate";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        self.check_features(description)?;
        self.cursor_result =
            Feature::AGGREGATE_CURSOR_RESULT.is_supported(&description.server_version);

        let mut body = doc! {
            Self::NAME: self.target.to_bson(),
            "pipeline": bson_util::to_bson_array(&self.pipeline),
            "cursor": {}
        };

        append_options(&mut body, self.options.as_ref())?;

        if self.is_out_or_merge() {
            if let Ok(cursor_doc) = body.get_document_mut("cursor") {
                cursor_doc.remove("batchSize");
            }
            if let Some(bypass) = self
                .options
                .as_ref()
                .and_then(|opts| opts.bypass_document_validation)
            {
                body.insert("bypassDocumentValidation", bypass);
            }
            if Feature::COMMANDS_THAT_WRITE_ACCEPT_WRITE_CONCERN
                .is_supported(&description.server_version)
            {
                append_write_concern(&mut body, self.write_concern())?;
            }
        }

        if !self.cursor_result {
            body.remove("cursor");
        }

        Ok(Command::new(Self::NAME, self.target.db_name(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        if self.is_out_or_merge() {
            let wc_error_info = response.body::<WriteConcernOnlyBody>()?;
            wc_error_info.validate()?;
        }

        if !self.cursor_result {
            let inline: InlineResultBody = response.body()?;
            return Ok(CursorSpecification::exhausted(
                self.target.result_namespace(),
                inline.result,
            ));
        }

        let cursor_response: CursorBody = response.body()?;
        let options = self.options.as_ref();
        Ok(CursorSpecification::new(
            cursor_response,
            options.and_then(|opts| opts.batch_size),
            None,
        )
        .with_max_await_time(options.and_then(|opts| opts.max_await_time))
        .with_comment(options.and_then(|opts| opts.comment.clone())))
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.read_concern.as_ref())
    }

    fn supports_read_concern(&self, description: &ConnectionDescription) -> bool {
        // for aggregates that write, read concern is supported in MongoDB 4.2+.
        !self.is_out_or_merge() || Feature::AGGREGATE_MERGE.is_supported(&description.server_version)
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        if !self.is_out_or_merge() {
            return None;
        }
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        if self.is_out_or_merge() {
            Retryability::None
        } else {
            Retryability::Read
        }
    }
}

executable!(Aggregate, cursor);

/// Runs an aggregation pipeline with `explain` set. Returns the server's description of how it
/// would execute the pipeline instead of its results; nothing is written for `$out` or `$merge`.
#[derive(Debug)]
pub struct AggregateExplain {
    aggregate: Aggregate,
}

impl AggregateExplain {
    pub fn new(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Self {
        Self {
            aggregate: Aggregate::new(target, pipeline, options),
        }
    }
}

impl OperationWithDefaults for AggregateExplain {
    type O = Document;

    const NAME: &'static str = "aggregate";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        Feature::AGGREGATE_EXPLAIN.ensure_supported(&description.server_version)?;
        let mut command = self.aggregate.build(description)?;
        for key in ["cursor", "bypassDocumentValidation", "writeConcern"] {
            command.body.remove(key);
        }
        command.body.insert("explain", true);
        Ok(command)
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        Ok(response.raw_response)
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

executable!(AggregateExplain, command => Document);

#[derive(Debug, Deserialize)]
struct InlineResultBody {
    #[serde(default)]
    result: Vec<Document>,
}
