use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, CommandResponse, ConnectionDescription},
    collation::Collation,
    concern::ReadConcern,
    error::{Error, Result},
    feature::Feature,
    max_time::MaxTime,
    namespace::Namespace,
    operation::{
        append_options,
        ensure_option_supported,
        executable,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
    },
    options::Hint,
};

/// Specifies the options to a [`Count`] operation.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CountOptions {
    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the command with an arbitrary value to help trace it through the database profiler,
    /// currentOp and logs.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The maximum number of documents to count.
    pub limit: Option<i64>,

    /// The maximum amount of time to allow the query to run.
    #[serde(rename = "maxTimeMS")]
    pub max_time: Option<MaxTime>,

    /// The read concern to use for the operation.
    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    /// The number of documents to skip before counting.
    pub skip: Option<i64>,
}

/// Counts the documents matching a filter with the `count` command. The result comes from
/// collection metadata when there is no filter, so it may be inaccurate on sharded clusters or
/// after an unclean shutdown; [`CountDocuments`](crate::operation::CountDocuments) counts exactly.
#[derive(Debug)]
pub struct Count {
    ns: Namespace,
    filter: Option<Document>,
    options: Option<CountOptions>,
}

impl Count {
    pub fn new(
        ns: Namespace,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<CountOptions>>,
    ) -> Self {
        Self {
            ns,
            filter: filter.into(),
            options: options.into(),
        }
    }
}

impl OperationWithDefaults for Count {
    type O = u64;

    const NAME: &'static str = "count";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        if let Some(ref options) = self.options {
            ensure_option_supported(options.collation.as_ref(), &Feature::COLLATION, description)?;
            ensure_option_supported(options.max_time.as_ref(), &Feature::MAX_TIME, description)?;
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };
        if let Some(ref filter) = self.filter {
            body.insert("query", filter.clone());
        }
        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        response
            .raw_response
            .get("n")
            .and_then(bson_util::get_u64)
            .ok_or_else(|| Error::invalid_response("count reply is missing a valid \"n\" field"))
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.read_concern.as_ref())
    }

    fn supports_read_concern(&self, _description: &ConnectionDescription) -> bool {
        true
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

executable!(Count, command => u64);
