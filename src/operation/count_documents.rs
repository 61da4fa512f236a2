use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, CommandResponse, ConnectionDescription},
    collation::Collation,
    concern::ReadConcern,
    error::{Error, Result},
    max_time::MaxTime,
    namespace::Namespace,
    operation::{
        aggregate::{Aggregate, AggregateOptions},
        executable,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
    },
    options::Hint,
};

/// Specifies the options to a [`CountDocuments`] operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct CountDocumentsOptions {
    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the aggregation with an arbitrary value to help trace it through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The maximum number of documents to count.
    pub limit: Option<u64>,

    /// The maximum amount of time to allow the query to run.
    pub max_time: Option<MaxTime>,

    /// The read concern to use for the operation.
    pub read_concern: Option<ReadConcern>,

    /// The number of documents to skip before counting.
    pub skip: Option<u64>,
}

/// Counts the documents matching a filter exactly, by running an aggregation that groups them.
#[derive(Debug)]
pub struct CountDocuments {
    aggregate: Aggregate,
}

impl CountDocuments {
    pub fn new(
        ns: Namespace,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<CountDocumentsOptions>>,
    ) -> Result<Self> {
        let options: Option<CountDocumentsOptions> = options.into();
        let mut pipeline = vec![doc! {
            "$match": filter.into().unwrap_or_default(),
        }];

        if let Some(skip) = options.as_ref().and_then(|opts| opts.skip) {
            let s: i64 = skip.try_into().map_err(|_| {
                Error::invalid_argument(format!("skip exceeds range of i64: {}", skip))
            })?;
            pipeline.push(doc! {
                "$skip": s
            });
        }

        if let Some(limit) = options.as_ref().and_then(|opts| opts.limit) {
            let l: i64 = limit.try_into().map_err(|_| {
                Error::invalid_argument(format!("limit exceeds range of i64: {}", limit))
            })?;
            pipeline.push(doc! {
                "$limit": l
            });
        }

        pipeline.push(doc! {
            "$group": {
                "_id": 1,
                "n": { "$sum": 1 },
            }
        });

        let aggregate_options = options.map(|opts| AggregateOptions {
            collation: opts.collation,
            comment: opts.comment,
            hint: opts.hint,
            max_time: opts.max_time,
            read_concern: opts.read_concern,
            ..Default::default()
        });

        Ok(Self {
            aggregate: Aggregate::new(ns, pipeline, aggregate_options),
        })
    }
}

impl OperationWithDefaults for CountDocuments {
    type O = u64;

    const NAME: &'static str = Aggregate::NAME;

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        self.aggregate.build(description)
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let spec = self.aggregate.handle_response(response, context)?;
        match spec.first_batch.first() {
            Some(group) => group
                .get("n")
                .and_then(bson_util::get_u64)
                .ok_or_else(|| Error::invalid_response("count group is missing a valid \"n\" field")),
            None => Ok(0),
        }
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.aggregate.read_concern()
    }

    fn supports_read_concern(&self, description: &ConnectionDescription) -> bool {
        self.aggregate.supports_read_concern(description)
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

executable!(CountDocuments, command => u64);
