#[cfg(test)]
mod test;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{
    binding::Binding,
    bson::{doc, Bson, Document},
    cmap::{Channel, Command, CommandResponse, ConnectionDescription, LegacyQuery, QueryFlags},
    collation::Collation,
    concern::ReadConcern,
    cursor::{AsyncCursor, CursorSpecification},
    error::{Error, ErrorKind, Result},
    executor::{execute_query, execute_with_retry_on},
    feature::Feature,
    max_time::MaxTime,
    namespace::Namespace,
    operation::{
        append_options,
        ensure_option_supported,
        CursorBody,
        Executable,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
    },
    options::Hint,
    selection_criteria::ReadPreference,
    serde_util,
    BoxFuture,
};

/// The type of cursor a find opens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[non_exhaustive]
pub enum CursorType {
    /// A regular cursor that is exhausted once the last matching document has been returned.
    #[default]
    NonTailable,

    /// A cursor over a capped collection that stays open after the last document, waiting for
    /// more to be inserted.
    Tailable,

    /// A tailable cursor on which the server blocks for up to `max_await_time` waiting for new
    /// data before answering a getMore.
    TailableAwait,
}

/// Specifies the options to a [`Find`] operation.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindOptions {
    /// Enables writing to temporary files by the server. Only supported in server versions 4.4+.
    pub allow_disk_use: Option<bool>,

    /// If true, partial results will be returned from a mongos rather than an error being
    /// returned if one or more shards is down. Ignored by every other kind of server.
    #[serde(skip)]
    pub allow_partial_results: Option<bool>,

    /// The number of documents the server should return per cursor batch.
    ///
    /// Note that this does not have any affect on the documents that are returned by a cursor,
    /// only the number of documents kept in memory at a given time (and by extension, the
    /// number of round trips needed to return the entire set of documents returned by the
    /// query).
    #[serde(serialize_with = "serde_util::serialize_u32_option_as_i32")]
    pub batch_size: Option<u32>,

    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary value to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,

    /// The type of cursor to return.
    #[serde(skip)]
    pub cursor_type: Option<CursorType>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Variables accessible from the filter and projection as `$$name`.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// The maximum number of documents to query.
    /// If a negative number is specified, the documents will be returned in a single batch limited
    /// in number by the positive value of the specified limit. Zero means no limit.
    #[serde(skip)]
    pub limit: Option<i64>,

    /// The exclusive upper bound for a specific index.
    pub max: Option<Document>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a tailable
    /// cursor query. If the cursor is not tailable, this option is ignored.
    #[serde(skip)]
    pub max_await_time: Option<MaxTime>,

    /// The maximum amount of time to allow the query to run.
    #[serde(rename = "maxTimeMS")]
    pub max_time: Option<MaxTime>,

    /// The inclusive lower bound for a specific index.
    pub min: Option<Document>,

    /// Whether the server should close the cursor after a period of inactivity.
    pub no_cursor_timeout: Option<bool>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// The read concern to use for this find query.
    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    /// Whether to return only the index keys in the documents.
    pub return_key: Option<bool>,

    /// Whether to return the record identifier for each document.
    pub show_record_id: Option<bool>,

    /// Whether the server should close the cursor after the first batch.
    #[serde(skip)]
    pub single_batch: Option<bool>,

    /// The number of documents to skip before returning.
    pub skip: Option<u64>,

    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,
}

/// Queries a collection, returning a cursor over the matching documents.
///
/// Servers older than 3.2 have no `find` command; the query is sent to them as a legacy
/// `OP_QUERY` message instead, with the options expressed as `$`-prefixed modifiers and flags.
#[derive(Debug)]
pub struct Find {
    ns: Namespace,
    filter: Document,
    options: Option<Box<FindOptions>>,
}

impl Find {
    pub fn new(
        ns: Namespace,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Self {
        Self {
            ns,
            filter: filter.into().unwrap_or_default(),
            options: options.into().map(Box::new),
        }
    }

    fn check_features(&self, description: &ConnectionDescription) -> Result<()> {
        Feature::FIND_COMMAND.ensure_supported(&description.server_version)?;

        let Some(ref options) = self.options else {
            return Ok(());
        };
        ensure_option_supported(
            options.allow_disk_use.as_ref(),
            &Feature::FIND_ALLOW_DISK_USE,
            description,
        )?;
        ensure_option_supported(options.collation.as_ref(), &Feature::COLLATION, description)?;
        ensure_option_supported(options.let_vars.as_ref(), &Feature::FIND_LET, description)?;
        ensure_option_supported(options.max_time.as_ref(), &Feature::MAX_TIME, description)?;
        ensure_option_supported(
            options
                .cursor_type
                .as_ref()
                .filter(|t| **t != CursorType::NonTailable),
            &Feature::TAILABLE_CURSOR,
            description,
        )?;
        Ok(())
    }

    /// Builds the legacy query message equivalent to this find.
    fn build_query(
        &self,
        description: &ConnectionDescription,
        read_preference: &ReadPreference,
    ) -> Result<LegacyQuery> {
        let default_options = FindOptions::default();
        let options = self.options.as_deref().unwrap_or(&default_options);

        ensure_option_supported(
            options.allow_disk_use.as_ref(),
            &Feature::FIND_ALLOW_DISK_USE,
            description,
        )?;
        ensure_option_supported(options.collation.as_ref(), &Feature::COLLATION, description)?;
        ensure_option_supported(options.let_vars.as_ref(), &Feature::FIND_LET, description)?;
        ensure_option_supported(options.max_time.as_ref(), &Feature::MAX_TIME, description)?;
        ensure_option_supported(
            options
                .read_concern
                .as_ref()
                .and_then(|rc| rc.level.as_ref()),
            &Feature::READ_CONCERN,
            description,
        )?;
        read_preference.ensure_supported(&description.server_version)?;

        let mut query = doc! { "$query": self.filter.clone() };
        let mongos = description.server_type.is_mongos();
        if mongos && !read_preference.is_primary() {
            query.insert("$readPreference", bson::to_bson(read_preference)?);
        }
        if let Some(ref sort) = options.sort {
            query.insert("$orderby", sort.clone());
        }
        if let Some(ref comment) = options.comment {
            query.insert("$comment", comment.clone());
        }
        if let Some(max_time) = options.max_time {
            query.insert("$maxTimeMS", max_time.as_max_time_ms());
        }
        if let Some(ref hint) = options.hint {
            query.insert("$hint", hint.to_bson());
        }
        if let Some(ref max) = options.max {
            query.insert("$max", max.clone());
        }
        if let Some(ref min) = options.min {
            query.insert("$min", min.clone());
        }
        if let Some(return_key) = options.return_key {
            query.insert("$returnKey", return_key);
        }
        if let Some(show_record_id) = options.show_record_id {
            query.insert("$showDiskLoc", show_record_id);
        }
        // Without modifiers the filter is sent unwrapped.
        if query.len() == 1 {
            query = self.filter.clone();
        }

        let mut flags = QueryFlags::empty();
        match options.cursor_type {
            Some(CursorType::Tailable) => flags |= QueryFlags::TAILABLE_CURSOR,
            Some(CursorType::TailableAwait) => {
                flags |= QueryFlags::TAILABLE_CURSOR | QueryFlags::AWAIT_DATA
            }
            _ => {}
        }
        if options.no_cursor_timeout == Some(true) {
            flags |= QueryFlags::NO_CURSOR_TIMEOUT;
        }
        if mongos && options.allow_partial_results == Some(true) {
            flags |= QueryFlags::PARTIAL;
        }
        if !read_preference.is_primary() {
            flags |= QueryFlags::SECONDARY_OK;
        }

        let skip = i32::try_from(options.skip.unwrap_or(0)).map_err(|_| {
            Error::invalid_argument("The skip must fit into a signed 32-bit integer")
        })?;

        Ok(LegacyQuery {
            ns: self.ns.clone(),
            query,
            fields: options.projection.clone(),
            skip,
            number_to_return: legacy_number_to_return(options)?,
            flags,
        })
    }

    async fn execute_legacy(
        &self,
        channel: &dyn Channel,
        read_preference: &ReadPreference,
        cancel: &CancellationToken,
    ) -> Result<CursorSpecification> {
        let query = self.build_query(channel.description(), read_preference)?;
        let reply = execute_query(channel, query, cancel).await?;
        let options = self.options.as_ref();

        Ok(CursorSpecification::from_legacy_reply(
            self.ns.clone(),
            reply,
            options.and_then(|opts| opts.batch_size),
            self.cursor_limit(),
        ))
    }

    /// The limit the cursor enforces on the client side.
    fn cursor_limit(&self) -> Option<i64> {
        self.options
            .as_ref()
            .and_then(|opts| opts.limit)
            .map(i64::saturating_abs)
    }
}

impl OperationWithDefaults for Find {
    type O = CursorSpecification;

    const NAME: &'static str = "find";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        self.check_features(description)?;

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "filter": self.filter.clone(),
        };

        if let Some(ref options) = self.options {
            if options
                .batch_size
                .map(|batch_size| batch_size > i32::MAX as u32)
                == Some(true)
            {
                return Err(ErrorKind::InvalidArgument {
                    message: "The batch size must fit into a signed 32-bit integer".to_string(),
                }
                .into());
            }

            match options.limit {
                Some(i64::MIN) => {
                    return Err(ErrorKind::InvalidArgument {
                        message: "The limit must be greater than i64::MIN".to_string(),
                    }
                    .into());
                }
                Some(limit) if limit != 0 => {
                    body.insert("limit", limit.abs());
                }
                _ => {}
            }

            // negative limits are a request for a single batch.
            if options.limit.map(|limit| limit < 0) == Some(true) {
                body.insert("singleBatch", true);
            } else if let Some(single_batch) = options.single_batch {
                body.insert("singleBatch", single_batch);
            }

            match options.cursor_type {
                Some(CursorType::Tailable) => {
                    body.insert("tailable", true);
                }
                Some(CursorType::TailableAwait) => {
                    body.insert("tailable", true);
                    body.insert("awaitData", true);
                }
                _ => {}
            };

            if let Some(allow_partial_results) = options.allow_partial_results {
                if description.server_type.is_mongos() {
                    body.insert("allowPartialResults", allow_partial_results);
                }
            }
        }

        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let response: CursorBody = response.body()?;
        let options = self.options.as_ref();

        Ok(CursorSpecification::new(
            response,
            options.and_then(|opts| opts.batch_size),
            self.cursor_limit(),
        )
        .with_max_await_time(options.and_then(|opts| opts.max_await_time))
        .with_comment(options.and_then(|opts| opts.comment.clone())))
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

impl Executable for Find {
    type Output = AsyncCursor;

    fn execute<'a>(
        &'a mut self,
        binding: &'a Binding,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<AsyncCursor>> {
        Box::pin(async move {
            let source = binding.channel_source();
            let channel = source.get_channel(cancel).await?;
            let read_preference = binding.read_preference();

            let spec = if Feature::FIND_COMMAND.is_supported(&channel.description().server_version)
            {
                execute_with_retry_on(self, &source, channel, read_preference, cancel).await?
            } else {
                self.execute_legacy(channel.as_ref(), read_preference, cancel)
                    .await?
            };
            Ok(AsyncCursor::new(source, spec))
        })
    }
}

/// The `numberToReturn` of a legacy query, combining the limit, the batch size and whether a
/// single batch was requested. Negative values close the cursor after the first batch.
fn legacy_number_to_return(options: &FindOptions) -> Result<i32> {
    let limit = i32::try_from(options.limit.unwrap_or(0)).map_err(|_| {
        Error::invalid_argument(
            "The limit must fit into a signed 32-bit integer for servers older than 3.2",
        )
    })?;
    let batch_size = i32::try_from(options.batch_size.unwrap_or(0)).map_err(|_| {
        Error::invalid_argument("The batch size must fit into a signed 32-bit integer")
    })?;

    let number_to_return = if limit < 0 {
        limit
    } else if limit == 0 {
        batch_size
    } else if batch_size == 0 || limit < batch_size {
        limit
    } else {
        batch_size
    };

    if options.single_batch == Some(true) && number_to_return > 0 {
        Ok(-number_to_return)
    } else {
        Ok(number_to_return)
    }
}
