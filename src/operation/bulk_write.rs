//! Bulk writes: a list of insert, update and delete requests sent as `insert`, `update` and
//! `delete` commands, split into batches that fit the limits of the server they are sent to.


use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{
    binding::Binding,
    bson::{doc, oid::ObjectId, Bson, Document},
    bson_util,
    cmap::{Command, CommandResponse, ConnectionDescription},
    collation::Collation,
    concern::{self, WriteConcern},
    error::{BulkWriteError, Error, ErrorKind, IndexedWriteError, Result, WriteConcernError},
    executor::execute_operation,
    feature::Feature,
    namespace::Namespace,
    operation::{
        append_write_concern,
        ensure_option_supported,
        Executable,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
        COMMAND_OVERHEAD_SIZE,
    },
    options::Hint,
    results::{BulkWriteResult, BulkWriteUpsert},
    trace::COMMAND_TRACING_EVENT_TARGET,
    BoxFuture,
};

/// Enum modeling the modifications to apply during an update.
/// For details, see the official MongoDB
/// [documentation](https://www.mongodb.com/docs/manual/reference/command/update/#update-command-behaviors)
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum UpdateModifications {
    /// A document that contains only update operator expressions, or a replacement document
    /// without any.
    Document(Document),

    /// An aggregation pipeline.
    /// Only available in MongoDB 4.2+.
    Pipeline(Vec<Document>),
}

impl UpdateModifications {
    pub(crate) fn to_bson(&self) -> Bson {
        match self {
            UpdateModifications::Document(ref d) => Bson::Document(d.clone()),
            UpdateModifications::Pipeline(ref p) => bson_util::to_bson_array(p),
        }
    }

    fn is_replacement(&self) -> bool {
        match self {
            UpdateModifications::Document(ref d) => {
                !bson_util::first_key(d).is_some_and(|k| k.starts_with('$'))
            }
            UpdateModifications::Pipeline(_) => false,
        }
    }
}

impl From<Document> for UpdateModifications {
    fn from(item: Document) -> Self {
        UpdateModifications::Document(item)
    }
}

impl From<Vec<Document>> for UpdateModifications {
    fn from(item: Vec<Document>) -> Self {
        UpdateModifications::Pipeline(item)
    }
}

/// One request of a [`BulkWrite`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum WriteRequest {
    /// Inserts a document.
    Insert(InsertRequest),

    /// Updates or replaces the documents matching a filter.
    Update(UpdateRequest),

    /// Deletes the documents matching a filter.
    Delete(DeleteRequest),
}

impl WriteRequest {
    fn kind(&self) -> WriteKind {
        match self {
            Self::Insert(_) => WriteKind::Insert,
            Self::Update(_) => WriteKind::Update,
            Self::Delete(_) => WriteKind::Delete,
        }
    }
}

impl From<InsertRequest> for WriteRequest {
    fn from(request: InsertRequest) -> Self {
        Self::Insert(request)
    }
}

impl From<UpdateRequest> for WriteRequest {
    fn from(request: UpdateRequest) -> Self {
        Self::Update(request)
    }
}

impl From<DeleteRequest> for WriteRequest {
    fn from(request: DeleteRequest) -> Self {
        Self::Delete(request)
    }
}

/// Inserts `document`. An `_id` is generated for documents without one.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct InsertRequest {
    /// The document to insert.
    pub document: Document,
}

impl InsertRequest {
    pub fn new(document: Document) -> Self {
        Self { document }
    }
}

/// Applies `update` to the documents matching `filter`. A document without update operators is a
/// replacement, which can only be applied to a single document.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct UpdateRequest {
    /// The filter selecting the documents to update.
    #[builder(!default)]
    pub filter: Document,

    /// The update operators, pipeline or replacement to apply.
    #[builder(!default)]
    pub update: UpdateModifications,

    /// Whether every matching document is updated instead of the first.
    pub multi: Option<bool>,

    /// Whether a document is inserted when none matches.
    pub upsert: Option<bool>,

    /// The collation to use for the filter. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// A set of filters specifying to which array elements an update should apply. Requires
    /// MongoDB 3.6.
    pub array_filters: Option<Vec<Document>>,

    /// The index to use for the filter.
    pub hint: Option<Hint>,
}

impl UpdateRequest {
    fn validate(&self) -> Result<()> {
        if self.update.is_replacement() && self.multi == Some(true) {
            return Err(Error::invalid_argument(
                "a replacement document cannot be applied to multiple documents",
            ));
        }
        Ok(())
    }

    fn to_document(&self) -> Result<Document> {
        let mut update = doc! {
            "q": self.filter.clone(),
            "u": self.update.to_bson(),
        };
        if let Some(multi) = self.multi {
            update.insert("multi", multi);
        }
        if let Some(upsert) = self.upsert {
            update.insert("upsert", upsert);
        }
        if let Some(ref collation) = self.collation {
            update.insert("collation", bson::to_document(collation)?);
        }
        if let Some(ref array_filters) = self.array_filters {
            update.insert("arrayFilters", bson_util::to_bson_array(array_filters));
        }
        if let Some(ref hint) = self.hint {
            update.insert("hint", hint.to_bson());
        }
        Ok(update)
    }
}

/// Deletes the first document matching `filter`, or all of them when `multi` is set.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DeleteRequest {
    /// The filter selecting the documents to delete.
    #[builder(!default)]
    pub filter: Document,

    /// Whether every matching document is deleted instead of the first.
    pub multi: Option<bool>,

    /// The collation to use for the filter. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// The index to use for the filter.
    pub hint: Option<Hint>,
}

impl DeleteRequest {
    fn to_document(&self) -> Result<Document> {
        let limit: i32 = if self.multi == Some(true) { 0 } else { 1 };
        let mut delete = doc! {
            "q": self.filter.clone(),
            "limit": limit,
        };
        if let Some(ref collation) = self.collation {
            delete.insert("collation", bson::to_document(collation)?);
        }
        if let Some(ref hint) = self.hint {
            delete.insert("hint", hint.to_bson());
        }
        Ok(delete)
    }
}

/// Specifies the options to a [`BulkWrite`] operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct BulkWriteOptions {
    /// Opt out of document-level validation. Requires MongoDB 3.2.
    pub bypass_document_validation: Option<bool>,

    /// Tags the commands with an arbitrary value to help trace them through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,

    /// The maximum number of requests per command. The server's own limit still applies.
    pub max_batch_count: Option<u32>,

    /// The maximum number of payload bytes per command. The server's own limit still applies; a
    /// single request larger than the limit is sent on its own.
    pub max_batch_length: Option<u32>,

    /// If true, requests are applied in order and the bulk write stops at the first batch
    /// reporting an error. If false, requests of the same kind are sent together and every
    /// batch is attempted. Defaults to true.
    pub ordered: Option<bool>,

    /// The write concern to use for the operation.
    pub write_concern: Option<WriteConcern>,
}

/// Executes a list of write requests against one collection.
#[derive(Clone, Debug)]
pub struct BulkWrite {
    ns: Namespace,
    requests: Vec<WriteRequest>,
    options: BulkWriteOptions,
}

impl BulkWrite {
    pub fn new(
        ns: Namespace,
        requests: impl IntoIterator<Item = WriteRequest>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> Self {
        Self {
            ns,
            requests: requests.into_iter().collect(),
            options: options.into().unwrap_or_default(),
        }
    }

    fn is_ordered(&self) -> bool {
        self.options.ordered != Some(false)
    }

    /// Validates every request and groups them into runs of one kind: consecutive runs when
    /// ordered, one run per kind in order of first appearance otherwise.
    fn prepare(&self) -> Result<Vec<Run>> {
        if self.requests.is_empty() {
            return Err(Error::invalid_argument(
                "a bulk write must contain at least one request",
            ));
        }
        if self.options.max_batch_count == Some(0) {
            return Err(Error::invalid_argument("max_batch_count must be positive"));
        }
        if self.options.max_batch_length == Some(0) {
            return Err(Error::invalid_argument("max_batch_length must be positive"));
        }
        if let Some(ref write_concern) = self.options.write_concern {
            write_concern.validate()?;
        }

        let mut runs: Vec<Run> = Vec::new();
        for (index, request) in self.requests.iter().enumerate() {
            let prepared = PreparedRequest::new(index, request)?;
            let kind = request.kind();

            let position = if self.is_ordered() {
                runs.last()
                    .filter(|run| run.kind == kind)
                    .map(|_| runs.len() - 1)
            } else {
                runs.iter().position(|run| run.kind == kind)
            };
            let position = match position {
                Some(position) => position,
                None => {
                    runs.push(Run {
                        kind,
                        requests: Vec::new(),
                    });
                    runs.len() - 1
                }
            };
            runs[position].requests.push(prepared);
        }
        Ok(runs)
    }

    async fn execute_batches(
        &self,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<BulkWriteResult> {
        let runs = self.prepare()?;
        let ordered = self.is_ordered();

        let mut result = BulkWriteResult {
            acknowledged: concern::is_acknowledged(self.options.write_concern.as_ref()),
            ..Default::default()
        };
        let mut write_errors = Vec::new();
        let mut write_concern_error = None;
        let mut labels = Vec::new();

        'runs: for run in &runs {
            let mut offset = 0;
            while offset < run.requests.len() {
                let mut batch = WriteBatch::new(
                    &self.ns,
                    run.kind,
                    &run.requests[offset..],
                    &self.options,
                    ordered,
                );
                let outcome = execute_operation(&mut batch, binding, cancel).await?;
                offset += outcome.taken;

                let failed = !outcome.write_errors.is_empty();
                result.merge(outcome.result);
                write_errors.extend(outcome.write_errors);
                if outcome.write_concern_error.is_some() {
                    write_concern_error = outcome.write_concern_error;
                }
                labels.extend(outcome.labels);

                if ordered && failed {
                    tracing::debug!(
                        target: COMMAND_TRACING_EVENT_TARGET,
                        namespace = %self.ns,
                        "Stopping ordered bulk write after write errors"
                    );
                    break 'runs;
                }
            }
        }

        result.sort();
        if write_errors.is_empty() && write_concern_error.is_none() {
            return Ok(result);
        }

        write_errors.sort_by_key(|error: &IndexedWriteError| error.index);
        let unprocessed_requests = (0..self.requests.len())
            .filter(|index| result.processed_requests.binary_search(index).is_err())
            .collect();
        Err(Error::new(
            ErrorKind::BulkWrite(BulkWriteError {
                partial_result: result,
                write_errors,
                write_concern_error,
                unprocessed_requests,
            }),
            Some(labels),
        ))
    }
}

impl Executable for BulkWrite {
    type Output = BulkWriteResult;

    fn execute<'a>(
        &'a mut self,
        binding: &'a Binding,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move { self.execute_batches(binding, cancel).await })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteKind {
    Insert,
    Update,
    Delete,
}

impl WriteKind {
    fn command_name(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// The field the server reads the request payload from.
    fn payload_identifier(self) -> &'static str {
        match self {
            Self::Insert => "documents",
            Self::Update => "updates",
            Self::Delete => "deletes",
        }
    }
}

#[derive(Debug)]
struct Run {
    kind: WriteKind,
    requests: Vec<PreparedRequest>,
}

/// A request in the form it is sent in, remembering where it came from.
#[derive(Debug)]
struct PreparedRequest {
    /// Position in the list passed to the bulk write.
    index: usize,
    document: Document,
    size: usize,
    inserted_id: Option<Bson>,
    multi: bool,
    has_collation: bool,
    has_array_filters: bool,
    has_hint: bool,
}

impl PreparedRequest {
    fn new(index: usize, request: &WriteRequest) -> Result<Self> {
        let mut prepared = match request {
            WriteRequest::Insert(insert) => {
                let (document, id) = with_id(&insert.document);
                Self::with_document(index, document, false).inserted_id(id)
            }
            WriteRequest::Update(update) => {
                update.validate()?;
                let mut prepared =
                    Self::with_document(index, update.to_document()?, update.multi == Some(true));
                prepared.has_collation = update.collation.is_some();
                prepared.has_array_filters = update.array_filters.is_some();
                prepared.has_hint = update.hint.is_some();
                prepared
            }
            WriteRequest::Delete(delete) => {
                let mut prepared =
                    Self::with_document(index, delete.to_document()?, delete.multi == Some(true));
                prepared.has_collation = delete.collation.is_some();
                prepared.has_hint = delete.hint.is_some();
                prepared
            }
        };
        prepared.size = bson_util::doc_size_bytes(&prepared.document)?;
        Ok(prepared)
    }

    fn with_document(index: usize, document: Document, multi: bool) -> Self {
        Self {
            index,
            document,
            size: 0,
            inserted_id: None,
            multi,
            has_collation: false,
            has_array_filters: false,
            has_hint: false,
        }
    }

    fn inserted_id(mut self, id: Bson) -> Self {
        self.inserted_id = Some(id);
        self
    }
}

/// Returns the document with its `_id` first, generating one if it has none.
fn with_id(document: &Document) -> (Document, Bson) {
    if let Some(id) = document.get("_id") {
        return (document.clone(), id.clone());
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut with_id = doc! { "_id": id.clone() };
    with_id.extend(document.clone());
    (with_id, id)
}

/// One command's worth of requests, taken from the front of `requests` when built.
#[derive(Debug)]
struct WriteBatch<'a> {
    ns: &'a Namespace,
    kind: WriteKind,
    requests: &'a [PreparedRequest],
    options: &'a BulkWriteOptions,
    ordered: bool,
    taken: usize,
}

impl<'a> WriteBatch<'a> {
    fn new(
        ns: &'a Namespace,
        kind: WriteKind,
        requests: &'a [PreparedRequest],
        options: &'a BulkWriteOptions,
        ordered: bool,
    ) -> Self {
        Self {
            ns,
            kind,
            requests,
            options,
            ordered,
            taken: 0,
        }
    }

    /// The number of requests that fit in one command to a server described by `description`.
    fn batch_len(&self, description: &ConnectionDescription) -> Result<usize> {
        let mut max_count = usize::try_from(description.max_write_batch_size).unwrap_or(usize::MAX);
        if let Some(count) = self.options.max_batch_count {
            max_count = max_count.min(count as usize);
        }
        let mut max_bytes = usize::try_from(description.max_message_size_bytes)
            .unwrap_or(0)
            .saturating_sub(COMMAND_OVERHEAD_SIZE);
        if let Some(length) = self.options.max_batch_length {
            max_bytes = max_bytes.min(length as usize);
        }
        let max_document_size = usize::try_from(description.max_bson_object_size).unwrap_or(0);

        let mut size = 0;
        let mut len = 0;
        for request in self.requests.iter().take(max_count.max(1)) {
            if self.kind == WriteKind::Insert && request.size > max_document_size {
                return Err(Error::invalid_argument(format!(
                    "insert document must be within {} bytes, but document provided is {} bytes",
                    max_document_size, request.size
                )));
            }
            if len > 0 && size + request.size > max_bytes {
                break;
            }
            size += request.size;
            len += 1;
        }
        Ok(len)
    }

    fn check_features(&self, description: &ConnectionDescription) -> Result<()> {
        let version = &description.server_version;
        let batch = &self.requests[..self.taken];

        if batch.iter().any(|r| r.has_collation) {
            Feature::COLLATION.ensure_supported(version)?;
        }
        if batch.iter().any(|r| r.has_array_filters) {
            Feature::ARRAY_FILTERS.ensure_supported(version)?;
        }
        if batch.iter().any(|r| r.has_hint) {
            let feature = match self.kind {
                WriteKind::Delete => &Feature::HINT_FOR_DELETE_OPERATIONS,
                _ => &Feature::HINT_FOR_UPDATE_AND_REPLACE_OPERATIONS,
            };
            feature.validate(version, self.is_acknowledged())?;
        }
        if self.kind != WriteKind::Delete {
            ensure_option_supported(
                self.options.bypass_document_validation.as_ref(),
                &Feature::BYPASS_DOCUMENT_VALIDATION,
                description,
            )?;
        }
        Ok(())
    }

    /// The outcome of an unacknowledged batch: everything taken was sent, nothing is known.
    fn unacknowledged_outcome(&self) -> BatchOutcome {
        let batch = &self.requests[..self.taken];
        BatchOutcome {
            taken: self.taken,
            result: BulkWriteResult {
                processed_requests: batch.iter().map(|r| r.index).collect(),
                inserted_ids: batch
                    .iter()
                    .filter_map(|r| Some((r.index, r.inserted_id.clone()?)))
                    .collect(),
                ..Default::default()
            },
            write_errors: Vec::new(),
            write_concern_error: None,
            labels: Vec::new(),
        }
    }
}

impl OperationWithDefaults for WriteBatch<'_> {
    type O = BatchOutcome;

    const NAME: &'static str = "insert";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        self.taken = self.batch_len(description)?;
        self.check_features(description)?;

        let name = self.kind.command_name();
        let mut body = doc! {
            name: self.ns.coll.clone(),
            "ordered": self.ordered,
        };
        if self.kind != WriteKind::Delete {
            if let Some(bypass) = self.options.bypass_document_validation {
                body.insert("bypassDocumentValidation", bypass);
            }
        }
        if let Some(ref comment) = self.options.comment {
            body.insert("comment", comment.clone());
        }
        append_write_concern(&mut body, self.write_concern())?;

        let documents = self.requests[..self.taken]
            .iter()
            .map(|r| r.document.clone())
            .collect();
        let mut command = Command::new(name, self.ns.db.clone(), body);
        command.add_document_sequence(self.kind.payload_identifier(), documents);
        Ok(command)
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        if !self.is_acknowledged() {
            return Ok(self.unacknowledged_outcome());
        }

        let body: WriteResponseBody = response.body()?;
        let batch = &self.requests[..self.taken];
        let original_index = |position: usize| {
            batch.get(position).map(|r| r.index).ok_or_else(|| {
                Error::invalid_response(format!(
                    "write reply refers to request {} of a batch of {}",
                    position,
                    batch.len()
                ))
            })
        };

        // An ordered batch stops at its first error; nothing after it was attempted.
        let first_error = body.write_errors.iter().map(|e| e.index).min();
        let processed = match first_error {
            Some(position) if self.ordered => &batch[..(position + 1).min(batch.len())],
            _ => batch,
        };

        let mut result = BulkWriteResult {
            acknowledged: true,
            processed_requests: processed.iter().map(|r| r.index).collect(),
            ..Default::default()
        };
        for (position, request) in processed.iter().enumerate() {
            if let Some(ref id) = request.inserted_id {
                if !body.write_errors.iter().any(|e| e.index == position) {
                    result.inserted_ids.insert(request.index, id.clone());
                }
            }
        }
        for upsert in &body.upserted {
            result.upserts.push(BulkWriteUpsert {
                index: original_index(upsert.index)?,
                id: upsert.id.clone(),
            });
        }
        match self.kind {
            WriteKind::Insert => result.inserted_count = body.n,
            WriteKind::Update => {
                result.matched_count = body.n - result.upserts.len() as i64;
                result.modified_count = body.n_modified;
            }
            WriteKind::Delete => result.deleted_count = body.n,
        }

        let mut write_errors = body.write_errors;
        for error in &mut write_errors {
            error.index = original_index(error.index)?;
        }

        Ok(BatchOutcome {
            taken: self.taken,
            result,
            write_errors,
            write_concern_error: body.write_concern_error,
            labels: body.labels,
        })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.write_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        // Multi-document updates and deletes cannot be retried.
        if self.requests.iter().any(|r| r.multi) {
            Retryability::None
        } else {
            Retryability::Write
        }
    }

    fn name(&self) -> &str {
        self.kind.command_name()
    }
}

/// What one batch contributed to the bulk write, with indices already mapped back to request
/// positions.
#[derive(Debug)]
struct BatchOutcome {
    taken: usize,
    result: BulkWriteResult,
    write_errors: Vec<IndexedWriteError>,
    write_concern_error: Option<WriteConcernError>,
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResponseBody {
    #[serde(default)]
    n: i64,

    #[serde(default)]
    n_modified: i64,

    #[serde(default)]
    upserted: Vec<UpsertedBody>,

    #[serde(default)]
    write_errors: Vec<IndexedWriteError>,

    write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels", default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpsertedBody {
    index: usize,

    #[serde(rename = "_id")]
    id: Bson,
}
