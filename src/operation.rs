//! Operations: one type per server command, each knowing how to build its command for a given
//! server and how to interpret the reply.

mod aggregate;
mod bulk_write;
mod change_stream;
mod count;
mod count_documents;
mod create;
mod create_indexes;
mod find;
mod find_and_modify;
mod geo_near;
pub(crate) mod get_more;
pub(crate) mod kill_cursors;
mod list_collections;
mod map_reduce;


use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    binding::Binding,
    bson::{Document, Timestamp},
    cmap::{Command, CommandResponse, ConnectionDescription},
    concern::{ReadConcern, WriteConcern},
    error::{Error, ErrorKind, Result, WriteConcernError, WriteFailure},
    feature::Feature,
    namespace::Namespace,
    session::SessionHandle,
    BoxFuture,
};

pub use self::{
    aggregate::{Aggregate, AggregateExplain, AggregateOptions, AggregateTarget},
    bulk_write::{
        BulkWrite,
        BulkWriteOptions,
        DeleteRequest,
        InsertRequest,
        UpdateModifications,
        UpdateRequest,
        WriteRequest,
    },
    change_stream::{ChangeStreamAggregate, ChangeStreamTarget},
    count::{Count, CountOptions},
    count_documents::{CountDocuments, CountDocumentsOptions},
    create::{
        ChangeStreamPreAndPostImages,
        ClusteredIndex,
        Create,
        CreateCollectionOptions,
        TimeseriesGranularity,
        TimeseriesOptions,
        ValidationAction,
        ValidationLevel,
    },
    create_indexes::{
        CommitQuorum,
        CreateIndexes,
        CreateIndexesOptions,
        IndexModel,
        IndexOptions,
    },
    find::{CursorType, Find, FindOptions},
    find_and_modify::{
        FindAndModify,
        FindOneAndDeleteOptions,
        FindOneAndReplaceOptions,
        FindOneAndUpdateOptions,
        ReturnDocument,
    },
    geo_near::{GeoNear, GeoNearOptions},
    list_collections::{ListCollections, ListCollectionsOptions},
    map_reduce::{
        MapReduce,
        MapReduceOptions,
        MapReduceOutput,
        MapReduceOutputMode,
        MapReduceToCollection,
    },
};

/// The largest number of bytes of command overhead around a write payload.
pub(crate) const COMMAND_OVERHEAD_SIZE: usize = 16_000;

/// What an operation can see of the execution that produced a reply.
#[derive(Clone, Copy)]
pub(crate) struct ExecutionContext<'a> {
    pub(crate) description: &'a ConnectionDescription,
    pub(crate) session: &'a SessionHandle,
}

/// A trait modeling the behavior of a server side operation.
///
/// No methods in this trait should have default behaviors to ensure that wrapper operations
/// replicate all behavior.  Default behavior is provided by the `OperationWithDefaults` trait.
pub(crate) trait Operation: Send + Sync {
    /// The output type of this operation.
    type O: Send;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    /// The operation may store some additional state that is required for handling the response.
    fn build(&mut self, description: &ConnectionDescription) -> Result<Command>;

    /// Interprets the server response to the command.
    fn handle_response(
        &self,
        response: CommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O>;

    /// Interpret an error encountered while sending the built command to the server, potentially
    /// recovering.
    fn handle_error(&self, error: Error) -> Result<Self::O>;

    /// The read concern to attach to the command, if any.
    fn read_concern(&self) -> Option<&ReadConcern>;

    /// Returns whether or not this command supports the `readConcern` field.
    fn supports_read_concern(&self, description: &ConnectionDescription) -> bool;

    /// Whether or not this operation will request acknowledgment from the server.
    fn is_acknowledged(&self) -> bool;

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern>;

    /// Whether this operation supports sessions or not.
    fn supports_sessions(&self) -> bool;

    /// The level of retryability the operation supports.
    fn retryability(&self) -> Retryability;

    /// Updates this operation as needed for a retry.
    fn update_for_retry(&mut self);

    fn name(&self) -> &str;
}

// A mirror of the `Operation` trait, with default behavior where appropriate.  Should only be
// implemented by operation types that do not delegate to other operations.
pub(crate) trait OperationWithDefaults: Send + Sync {
    /// The output type of this operation.
    type O: Send;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    /// The operation may store some additional state that is required for handling the response.
    fn build(&mut self, description: &ConnectionDescription) -> Result<Command>;

    /// Interprets the server response to the command.
    fn handle_response(
        &self,
        response: CommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O>;

    /// Interpret an error encountered while sending the built command to the server, potentially
    /// recovering.
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    /// The read concern to attach to the command, if any.
    fn read_concern(&self) -> Option<&ReadConcern> {
        None
    }

    /// Returns whether or not this command supports the `readConcern` field.
    fn supports_read_concern(&self, _description: &ConnectionDescription) -> bool {
        false
    }

    /// Whether or not this operation will request acknowledgment from the server.
    fn is_acknowledged(&self) -> bool {
        self.write_concern()
            .map(WriteConcern::is_acknowledged)
            .unwrap_or(true)
    }

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// Whether this operation supports sessions or not.
    fn supports_sessions(&self) -> bool {
        true
    }

    /// The level of retryability the operation supports.
    fn retryability(&self) -> Retryability {
        Retryability::None
    }

    /// Updates this operation as needed for a retry.
    fn update_for_retry(&mut self) {}

    fn name(&self) -> &str {
        Self::NAME
    }
}

impl<T: OperationWithDefaults> Operation for T {
    type O = T::O;
    const NAME: &'static str = T::NAME;
    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        self.build(description)
    }
    fn handle_response(
        &self,
        response: CommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        self.handle_response(response, context)
    }
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        self.handle_error(error)
    }
    fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern()
    }
    fn supports_read_concern(&self, description: &ConnectionDescription) -> bool {
        self.supports_read_concern(description)
    }
    fn is_acknowledged(&self) -> bool {
        self.is_acknowledged()
    }
    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern()
    }
    fn supports_sessions(&self) -> bool {
        self.supports_sessions()
    }
    fn retryability(&self) -> Retryability {
        self.retryability()
    }
    fn update_for_retry(&mut self) {
        self.update_for_retry()
    }
    fn name(&self) -> &str {
        self.name()
    }
}

/// An operation that can be run through a [`Binding`].
pub trait Executable {
    /// What a successful execution produces.
    type Output;

    /// Runs the operation. The binding's session is used for the command and, for cursor results,
    /// kept alive for as long as the cursor is.
    fn execute<'a>(
        &'a mut self,
        binding: &'a Binding,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Self::Output>>;
}

/// Implements [`Executable`] for an operation, either as a plain command producing `$out` or as a
/// command whose reply opens a cursor.
macro_rules! executable {
    ($op:ty, command => $out:ty) => {
        impl $crate::operation::Executable for $op {
            type Output = $out;

            fn execute<'a>(
                &'a mut self,
                binding: &'a $crate::binding::Binding,
                cancel: &'a ::tokio_util::sync::CancellationToken,
            ) -> $crate::BoxFuture<'a, $crate::error::Result<$out>> {
                Box::pin($crate::executor::execute_operation(self, binding, cancel))
            }
        }
    };
    ($op:ty, cursor) => {
        impl $crate::operation::Executable for $op {
            type Output = $crate::cursor::AsyncCursor;

            fn execute<'a>(
                &'a mut self,
                binding: &'a $crate::binding::Binding,
                cancel: &'a ::tokio_util::sync::CancellationToken,
            ) -> $crate::BoxFuture<'a, $crate::error::Result<Self::Output>> {
                Box::pin($crate::executor::execute_cursor_operation(
                    self, binding, cancel,
                ))
            }
        }
    };
}
pub(crate) use executable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Retryability {
    Write,
    Read,
    None,
}

/// Appends a serializable struct to the input document. The serializable struct MUST serialize to a
/// Document; otherwise, an error will be thrown.
pub(crate) fn append_options<T: Serialize + Debug>(
    doc: &mut Document,
    options: Option<&T>,
) -> Result<()> {
    if let Some(options) = options {
        let options_doc = bson::to_document(options)?;
        doc.extend(options_doc);
    }
    Ok(())
}

/// Adds `writeConcern` to a command body if one is set and not the server default.
pub(crate) fn append_write_concern(
    body: &mut Document,
    write_concern: Option<&WriteConcern>,
) -> Result<()> {
    if let Some(write_concern) = write_concern.filter(|wc| !wc.is_empty()) {
        write_concern.validate()?;
        body.insert("writeConcern", bson::to_bson(write_concern)?);
    }
    Ok(())
}

/// Checks a gated option: if it is set, the server must support `feature`.
pub(crate) fn ensure_option_supported<T>(
    option: Option<&T>,
    feature: &Feature,
    description: &ConnectionDescription,
) -> Result<()> {
    if option.is_some() {
        feature.ensure_supported(&description.server_version)?;
    }
    Ok(())
}

/// Body of a write response that could possibly have a write concern error but not write errors.
#[derive(Debug, Deserialize, Default, Clone)]
pub(crate) struct WriteConcernOnlyBody {
    #[serde(rename = "writeConcernError")]
    write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels")]
    labels: Option<Vec<String>>,
}

impl WriteConcernOnlyBody {
    pub(crate) fn validate(&self) -> Result<()> {
        match self.write_concern_error {
            Some(ref wc_error) => Err(Error::new(
                ErrorKind::Write(WriteFailure::WriteConcernError(wc_error.clone())),
                self.labels.clone(),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CursorBody {
    pub(crate) cursor: CursorInfo,

    #[serde(rename = "operationTime")]
    pub(crate) operation_time: Option<Timestamp>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,

    pub(crate) ns: Namespace,

    #[serde(default)]
    pub(crate) first_batch: Vec<Document>,

    pub(crate) post_batch_resume_token: Option<Document>,
}
