//! Contains the functionality for change streams.
pub mod event;
pub mod options;

use std::{collections::VecDeque, marker::PhantomData};

use derive_where::derive_where;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    binding::Binding,
    bson::{Document, Timestamp},
    change_stream::event::{ChangeStreamEvent, ResumeToken},
    cursor::AsyncCursor,
    error::{ErrorKind, Result},
    executor::execute_cursor_operation,
    operation::ChangeStreamAggregate,
    trace::{TracingRepresentation, CHANGE_STREAM_TRACING_EVENT_TARGET},
};

/// A `ChangeStream` streams the ongoing changes of its associated collection, database or
/// deployment. Change streams are opened by executing a [`ChangeStreamAggregate`].
///
/// `ChangeStream`s are "resumable", meaning that they can be restarted at a given place in the
/// stream of events. This is done automatically when the `ChangeStream` encounters certain
/// ["resumable"](https://github.com/mongodb/specifications/blob/master/source/change-streams/change-streams.md#resumable-error)
/// errors, such as transient network failures: the aggregate is run again from the most recent
/// [`ResumeToken`] and the old cursor is disposed of. At most one resume is attempted per call.
///
/// A stream can also be resumed manually by passing a token retrieved with
/// [`ChangeStream::resume_token`] into the `resume_after` or `start_after` option of a new
/// stream.
///
/// If a `ChangeStream` is still open when it goes out of scope, its cursor is killed in the
/// background.
#[derive_where(Debug)]
pub struct ChangeStream<T = ChangeStreamEvent<Document>> {
    /// The cursor of the current aggregate.
    cursor: AsyncCursor,

    /// The binding the stream was opened through, used to resume.
    binding: Binding,

    /// The operation that opened the stream, rerun on resume.
    aggregate: ChangeStreamAggregate,

    /// Documents of the current batch that have not been returned yet.
    batch: VecDeque<Document>,

    /// The `_id` of the most recently returned event.
    document_token: Option<ResumeToken>,

    /// Whether any event has been returned, used to pick between `startAfter` and
    /// `resumeAfter` when resuming.
    document_returned: bool,

    /// The `operationTime` of the initial aggregate, if the stream may restart from it.
    initial_operation_time: Option<Timestamp>,

    #[derive_where(skip)]
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ChangeStream<T>
where
    T: DeserializeOwned,
{
    pub(crate) fn new(
        mut cursor: AsyncCursor,
        binding: Binding,
        aggregate: ChangeStreamAggregate,
    ) -> Self {
        let initial_operation_time = cursor.operation_time();
        let batch = cursor.take_first_batch().into();
        Self {
            cursor,
            binding,
            aggregate,
            batch,
            document_token: None,
            document_returned: false,
            initial_operation_time,
            _phantom: PhantomData,
        }
    }

    /// Returns the cached resume token that can be used to resume after the most recently returned
    /// change.
    ///
    /// Once the current batch has been fully returned, this is the batch's
    /// `postBatchResumeToken` if the server sent one. Otherwise it is the `_id` of the last
    /// returned event, falling back to the `start_after` or `resume_after` token the stream was
    /// opened with.
    pub fn resume_token(&self) -> Option<ResumeToken> {
        if self.batch.is_empty() {
            if let Some(token) = self.cursor.post_batch_resume_token() {
                return Some(ResumeToken::from(token.clone()));
            }
        }
        self.document_token
            .clone()
            .or_else(|| self.aggregate.initial_resume_token())
    }

    /// Update the type streamed values will be parsed as.
    pub fn with_type<D: DeserializeOwned>(self) -> ChangeStream<D> {
        ChangeStream {
            cursor: self.cursor,
            binding: self.binding,
            aggregate: self.aggregate,
            batch: self.batch,
            document_token: self.document_token,
            document_returned: self.document_returned,
            initial_operation_time: self.initial_operation_time,
            _phantom: PhantomData,
        }
    }

    /// Returns whether the change stream will continue to receive events.
    pub fn is_alive(&self) -> bool {
        !self.batch.is_empty() || (!self.cursor.is_exhausted() && !self.cursor.is_closed())
    }

    /// Retrieves the next result from the change stream, if any.
    ///
    /// Where [`ChangeStream::next`] loops until a change document is received, this makes at
    /// most one request and returns `None` if the returned document batch is empty. Use it when
    /// storing the resume token, so that the token reflects the server's progress even when
    /// nothing changes:
    ///
    /// ```no_run
    /// # use mongodb_core_operations::{change_stream::ChangeStream, error::Result};
    /// # use tokio_util::sync::CancellationToken;
    /// # async fn func(mut change_stream: ChangeStream) -> Result<()> {
    /// let cancel = CancellationToken::new();
    /// let mut resume_token = None;
    /// while change_stream.is_alive() {
    ///     if let Some(event) = change_stream.next_if_any(&cancel).await? {
    ///         // process event
    ///     }
    ///     resume_token = change_stream.resume_token();
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn next_if_any(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        if self.batch.is_empty() && !self.move_next(cancel).await? {
            return Ok(None);
        }
        match self.batch.pop_front() {
            Some(document) => self.deliver(document).map(Some),
            None => Ok(None),
        }
    }

    /// Retrieves the next result from the change stream, waiting for one to arrive. Returns
    /// `None` once the stream can no longer produce events, e.g. after an `invalidate` event.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        loop {
            if let Some(event) = self.next_if_any(cancel).await? {
                return Ok(Some(event));
            }
            if !self.is_alive() {
                return Ok(None);
            }
        }
    }

    /// Closes the stream, killing its cursor on the server. Errors from the kill are returned.
    pub async fn close(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.batch.clear();
        self.cursor.close(cancel).await
    }

    /// Closes the stream, ignoring any error encountered while killing its cursor.
    pub async fn dispose(&mut self) {
        self.batch.clear();
        self.cursor.dispose().await;
    }

    /// Fetches the next batch into the buffer, resuming once if the cursor fails with a
    /// resumable error.
    pub(crate) async fn move_next(&mut self, cancel: &CancellationToken) -> Result<bool> {
        let has_batch = match self.cursor.move_next(cancel).await {
            Ok(has_batch) => has_batch,
            Err(error) if error.is_resumable() => {
                tracing::debug!(
                    target: CHANGE_STREAM_TRACING_EVENT_TARGET,
                    namespace = %self.cursor.namespace(),
                    error = error.tracing_representation(),
                    "Resuming change stream"
                );
                self.resume(cancel).await?;
                self.cursor.move_next(cancel).await?
            }
            Err(error) => return Err(error),
        };
        if has_batch {
            self.batch.extend(self.cursor.take_current());
        }
        Ok(has_batch)
    }

    async fn resume(&mut self, cancel: &CancellationToken) -> Result<()> {
        let token = self.resume_token();
        self.aggregate
            .update_for_resume(token, self.document_returned, self.initial_operation_time);

        let cursor = execute_cursor_operation(&mut self.aggregate, &self.binding, cancel).await?;
        let mut old = std::mem::replace(&mut self.cursor, cursor);
        old.dispose().await;
        Ok(())
    }

    fn deliver(&mut self, document: Document) -> Result<T> {
        let token = ResumeToken::from_event(&document).ok_or(ErrorKind::MissingResumeToken)?;
        self.document_token = Some(token);
        self.document_returned = true;
        Ok(bson::from_document(document)?)
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> &AsyncCursor {
        &self.cursor
    }
}
