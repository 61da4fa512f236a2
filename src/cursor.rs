
use std::collections::VecDeque;

use futures_core::Stream;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use crate::{
    binding::ChannelSource,
    bson::{Bson, Document, Timestamp},
    cmap::{LegacyGetMore, LegacyReply},
    error::{ErrorKind, Result},
    executor::{execute_get_more_message, execute_on_channel},
    feature::Feature,
    max_time::MaxTime,
    namespace::Namespace,
    operation::{
        get_more::{GetMore, GetMoreResult},
        kill_cursors::KillCursors,
        CursorBody,
    },
    runtime,
    selection_criteria::ReadPreference,
    trace::{TracingRepresentation, CURSOR_TRACING_EVENT_TARGET},
};

/// Everything needed to iterate a server cursor, as returned by the command that opened it.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    pub(crate) ns: Namespace,
    pub(crate) id: i64,
    pub(crate) first_batch: Vec<Document>,
    pub(crate) batch_size: Option<u32>,
    pub(crate) limit: Option<i64>,
    pub(crate) max_await_time: Option<MaxTime>,
    pub(crate) comment: Option<Bson>,
    pub(crate) post_batch_resume_token: Option<Document>,
    pub(crate) operation_time: Option<Timestamp>,
}

impl CursorSpecification {
    pub(crate) fn new(body: CursorBody, batch_size: Option<u32>, limit: Option<i64>) -> Self {
        Self {
            ns: body.cursor.ns,
            id: body.cursor.id,
            first_batch: body.cursor.first_batch,
            batch_size,
            limit: limit.filter(|l| *l > 0),
            max_await_time: None,
            comment: None,
            post_batch_resume_token: body.cursor.post_batch_resume_token,
            operation_time: body.operation_time,
        }
    }

    /// A specification for a cursor opened by a legacy query.
    pub(crate) fn from_legacy_reply(
        ns: Namespace,
        reply: LegacyReply,
        batch_size: Option<u32>,
        limit: Option<i64>,
    ) -> Self {
        Self {
            ns,
            id: reply.cursor_id,
            first_batch: reply.documents,
            batch_size,
            limit: limit.filter(|l| *l > 0),
            max_await_time: None,
            comment: None,
            post_batch_resume_token: None,
            operation_time: None,
        }
    }

    /// A specification for a result that was returned whole, without a server cursor.
    pub(crate) fn exhausted(ns: Namespace, documents: Vec<Document>) -> Self {
        Self {
            ns,
            id: 0,
            first_batch: documents,
            batch_size: None,
            limit: None,
            max_await_time: None,
            comment: None,
            post_batch_resume_token: None,
            operation_time: None,
        }
    }

    pub(crate) fn with_max_await_time(mut self, max_await_time: Option<MaxTime>) -> Self {
        self.max_await_time = max_await_time;
        self
    }

    pub(crate) fn with_comment(mut self, comment: Option<Bson>) -> Self {
        self.comment = comment;
        self
    }
}

/// A cursor over the results of a query, delivered one server batch at a time.
///
/// The cursor holds a [`ChannelSource`] for as long as the server cursor may be alive, and gives
/// it up as soon as the server reports the cursor exhausted or the cursor is closed. A cursor
/// that is dropped while still open on the server is killed in the background; call
/// [`AsyncCursor::close`] to observe the outcome instead.
#[derive(Debug)]
pub struct AsyncCursor {
    source: Option<ChannelSource>,
    ns: Namespace,
    id: i64,
    batch_size: Option<u32>,
    limit: Option<i64>,
    max_await_time: Option<MaxTime>,
    comment: Option<Bson>,
    count: i64,
    first_batch: Option<Vec<Document>>,
    current: Option<Vec<Document>>,
    buffer: VecDeque<Document>,
    post_batch_resume_token: Option<Document>,
    operation_time: Option<Timestamp>,
    closed: bool,
}

impl AsyncCursor {
    pub(crate) fn new(source: ChannelSource, spec: CursorSpecification) -> Self {
        let mut first_batch = spec.first_batch;
        if let Some(limit) = spec.limit {
            first_batch.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        let count = first_batch.len() as i64;

        Self {
            source: (spec.id != 0).then_some(source),
            ns: spec.ns,
            id: spec.id,
            batch_size: spec.batch_size,
            limit: spec.limit,
            max_await_time: spec.max_await_time,
            comment: spec.comment,
            count,
            first_batch: Some(first_batch),
            current: Some(Vec::new()),
            buffer: VecDeque::new(),
            post_batch_resume_token: spec.post_batch_resume_token,
            operation_time: spec.operation_time,
            closed: false,
        }
    }

    /// Advances to the next batch, fetching it from the server if necessary. Returns `false` once
    /// the results are exhausted or the limit has been reached.
    ///
    /// The first call delivers the batch returned with the opening command without any I/O. A
    /// batch fetched from a cursor the server is keeping open (e.g. a tailable cursor) may be
    /// empty.
    pub async fn move_next(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if self.closed {
            return Err(ErrorKind::CursorClosed.into());
        }

        if let Some(batch) = self.first_batch.take() {
            self.current = Some(batch);
            return Ok(true);
        }

        if self.current.is_none() {
            return Ok(false);
        }

        if self.id == 0 || self.limit_reached() {
            self.current = None;
            self.finish(cancel).await;
            return Ok(false);
        }

        let result = self.get_more(cancel).await?;
        self.save_batch(result);
        Ok(true)
    }

    /// The batch the last successful [`AsyncCursor::move_next`] advanced to.
    pub fn current(&self) -> &[Document] {
        self.current.as_deref().unwrap_or_default()
    }

    /// Returns the next document, fetching further batches as needed. Returns `None` once the
    /// cursor is exhausted.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<Document>> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return Ok(Some(doc));
            }
            if !self.move_next(cancel).await? {
                return Ok(None);
            }
            let batch = self.current.take().unwrap_or_default();
            self.buffer.extend(batch);
            self.current = Some(Vec::new());
        }
    }

    /// Takes the current batch, leaving the cursor positioned where it was.
    pub(crate) fn take_current(&mut self) -> Vec<Document> {
        match self.current {
            Some(ref mut batch) => std::mem::take(batch),
            None => Vec::new(),
        }
    }

    /// Takes the batch returned with the opening command, if it has not been delivered yet.
    pub(crate) fn take_first_batch(&mut self) -> Vec<Document> {
        self.first_batch.take().unwrap_or_default()
    }

    /// Converts the cursor into a [`Stream`] of documents, fetching further batches as the
    /// stream is polled.
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = Result<Document>> {
        stream::try_unfold((self, cancel), |(mut cursor, cancel)| async move {
            let next = cursor.next(&cancel).await?;
            Ok(next.map(|doc| (doc, (cursor, cancel))))
        })
    }

    /// Drains the cursor into a vector.
    pub async fn collect(&mut self, cancel: &CancellationToken) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        while let Some(doc) = self.next(cancel).await? {
            documents.push(doc);
        }
        Ok(documents)
    }

    /// The server-side id of this cursor. Zero once the server has exhausted it.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// The namespace the cursor iterates, as reported by the server.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Whether the server side of this cursor is known to be gone.
    pub fn is_exhausted(&self) -> bool {
        self.id == 0
    }

    /// The `postBatchResumeToken` of the most recent batch, if the server sent one.
    pub fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    pub(crate) fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    pub(crate) fn has_channel_source(&self) -> bool {
        self.source.is_some()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the cursor, killing it on the server if it is still open there. Errors from the
    /// kill are returned. Closing an already closed cursor does nothing.
    pub async fn close(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.first_batch = None;
        self.current = None;
        self.buffer.clear();

        match self.source.take() {
            Some(source) if self.id != 0 => {
                let id = std::mem::replace(&mut self.id, 0);
                kill_cursor(&source, &self.ns, id, cancel).await
            }
            _ => Ok(()),
        }
    }

    /// Closes the cursor, ignoring any error encountered while killing it.
    pub async fn dispose(&mut self) {
        let cancel = CancellationToken::new();
        if let Err(error) = self.close(&cancel).await {
            tracing::debug!(
                target: CURSOR_TRACING_EVENT_TARGET,
                namespace = %self.ns,
                error = error.tracing_representation(),
                "Ignoring error while disposing cursor"
            );
        }
    }

    fn limit_reached(&self) -> bool {
        matches!(self.limit, Some(limit) if self.count >= limit)
    }

    fn next_batch_size(&self) -> Option<i32> {
        let mut batch_size = self.batch_size.map(i64::from).unwrap_or(0);
        if let Some(limit) = self.limit {
            let remaining = limit - self.count;
            if batch_size == 0 || batch_size > remaining {
                batch_size = remaining;
            }
        }
        (batch_size > 0).then(|| i32::try_from(batch_size).unwrap_or(i32::MAX))
    }

    async fn get_more(&mut self, cancel: &CancellationToken) -> Result<GetMoreResult> {
        let source = match self.source {
            Some(ref source) => source,
            None => return Err(ErrorKind::CursorClosed.into()),
        };
        let channel = source.get_channel(cancel).await?;

        tracing::debug!(
            target: CURSOR_TRACING_EVENT_TARGET,
            namespace = %self.ns,
            cursorId = self.id,
            "Fetching next batch"
        );

        // The getMore command arrived together with find.
        if !Feature::FIND_COMMAND.is_supported(&channel.description().server_version) {
            let message = LegacyGetMore {
                ns: self.ns.clone(),
                cursor_id: self.id,
                number_to_return: self.next_batch_size().unwrap_or(0),
            };
            let reply = execute_get_more_message(channel.as_ref(), message, cancel).await?;
            return Ok(GetMoreResult {
                batch: reply.documents,
                id: reply.cursor_id,
                post_batch_resume_token: None,
            });
        }

        let mut op = GetMore::new(
            self.ns.clone(),
            self.id,
            self.next_batch_size(),
            self.max_await_time,
            self.comment.clone(),
        );
        execute_on_channel(
            &mut op,
            channel.as_ref(),
            source.session(),
            &ReadPreference::Primary,
            None,
            cancel,
        )
        .await
    }

    fn save_batch(&mut self, result: GetMoreResult) {
        let mut batch = result.batch;
        self.count += batch.len() as i64;
        if let Some(limit) = self.limit {
            if self.count > limit {
                let excess = usize::try_from(self.count - limit).unwrap_or(batch.len());
                batch.truncate(batch.len().saturating_sub(excess));
                self.count = limit;
            }
        }

        self.current = Some(batch);
        self.id = result.id;
        if result.post_batch_resume_token.is_some() {
            self.post_batch_resume_token = result.post_batch_resume_token;
        }

        if self.id == 0 {
            self.release_source();
        }
    }

    /// Gives up the channel source once the cursor can produce nothing more, first killing the
    /// server cursor if it is still open there (e.g. after the limit was reached).
    async fn finish(&mut self, cancel: &CancellationToken) {
        if self.id != 0 {
            if let Some(ref source) = self.source {
                let id = std::mem::replace(&mut self.id, 0);
                if let Err(error) = kill_cursor(source, &self.ns, id, cancel).await {
                    tracing::debug!(
                        target: CURSOR_TRACING_EVENT_TARGET,
                        namespace = %self.ns,
                        cursorId = id,
                        error = error.tracing_representation(),
                        "Ignoring error while killing cursor at its limit"
                    );
                }
            }
        }
        self.release_source();
    }

    fn release_source(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!(
                target: CURSOR_TRACING_EVENT_TARGET,
                namespace = %self.ns,
                "Cursor finished, releasing channel source"
            );
        }
    }
}

impl Drop for AsyncCursor {
    fn drop(&mut self) {
        if self.closed || self.id == 0 {
            return;
        }
        let Some(source) = self.source.take() else {
            return;
        };
        let ns = self.ns.clone();
        let id = self.id;
        runtime::spawn(async move {
            let cancel = CancellationToken::new();
            if let Err(error) = kill_cursor(&source, &ns, id, &cancel).await {
                tracing::debug!(
                    target: CURSOR_TRACING_EVENT_TARGET,
                    namespace = %ns,
                    cursorId = id,
                    error = error.tracing_representation(),
                    "Failed to kill dropped cursor"
                );
            }
        });
    }
}

/// Kills a server cursor, with the `killCursors` command when the server supports it and the
/// legacy wire message otherwise.
pub(crate) async fn kill_cursor(
    source: &ChannelSource,
    ns: &Namespace,
    id: i64,
    cancel: &CancellationToken,
) -> Result<()> {
    let channel = source.get_channel(cancel).await?;
    let description = channel.description();

    tracing::debug!(
        target: CURSOR_TRACING_EVENT_TARGET,
        namespace = %ns,
        cursorId = id,
        "Killing cursor"
    );

    if Feature::KILL_CURSORS_COMMAND.is_supported(&description.server_version) {
        let mut op = KillCursors::new(ns.clone(), id);
        execute_on_channel(
            &mut op,
            channel.as_ref(),
            source.session(),
            &ReadPreference::Primary,
            None,
            cancel,
        )
        .await
    } else {
        runtime::cancellable(cancel, channel.kill_cursors(&[id], cancel)).await
    }
}
