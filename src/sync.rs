//! The blocking API. Every call drives the same future as its async counterpart to completion on
//! a shared runtime, so both APIs send the same commands.


use derive_where::derive_where;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    binding::Binding,
    bson::Document,
    change_stream::{event::ResumeToken, ChangeStream as AsyncChangeStream},
    cursor::AsyncCursor,
    error::Result,
    namespace::Namespace,
    operation::Executable,
    runtime,
};

/// Runs an operation from synchronous code.
///
/// Outside of an async runtime the operation runs on a shared multi-threaded runtime. From inside
/// a multi-threaded runtime the current worker blocks in place. Calling any blocking method from
/// a current-thread runtime, such as the default `#[tokio::test]` one, panics.
pub trait ExecuteBlocking: Executable {
    /// Executes the operation, blocking the current thread until it completes.
    fn execute_blocking(
        &mut self,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<Self::Output>;
}

impl<E: Executable + ?Sized> ExecuteBlocking for E {
    fn execute_blocking(
        &mut self,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<Self::Output> {
        runtime::block_on(self.execute(binding, cancel))
    }
}

/// A blocking cursor. Iterating it yields the documents of the result set, fetching further
/// batches from the server as needed, so any call to `next` may perform I/O.
///
/// ```no_run
/// # use mongodb_core_operations::{
/// #     bson::doc, error::Result, operation::Find, sync::{Cursor, ExecuteBlocking}, Binding,
/// #     Namespace,
/// # };
/// # use tokio_util::sync::CancellationToken;
/// # fn func(binding: &Binding) -> Result<()> {
/// let cancel = CancellationToken::new();
/// let mut find = Find::new(Namespace::new("db", "coll"), doc! { "x": 1 }, None);
/// let cursor = Cursor::from(find.execute_blocking(binding, &cancel)?);
/// for doc in cursor {
///     println!("{}", doc?);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Cursor {
    async_cursor: AsyncCursor,
    cancel: CancellationToken,
}

impl Cursor {
    /// Wraps an async cursor. Calls made through the returned cursor honor `cancel`.
    pub fn new(async_cursor: AsyncCursor, cancel: CancellationToken) -> Self {
        Self {
            async_cursor,
            cancel,
        }
    }

    /// The server-side id of the cursor, 0 once it is exhausted.
    pub fn id(&self) -> i64 {
        self.async_cursor.id()
    }

    /// The namespace the cursor iterates.
    pub fn namespace(&self) -> &Namespace {
        self.async_cursor.namespace()
    }

    /// Whether the server has no more results for this cursor.
    pub fn is_exhausted(&self) -> bool {
        self.async_cursor.is_exhausted()
    }

    /// Drains the cursor into a vector.
    pub fn collect_all(&mut self) -> Result<Vec<Document>> {
        runtime::block_on(self.async_cursor.collect(&self.cancel))
    }

    /// Kills the cursor on the server if it is still open.
    pub fn close(&mut self) -> Result<()> {
        runtime::block_on(self.async_cursor.close(&self.cancel))
    }
}

impl From<AsyncCursor> for Cursor {
    fn from(async_cursor: AsyncCursor) -> Self {
        Self::new(async_cursor, CancellationToken::new())
    }
}

impl Iterator for Cursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        runtime::block_on(self.async_cursor.next(&self.cancel)).transpose()
    }
}

/// A blocking [change stream](AsyncChangeStream). Iterating it waits for events until the stream
/// is no longer alive.
#[derive_where(Debug)]
pub struct ChangeStream<T = crate::change_stream::event::ChangeStreamEvent<Document>> {
    async_stream: AsyncChangeStream<T>,
    cancel: CancellationToken,
}

impl<T> ChangeStream<T>
where
    T: DeserializeOwned,
{
    /// Wraps an async change stream. Calls made through the returned stream honor `cancel`.
    pub fn new(async_stream: AsyncChangeStream<T>, cancel: CancellationToken) -> Self {
        Self {
            async_stream,
            cancel,
        }
    }

    /// Returns the cached resume token that can be used to resume after the most recently returned
    /// change.
    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.async_stream.resume_token()
    }

    /// Update the type streamed values will be parsed as.
    pub fn with_type<D: DeserializeOwned>(self) -> ChangeStream<D> {
        ChangeStream {
            async_stream: self.async_stream.with_type(),
            cancel: self.cancel,
        }
    }

    /// Returns whether the change stream will continue to receive events.
    pub fn is_alive(&self) -> bool {
        self.async_stream.is_alive()
    }

    /// Retrieves the next result from the change stream, if any.
    ///
    /// Where `Iterator::next` waits until a change document is received, this makes at most one
    /// request and returns `None` if the returned batch is empty.
    pub fn next_if_any(&mut self) -> Result<Option<T>> {
        runtime::block_on(self.async_stream.next_if_any(&self.cancel))
    }

    /// Closes the stream, killing its cursor on the server.
    pub fn close(&mut self) -> Result<()> {
        runtime::block_on(self.async_stream.close(&self.cancel))
    }
}

impl<T: DeserializeOwned> From<AsyncChangeStream<T>> for ChangeStream<T> {
    fn from(async_stream: AsyncChangeStream<T>) -> Self {
        Self::new(async_stream, CancellationToken::new())
    }
}

impl<T> Iterator for ChangeStream<T>
where
    T: DeserializeOwned,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        runtime::block_on(self.async_stream.next(&self.cancel)).transpose()
    }
}
