use std::{future::Future, sync::LazyLock};

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// The runtime that drives the blocking API and any background work scheduled from outside of an
/// async context.
pub(crate) static TOKIO_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| match Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => panic!(
            "Error occurred when starting the underlying async runtime: {}",
            err
        ),
    });

/// Spawn a task in the background to run a future. The current runtime is used if there is one.
pub(crate) fn spawn<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => {
            TOKIO_RUNTIME.spawn(fut);
        }
    }
}

/// Run a future to completion from synchronous code.
///
/// Inside a multi-threaded runtime the calling worker is handed off with `block_in_place`.
/// A current-thread runtime has no other worker to hand off to, so calling this from one panics.
pub(crate) fn block_on<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => panic!(
            "the blocking API cannot be used from within a current-thread async runtime; use the \
             async API or a multi-threaded runtime instead"
        ),
        Ok(handle) => tokio::task::block_in_place(|| handle.block_on(fut)),
        Err(_) => TOKIO_RUNTIME.block_on(fut),
    }
}

/// Await a future unless the token is cancelled first, in which case `ErrorKind::Cancelled` is
/// returned and the future is dropped.
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled()),
        result = fut => result,
    }
}
