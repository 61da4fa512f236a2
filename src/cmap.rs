//! The seam between operations and the transport. A [`Server`] hands out [`Channel`]s; a channel
//! sends one command at a time and returns the server's reply document.

mod command;
mod description;
mod legacy;

use tokio_util::sync::CancellationToken;

pub use self::{
    command::{Command, DocumentSequence, ResponseHandling},
    description::ConnectionDescription,
    legacy::{LegacyGetMore, LegacyQuery, LegacyReply, QueryFlags, ResponseFlags},
};
pub(crate) use self::command::CommandResponse;
use crate::{bson::Document, error::Result, BoxFuture};

/// A request/response channel bound to a single server connection.
///
/// Implementations own the wire protocol: framing, compression, authentication and TLS all live
/// behind this trait.
pub trait Channel: Send + Sync {
    /// The description of the server this channel talks to, as negotiated in the handshake.
    fn description(&self) -> &ConnectionDescription;

    /// Sends a command and returns the server's reply document, whether or not the reply
    /// reports success. When the command's [`ResponseHandling`] is `Ignore`, the channel returns
    /// an empty document as soon as the message has been written.
    ///
    /// Network failures are reported as `ErrorKind::Io`.
    fn command<'a>(
        &'a self,
        command: Command,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Document>>;

    /// Sends a legacy `OP_QUERY` message and returns its `OP_REPLY`. Only used for servers that
    /// do not support the `find` command.
    fn query<'a>(
        &'a self,
        query: LegacyQuery,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<LegacyReply>>;

    /// Sends a legacy `OP_GET_MORE` message and returns its `OP_REPLY`. Only used for servers
    /// that do not support the `getMore` command.
    fn get_more<'a>(
        &'a self,
        get_more: LegacyGetMore,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<LegacyReply>>;

    /// Kills the given cursors using the legacy `OP_KILL_CURSORS` message. Only used for servers
    /// that do not support the `killCursors` command.
    fn kill_cursors<'a>(
        &'a self,
        cursor_ids: &'a [i64],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;
}

/// A source of channels to one server.
pub trait Server: Send + Sync {
    /// Acquires a channel. This may wait, e.g. on a connection pool, and is one of the points at
    /// which cancellation is observed.
    fn get_channel<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Box<dyn Channel>>>;
}
