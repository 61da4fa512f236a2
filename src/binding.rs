use std::sync::Arc;

use derive_where::derive_where;
use tokio_util::sync::CancellationToken;

use crate::{
    cmap::{Channel, Server},
    error::Result,
    selection_criteria::ReadPreference,
    session::SessionHandle,
};

/// Everything an operation needs to run: the server to run it on, the read preference to route
/// with, and the session to run it in.
#[derive_where(Debug)]
pub struct Binding {
    #[derive_where(skip)]
    server: Arc<dyn Server>,
    read_preference: ReadPreference,
    session: SessionHandle,
}

impl Binding {
    /// Creates a binding. The binding holds its own reference to `session`.
    pub fn new(
        server: Arc<dyn Server>,
        read_preference: ReadPreference,
        session: &SessionHandle,
    ) -> Self {
        Self {
            server,
            read_preference,
            session: session.fork(),
        }
    }

    /// The read preference operations executed through this binding default to.
    pub fn read_preference(&self) -> &ReadPreference {
        &self.read_preference
    }

    /// The session operations executed through this binding run in.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Creates a channel source that holds its own session reference.
    pub fn channel_source(&self) -> ChannelSource {
        ChannelSource {
            server: self.server.clone(),
            session: self.session.fork(),
        }
    }

    /// Creates another binding to the same server and session.
    pub fn fork(&self) -> Self {
        Self {
            server: self.server.clone(),
            read_preference: self.read_preference.clone(),
            session: self.session.fork(),
        }
    }
}

/// A handle to one server and one session, from which channels are acquired. Cursors keep one of
/// these for as long as they may need to contact the server.
#[derive_where(Debug)]
pub struct ChannelSource {
    #[derive_where(skip)]
    server: Arc<dyn Server>,
    session: SessionHandle,
}

impl ChannelSource {
    /// Acquires a channel to the server.
    pub async fn get_channel(&self, cancel: &CancellationToken) -> Result<Box<dyn Channel>> {
        crate::runtime::cancellable(cancel, self.server.get_channel(cancel)).await
    }

    /// The session this source is bound to.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Creates another source for the same server and session.
    pub fn fork(&self) -> Self {
        Self {
            server: self.server.clone(),
            session: self.session.fork(),
        }
    }
}
