use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use semver::Version;
use tokio_util::sync::CancellationToken;

use crate::{
    binding::Binding,
    bson::{doc, Bson, Document},
    cmap::{
        Channel,
        Command,
        ConnectionDescription,
        LegacyGetMore,
        LegacyQuery,
        LegacyReply,
        ResponseHandling,
        Server,
    },
    error::{Error, ErrorKind, Result},
    selection_criteria::ReadPreference,
    session::SessionHandle,
    BoxFuture,
};

type Responder = Box<dyn Fn(&Command) -> Result<Document> + Send + Sync>;

/// Something the mock server saw, in the order it saw it.
#[derive(Clone, Debug)]
pub(crate) enum MockEvent {
    ChannelAcquired,
    Command(Command),
    LegacyQuery(LegacyQuery),
    LegacyGetMore(LegacyGetMore),
    LegacyKillCursors(Vec<i64>),
}

/// An in-memory [`Server`] that replies to commands from a script, falling back to a responder
/// closure and then to `{ ok: 1 }`, and records everything it is asked to do.
#[derive(Clone)]
pub(crate) struct MockServer {
    inner: Arc<MockServerInner>,
}

struct MockServerInner {
    description: Mutex<ConnectionDescription>,
    replies: Mutex<VecDeque<Result<Document>>>,
    legacy_replies: Mutex<VecDeque<Result<LegacyReply>>>,
    channel_failures: Mutex<HashMap<usize, Error>>,
    channel_attempts: AtomicUsize,
    responder: Mutex<Option<Responder>>,
    events: Mutex<Vec<MockEvent>>,
}

impl MockServer {
    pub(crate) fn new(description: ConnectionDescription) -> Self {
        Self {
            inner: Arc::new(MockServerInner {
                description: Mutex::new(description),
                replies: Mutex::new(VecDeque::new()),
                legacy_replies: Mutex::new(VecDeque::new()),
                channel_failures: Mutex::new(HashMap::new()),
                channel_attempts: AtomicUsize::new(0),
                responder: Mutex::new(None),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn with_version(server_version: Version) -> Self {
        Self::new(ConnectionDescription::with_version(server_version))
    }

    pub(crate) fn reply(&self, reply: Document) -> &Self {
        self.inner.replies.lock().unwrap().push_back(Ok(reply));
        self
    }

    pub(crate) fn fail(&self, error: Error) -> &Self {
        self.inner.replies.lock().unwrap().push_back(Err(error));
        self
    }

    /// Queues the reply to the next legacy query or get-more message. Unscripted legacy messages
    /// get an empty reply for an exhausted cursor.
    pub(crate) fn reply_legacy(&self, reply: Result<LegacyReply>) -> &Self {
        self.inner.legacy_replies.lock().unwrap().push_back(reply);
        self
    }

    pub(crate) fn fail_next_channel(&self, error: Error) -> &Self {
        let attempt = self.inner.channel_attempts.load(Ordering::SeqCst);
        self.fail_channel(attempt, error)
    }

    /// Fails the channel acquisition with the given zero-based attempt number.
    pub(crate) fn fail_channel(&self, attempt: usize, error: Error) -> &Self {
        self.inner
            .channel_failures
            .lock()
            .unwrap()
            .insert(attempt, error);
        self
    }

    pub(crate) fn respond_with(
        &self,
        responder: impl Fn(&Command) -> Result<Document> + Send + Sync + 'static,
    ) {
        *self.inner.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// A binding to this server using `session` and the primary read preference.
    pub(crate) fn binding(&self, session: &SessionHandle) -> Binding {
        self.binding_with(ReadPreference::Primary, session)
    }

    pub(crate) fn binding_with(
        &self,
        read_preference: ReadPreference,
        session: &SessionHandle,
    ) -> Binding {
        Binding::new(Arc::new(self.clone()), read_preference, session)
    }

    pub(crate) fn events(&self) -> Vec<MockEvent> {
        self.inner.events.lock().unwrap().clone()
    }

    pub(crate) fn commands(&self) -> Vec<Command> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::Command(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn command_names(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c.name).collect()
    }

    /// The single command sent so far.
    pub(crate) fn only_command(&self) -> Command {
        let mut commands = self.commands();
        assert_eq!(commands.len(), 1, "expected one command, got {:?}", commands);
        commands.remove(0)
    }

    pub(crate) fn legacy_messages(&self) -> Vec<MockEvent> {
        self.events()
            .into_iter()
            .filter(|event| {
                matches!(
                    event,
                    MockEvent::LegacyQuery(_) | MockEvent::LegacyGetMore(_)
                )
            })
            .collect()
    }

    pub(crate) fn legacy_kills(&self) -> Vec<Vec<i64>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::LegacyKillCursors(ids) => Some(ids),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn channels_acquired(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, MockEvent::ChannelAcquired))
            .count()
    }

    fn record(&self, event: MockEvent) {
        self.inner.events.lock().unwrap().push(event);
    }

    fn next_legacy_reply(&self) -> Result<LegacyReply> {
        self.inner
            .legacy_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(LegacyReply::default()))
    }

    fn next_reply(&self, command: &Command) -> Result<Document> {
        if let Some(reply) = self.inner.replies.lock().unwrap().pop_front() {
            return reply;
        }
        match *self.inner.responder.lock().unwrap() {
            Some(ref responder) => responder(command),
            None => Ok(doc! { "ok": 1 }),
        }
    }
}

impl Server for MockServer {
    fn get_channel<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Box<dyn Channel>>> {
        Box::pin(async move {
            let attempt = self.inner.channel_attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.inner.channel_failures.lock().unwrap().remove(&attempt) {
                return Err(error);
            }
            self.record(MockEvent::ChannelAcquired);
            let description = self.inner.description.lock().unwrap().clone();
            Ok(Box::new(MockChannel {
                server: self.clone(),
                description,
            }) as Box<dyn Channel>)
        })
    }
}

struct MockChannel {
    server: MockServer,
    description: ConnectionDescription,
}

impl Channel for MockChannel {
    fn description(&self) -> &ConnectionDescription {
        &self.description
    }

    fn command<'a>(
        &'a self,
        command: Command,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Document>> {
        Box::pin(async move {
            self.server.record(MockEvent::Command(command.clone()));
            let reply = self.server.next_reply(&command)?;
            match command.response_handling {
                ResponseHandling::Ignore => Ok(Document::new()),
                _ => Ok(reply),
            }
        })
    }

    fn query<'a>(
        &'a self,
        query: LegacyQuery,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<LegacyReply>> {
        Box::pin(async move {
            self.server.record(MockEvent::LegacyQuery(query));
            self.server.next_legacy_reply()
        })
    }

    fn get_more<'a>(
        &'a self,
        get_more: LegacyGetMore,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<LegacyReply>> {
        Box::pin(async move {
            self.server.record(MockEvent::LegacyGetMore(get_more));
            self.server.next_legacy_reply()
        })
    }

    fn kill_cursors<'a>(
        &'a self,
        cursor_ids: &'a [i64],
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.server
                .record(MockEvent::LegacyKillCursors(cursor_ids.to_vec()));
            Ok(())
        })
    }
}

pub(crate) fn version(major: u64, minor: u64, patch: u64) -> Version {
    Version::new(major, minor, patch)
}

/// A reply opening (or continuing, when `batch_key` is `nextBatch`) a cursor.
pub(crate) fn cursor_reply(
    ns: &str,
    id: i64,
    batch_key: &str,
    batch: impl IntoIterator<Item = Document>,
) -> Document {
    let batch: Vec<Bson> = batch.into_iter().map(Bson::Document).collect();
    doc! {
        "cursor": {
            "id": id,
            "ns": ns,
            batch_key: batch,
        },
        "ok": 1,
    }
}

pub(crate) fn network_error() -> Error {
    ErrorKind::Io(Arc::new(std::io::ErrorKind::ConnectionReset.into())).into()
}
