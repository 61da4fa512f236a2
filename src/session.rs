//! Logical sessions as seen by operations: a server session id, causal consistency state, and a
//! reference count shared by every binding, channel source and cursor that uses the session.


use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    bson::{doc, spec::BinarySubtype, Binary, Bson, Document, Timestamp},
    trace::SESSION_TRACING_EVENT_TARGET,
};

/// Struct modeling a cluster time reported by the server.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTime {
    pub(crate) cluster_time: Timestamp,

    pub(crate) signature: Document,
}

impl ClusterTime {
    fn key(&self) -> (u32, u32) {
        (self.cluster_time.time, self.cluster_time.increment)
    }
}

impl PartialEq for ClusterTime {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ClusterTime {}

impl std::cmp::Ord for ClusterTime {
    fn cmp(&self, other: &ClusterTime) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::cmp::PartialOrd for ClusterTime {
    fn partial_cmp(&self, other: &ClusterTime) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Options for an explicitly started session.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct SessionOptions {
    /// Whether reads in this session should observe the session's previous operations. Defaults
    /// to true for explicit sessions.
    pub causal_consistency: Option<bool>,
}

#[derive(Debug)]
struct SessionState {
    id: Option<Document>,
    is_implicit: bool,
    causal_consistency: bool,
    cluster_time: Mutex<Option<ClusterTime>>,
    operation_time: Mutex<Option<Timestamp>>,
    txn_number: AtomicI64,
    references: AtomicUsize,
    ended: AtomicBool,
}

/// A reference to a logical session. Every handle counts as one reference; handles are created
/// with [`SessionHandle::fork`] and release their reference when dropped. The session ends when
/// the last reference is released.
#[derive(Debug)]
pub struct SessionHandle {
    state: Arc<SessionState>,
}

impl SessionHandle {
    /// Starts an explicit session with a client-generated id.
    pub fn new(options: SessionOptions) -> Self {
        Self::from_parts(
            Some(new_session_id()),
            false,
            options.causal_consistency.unwrap_or(true),
        )
    }

    /// Starts an implicit session, which is never causally consistent.
    pub fn implicit() -> Self {
        Self::from_parts(Some(new_session_id()), true, false)
    }

    /// A handle that carries no session at all. Commands sent with it have no `lsid`.
    pub fn none() -> Self {
        Self::from_parts(None, true, false)
    }

    fn from_parts(id: Option<Document>, is_implicit: bool, causal_consistency: bool) -> Self {
        Self {
            state: Arc::new(SessionState {
                id,
                is_implicit,
                causal_consistency,
                cluster_time: Mutex::new(None),
                operation_time: Mutex::new(None),
                txn_number: AtomicI64::new(0),
                references: AtomicUsize::new(1),
                ended: AtomicBool::new(false),
            }),
        }
    }

    /// Creates another reference to the same session.
    pub fn fork(&self) -> Self {
        self.state.references.fetch_add(1, Ordering::SeqCst);
        Self {
            state: self.state.clone(),
        }
    }

    /// The number of live handles to this session.
    pub fn reference_count(&self) -> usize {
        self.state.references.load(Ordering::SeqCst)
    }

    /// The `lsid` of this session, if there is one.
    pub fn id(&self) -> Option<&Document> {
        self.state.id.as_ref()
    }

    /// Whether this session was created implicitly for a single operation.
    pub fn is_implicit(&self) -> bool {
        self.state.is_implicit
    }

    /// Whether reads in this session are causally consistent.
    pub fn causal_consistency(&self) -> bool {
        self.state.causal_consistency
    }

    /// Whether every reference to the session has been released.
    pub fn is_ended(&self) -> bool {
        self.state.ended.load(Ordering::SeqCst)
    }

    /// The highest cluster time this session has seen.
    pub fn cluster_time(&self) -> Option<ClusterTime> {
        lock(&self.state.cluster_time).clone()
    }

    /// Set the cluster time to the provided one if it is greater than this session's highest seen
    /// cluster time or if this session's cluster time is `None`.
    pub fn advance_cluster_time(&self, to: &ClusterTime) {
        let mut cluster_time = lock(&self.state.cluster_time);
        if cluster_time.as_ref().map(|ct| ct < to).unwrap_or(true) {
            *cluster_time = Some(to.clone());
        }
    }

    /// The operation time returned by the last operation executed in this session.
    pub fn operation_time(&self) -> Option<Timestamp> {
        *lock(&self.state.operation_time)
    }

    /// Advance operation time for this session. If the provided timestamp is earlier than this
    /// session's current operation time, then the operation time is unchanged.
    pub fn advance_operation_time(&self, ts: Timestamp) {
        let mut operation_time = lock(&self.state.operation_time);
        *operation_time = match *operation_time {
            Some(current_op_time) if current_op_time < ts => Some(ts),
            None => Some(ts),
            current => current,
        };
    }

    /// Gets the current txn_number.
    pub(crate) fn txn_number(&self) -> i64 {
        self.state.txn_number.load(Ordering::SeqCst)
    }

    /// Increments the txn_number and returns the new value.
    pub(crate) fn get_and_increment_txn_number(&self) -> i64 {
        self.state.txn_number.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.state.references.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.ended.store(true, Ordering::SeqCst);
            if self.state.id.is_some() {
                tracing::debug!(
                    target: SESSION_TRACING_EVENT_TARGET,
                    implicit = self.state.is_implicit,
                    "Session ended"
                );
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_session_id() -> Document {
    let binary = Bson::Binary(Binary {
        subtype: BinarySubtype::Uuid,
        bytes: Uuid::new_v4().as_bytes().to_vec(),
    });
    doc! { "id": binary }
}
