//! The operations layer of a MongoDB driver. It turns typed requests (find, aggregate, bulk
//! writes, change streams and friends) into server commands, adapting each command to the
//! capabilities of the server it is sent to, and interprets the replies as typed results and
//! errors. It uses the [`bson`] crate for BSON support.
//!
//! The crate does not open connections itself. Transport is supplied through the
//! [`cmap::Server`] and [`cmap::Channel`] traits, and operations run against a [`Binding`]: a
//! server, a read preference and a [`SessionHandle`].
//!
//! # Example Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use mongodb_core_operations::{
//! #     bson::{doc, Document},
//! #     cmap::Server,
//! #     error::Result,
//! #     operation::{Executable, Find},
//! #     options::{FindOptions, ReadPreference},
//! #     Binding,
//! #     Namespace,
//! #     SessionHandle,
//! # };
//! # use tokio_util::sync::CancellationToken;
//! # async fn run(server: Arc<dyn Server>) -> Result<()> {
//! let session = SessionHandle::implicit();
//! let binding = Binding::new(server, ReadPreference::Primary, &session);
//! let cancel = CancellationToken::new();
//!
//! let options = FindOptions::builder().batch_size(100).build();
//! let mut find = Find::new(Namespace::new("db", "coll"), doc! { "x": 1 }, options);
//! let mut cursor = find.execute(&binding, &cancel).await?;
//! while let Some(doc) = cursor.next(&cancel).await? {
//!     println!("{}", doc);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Every operation can also be run from synchronous code through
//! [`sync::ExecuteBlocking`], which drives the same future on a shared runtime.
//!
//! # Logging
//!
//! Commands, cursor activity, change stream resumes and session bookkeeping are reported as
//! [`tracing`](https://docs.rs/tracing) events at `debug` level, under the
//! `mongodb_core_operations::command`, `mongodb_core_operations::cursor`,
//! `mongodb_core_operations::change_stream` and `mongodb_core_operations::session` targets.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod options;

pub use ::bson;

mod binding;
mod bson_util;
pub mod change_stream;
pub mod cmap;
mod collation;
mod concern;
mod cursor;
pub mod error;
mod executor;
pub mod feature;
mod max_time;
mod namespace;
pub mod operation;
pub mod results;
pub(crate) mod runtime;
mod sdam;
mod selection_criteria;
mod serde_util;
mod session;
pub mod sync;
mod trace;

pub use crate::{
    binding::{Binding, ChannelSource},
    cursor::AsyncCursor,
    namespace::Namespace,
    sdam::ServerType,
    session::{ClusterTime, SessionHandle},
};

/// A boxed future, as returned by the object-safe async traits of this crate.
pub type BoxFuture<'a, T> = futures_util::future::BoxFuture<'a, T>;
