use semver::Version;
use typed_builder::TypedBuilder;

use crate::sdam::ServerType;

/// Contains information about a given server in a format digestible by an operation.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
#[non_exhaustive]
pub struct ConnectionDescription {
    /// The version the server reported in its handshake.
    pub server_version: Version,

    /// The type of the server when the handshake occurred.
    #[builder(default)]
    pub server_type: ServerType,

    /// Whether the server supports logical sessions.
    #[builder(default)]
    pub supports_sessions: bool,

    /// The maximum size of a single document the server accepts.
    #[builder(default = 16 * 1024 * 1024)]
    pub max_bson_object_size: i64,

    /// The maximum permitted size of a BSON wire protocol message.
    #[builder(default = 48_000_000)]
    pub max_message_size_bytes: i32,

    /// The maximum number of inserts, updates, or deletes that can be included in a write batch.
    #[builder(default = 100_000)]
    pub max_write_batch_size: i64,

    /// The maximum wire version that the server understands.
    #[builder(default, setter(strip_option))]
    pub max_wire_version: Option<i32>,
}

impl ConnectionDescription {
    #[cfg(test)]
    pub(crate) fn new_testing() -> Self {
        Self::with_version(Version::new(7, 0, 0))
    }

    #[cfg(test)]
    pub(crate) fn with_version(server_version: Version) -> Self {
        Self::builder()
            .server_version(server_version)
            .server_type(ServerType::RsPrimary)
            .supports_sessions(true)
            .build()
    }
}
