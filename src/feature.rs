//! The table of server capabilities and the versions that introduced them.


use std::fmt;

use semver::Version;

use crate::error::{Error, Result};

/// A capability introduced in a particular server version. Features are never removed, so a
/// feature is supported by every version at or above the one that introduced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Feature {
    name: &'static str,
    first_supported_version: Version,
}

impl Feature {
    pub const AGGREGATE: Feature = Feature::new("Aggregate", 2, 2, 0);
    pub const AGGREGATE_ALLOW_DISK_USE: Feature = Feature::new("AggregateAllowDiskUse", 2, 6, 0);
    pub const AGGREGATE_COMMENT: Feature = Feature::new("AggregateComment", 3, 6, 0);
    pub const AGGREGATE_CURSOR_RESULT: Feature = Feature::new("AggregateCursorResult", 2, 6, 0);
    pub const AGGREGATE_EXPLAIN: Feature = Feature::new("AggregateExplain", 2, 6, 0);
    pub const AGGREGATE_HINT: Feature = Feature::new("AggregateHint", 3, 6, 0);
    pub const AGGREGATE_LET: Feature = Feature::new("AggregateLet", 5, 0, 0);
    pub const AGGREGATE_MERGE: Feature = Feature::new("AggregateMerge", 4, 2, 0);
    pub const AGGREGATE_OUT: Feature = Feature::new("AggregateOut", 2, 6, 0);
    pub const ARRAY_FILTERS: Feature = Feature::new("ArrayFilters", 3, 6, 0);
    pub const BYPASS_DOCUMENT_VALIDATION: Feature =
        Feature::new("BypassDocumentValidation", 3, 2, 0);
    pub const CHANGE_STREAM_ALL_CHANGES_FOR_CLUSTER: Feature =
        Feature::new("ChangeStreamAllChangesForCluster", 4, 0, 0);
    pub const CHANGE_STREAM_FOR_DATABASE: Feature = Feature::new("ChangeStreamForDatabase", 4, 0, 0);
    pub const CHANGE_STREAM_POST_BATCH_RESUME_TOKEN: Feature =
        Feature::new("ChangeStreamPostBatchResumeToken", 4, 0, 7);
    pub const CHANGE_STREAM_PRE_POST_IMAGES: Feature =
        Feature::new("ChangeStreamPrePostImages", 6, 0, 0);
    pub const CHANGE_STREAM_STAGE: Feature = Feature::new("ChangeStreamStage", 3, 6, 0);
    pub const CHANGE_STREAM_START_AFTER: Feature = Feature::new("ChangeStreamStartAfter", 4, 1, 1);
    pub const CHANGE_STREAM_START_AT_OPERATION_TIME: Feature =
        Feature::new("ChangeStreamStartAtOperationTime", 4, 0, 0);
    pub const CLUSTERED_INDEXES: Feature = Feature::new("ClusteredIndexes", 5, 3, 0);
    pub const COLLATION: Feature = Feature::new("Collation", 3, 4, 0);
    pub const COMMANDS_THAT_WRITE_ACCEPT_WRITE_CONCERN: Feature =
        Feature::new("CommandsThatWriteAcceptWriteConcern", 3, 4, 0);
    pub const CREATE_INDEX_COMMIT_QUORUM: Feature = Feature::new("CreateIndexCommitQuorum", 4, 4, 0);
    pub const CREATE_INDEXES_COMMAND: Feature = Feature::new("CreateIndexesCommand", 2, 6, 0);
    pub const DOCUMENT_VALIDATION: Feature = Feature::new("DocumentValidation", 3, 2, 0);
    pub const FIND_ALLOW_DISK_USE: Feature = Feature::new("FindAllowDiskUse", 4, 4, 0);
    pub const FIND_AND_MODIFY_WRITE_CONCERN: Feature =
        Feature::new("FindAndModifyWriteConcern", 3, 2, 0);
    pub const FIND_COMMAND: Feature = Feature::new("FindCommand", 3, 2, 0);
    pub const FIND_LET: Feature = Feature::new("FindLet", 5, 0, 0);
    pub const GEO_NEAR_COMMAND: Feature = Feature::new("GeoNearCommand", 1, 0, 0);
    pub const GET_MORE_COMMENT: Feature = Feature::new("GetMoreComment", 4, 4, 0);
    pub const HEDGED_READS: Feature = Feature::new("HedgedReads", 4, 4, 0);
    pub const HIDDEN_INDEX: Feature = Feature::new("HiddenIndex", 4, 4, 0);
    pub const KILL_CURSORS_COMMAND: Feature = Feature::new("KillCursorsCommand", 3, 2, 0);
    pub const LIST_COLLECTIONS_COMMAND: Feature = Feature::new("ListCollectionsCommand", 3, 0, 0);
    pub const MAX_STALENESS: Feature = Feature::new("MaxStaleness", 3, 4, 0);
    pub const MAX_TIME: Feature = Feature::new("MaxTime", 2, 6, 0);
    pub const PARTIAL_INDEXES: Feature = Feature::new("PartialIndexes", 3, 2, 0);
    pub const READ_CONCERN: Feature = Feature::new("ReadConcern", 3, 2, 0);
    pub const RETRYABLE_READS: Feature = Feature::new("RetryableReads", 3, 6, 0);
    pub const RETRYABLE_WRITES: Feature = Feature::new("RetryableWrites", 3, 6, 0);
    pub const TAILABLE_CURSOR: Feature = Feature::new("TailableCursor", 3, 2, 0);
    pub const TIME_SERIES_COLLECTIONS: Feature = Feature::new("TimeSeriesCollections", 5, 0, 0);
    pub const VIEWS: Feature = Feature::new("Views", 3, 4, 0);
    pub const WILDCARD_INDEXES: Feature = Feature::new("WildcardIndexes", 4, 2, 0);
    pub const WRITE_COMMANDS: Feature = Feature::new("WriteCommands", 2, 6, 0);

    pub const HINT_FOR_DELETE_OPERATIONS: HintFeature =
        HintFeature::new("HintForDeleteOperations", (4, 4, 0), (3, 4, 0));
    pub const HINT_FOR_FIND_AND_MODIFY: HintFeature =
        HintFeature::new("HintForFindAndModify", (4, 4, 0), (4, 2, 0));
    pub const HINT_FOR_UPDATE_AND_REPLACE_OPERATIONS: HintFeature =
        HintFeature::new("HintForUpdateAndReplaceOperations", (4, 2, 0), (3, 4, 0));

    const fn new(name: &'static str, major: u64, minor: u64, patch: u64) -> Self {
        Self {
            name,
            first_supported_version: Version::new(major, minor, patch),
        }
    }

    /// The name of this feature.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The first server version that supports this feature.
    pub fn first_supported_version(&self) -> &Version {
        &self.first_supported_version
    }

    /// Whether a server reporting `server_version` supports this feature.
    pub fn is_supported(&self, server_version: &Version) -> bool {
        // Pre-release builds of the introducing version count as supporting the feature.
        let release = Version::new(
            server_version.major,
            server_version.minor,
            server_version.patch,
        );
        release >= self.first_supported_version
    }

    /// Returns a `NotSupported` error if the server does not support this feature.
    pub fn ensure_supported(&self, server_version: &Version) -> Result<()> {
        if self.is_supported(server_version) {
            Ok(())
        } else {
            Err(self.not_supported_error(server_version))
        }
    }

    pub(crate) fn not_supported_error(&self, server_version: &Version) -> Error {
        Error::not_supported(format!(
            "Server version {} does not support the {} feature.",
            server_version, self.name
        ))
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.first_supported_version)
    }
}

/// A hint feature. Servers below `first_supported_version` reject a hint themselves, but servers
/// below `driver_must_throw_below` silently ignore it, so the client has to reject it instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HintFeature {
    feature: Feature,
    driver_must_throw_below: Version,
}

impl HintFeature {
    const fn new(
        name: &'static str,
        supported: (u64, u64, u64),
        driver_must_throw_below: (u64, u64, u64),
    ) -> Self {
        Self {
            feature: Feature::new(name, supported.0, supported.1, supported.2),
            driver_must_throw_below: Version::new(
                driver_must_throw_below.0,
                driver_must_throw_below.1,
                driver_must_throw_below.2,
            ),
        }
    }

    /// The underlying feature.
    pub fn feature(&self) -> &Feature {
        &self.feature
    }

    /// Whether a server reporting `server_version` accepts the hint.
    pub fn is_supported(&self, server_version: &Version) -> bool {
        self.feature.is_supported(server_version)
    }

    /// Whether the client must reject a hint instead of letting the server answer.
    pub fn driver_must_throw_if_not_supported(&self, server_version: &Version) -> bool {
        let release = Version::new(
            server_version.major,
            server_version.minor,
            server_version.patch,
        );
        release < self.driver_must_throw_below
    }

    /// Validates a hint for a write with the given acknowledgement. Unacknowledged writes can
    /// never report a server-side rejection, so a hint is refused outright for them.
    pub(crate) fn validate(&self, server_version: &Version, acknowledged: bool) -> Result<()> {
        if !acknowledged {
            return Err(Error::not_supported(
                "Hint is not supported for unacknowledged writes.",
            ));
        }
        if self.driver_must_throw_if_not_supported(server_version) {
            return Err(self.feature.not_supported_error(server_version));
        }
        Ok(())
    }
}
