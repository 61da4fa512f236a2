
use std::time::Duration;

use serde::{Serialize, Serializer};
use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, CommandResponse, ConnectionDescription},
    collation::Collation,
    concern::WriteConcern,
    error::Result,
    feature::Feature,
    max_time::MaxTime,
    namespace::Namespace,
    operation::{
        append_options,
        append_write_concern,
        ensure_option_supported,
        executable,
        ExecutionContext,
        OperationWithDefaults,
        WriteConcernOnlyBody,
    },
    results::CreateIndexesResult,
    serde_util,
};

/// Specifies the fields and options for an index.
#[derive(Clone, Debug, Default, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct IndexModel {
    /// Specifies the index's fields. For each field, specify a key-value pair in which the key is
    /// the name of the field to index and the value is the index type.
    #[serde(rename = "key")]
    #[builder(!default)]
    pub keys: Document,

    /// The options for the index.
    #[serde(flatten)]
    pub options: Option<IndexOptions>,
}

impl IndexModel {
    /// If the client did not specify a name, generate and set it. Otherwise, do nothing.
    pub(crate) fn update_name(&mut self) {
        if self.name().is_none() {
            let key_names: Vec<String> = self
                .keys
                .iter()
                .map(|(k, v)| format!("{}_{}", k, key_value_name(v)))
                .collect();
            self.options.get_or_insert_with(IndexOptions::default).name = Some(key_names.join("_"));
        }
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.options.as_ref().and_then(|o| o.name.as_deref())
    }

    fn is_wildcard(&self) -> bool {
        self.keys
            .keys()
            .any(|k| k == "$**" || k.ends_with(".$**"))
            || self
                .options
                .as_ref()
                .is_some_and(|o| o.wildcard_projection.is_some())
    }

    fn check_features(&self, description: &ConnectionDescription) -> Result<()> {
        if self.is_wildcard() {
            Feature::WILDCARD_INDEXES.ensure_supported(&description.server_version)?;
        }
        let Some(ref options) = self.options else {
            return Ok(());
        };
        ensure_option_supported(
            options.partial_filter_expression.as_ref(),
            &Feature::PARTIAL_INDEXES,
            description,
        )?;
        ensure_option_supported(options.collation.as_ref(), &Feature::COLLATION, description)?;
        ensure_option_supported(options.hidden.as_ref(), &Feature::HIDDEN_INDEX, description)?;
        Ok(())
    }
}

/// Numeric key values name the index with their integer value (`x_1`, `y_-1`), string values
/// with the string itself (`loc_2dsphere`).
fn key_value_name(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        other => match bson_util::get_int(other) {
            Some(i) => i.to_string(),
            None => other.to_string(),
        },
    }
}

/// The options for a single index in a [`CreateIndexes`] operation. See the
/// [documentation](https://www.mongodb.com/docs/manual/reference/method/db.collection.createIndex/#options-for-all-index-types)
/// for the meaning of each one.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct IndexOptions {
    /// Tells the server to build the index in the background. Ignored by servers 4.2 and up.
    pub background: Option<bool>,

    /// How long documents in the collection are retained. Applies only to TTL indexes.
    #[serde(
        rename = "expireAfterSeconds",
        serialize_with = "serde_util::serialize_duration_option_as_int_seconds"
    )]
    pub expire_after: Option<Duration>,

    /// The name of the index. If none is provided, one is generated from the keys in the form
    /// `field_direction`.
    pub name: Option<String>,

    /// If true, the index only references documents with the specified field.
    pub sparse: Option<bool>,

    /// Per-index storage engine configuration, in the form
    /// `{ <storage-engine-name>: <options> }`.
    pub storage_engine: Option<Document>,

    /// Creates a unique index.
    pub unique: Option<bool>,

    /// The index version number.
    #[serde(rename = "v", serialize_with = "serde_util::serialize_u32_option_as_i32")]
    pub version: Option<u32>,

    /// For text indexes, the language that determines the list of stop words.
    pub default_language: Option<String>,

    /// For text indexes, the field that contains the override language for the document.
    pub language_override: Option<String>,

    /// The text index version number.
    #[serde(serialize_with = "serde_util::serialize_u32_option_as_i32")]
    pub text_index_version: Option<u32>,

    /// For text indexes, a document that contains field and weight pairs.
    pub weights: Option<Document>,

    /// The 2dsphere index version number.
    #[serde(
        rename = "2dsphereIndexVersion",
        serialize_with = "serde_util::serialize_u32_option_as_i32"
    )]
    pub sphere_2d_index_version: Option<u32>,

    /// For 2d indexes, the precision of the stored geohash value.
    #[serde(serialize_with = "serde_util::serialize_u32_option_as_i32")]
    pub bits: Option<u32>,

    /// For 2d indexes, the upper inclusive boundary for longitude and latitude values.
    pub max: Option<f64>,

    /// For 2d indexes, the lower inclusive boundary for longitude and latitude values.
    pub min: Option<f64>,

    /// If specified, the index only references documents that match the filter expression.
    pub partial_filter_expression: Option<Document>,

    /// The collation for the index.
    pub collation: Option<Collation>,

    /// Field paths to include in or exclude from a wildcard index.
    pub wildcard_projection: Option<Document>,

    /// Whether the index is hidden from the query planner.
    pub hidden: Option<bool>,
}

/// The minimum number of data-bearing voting replica set members (i.e. commit quorum), including
/// the primary, that must report a successful index build before the primary marks the indexes
/// as ready.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum CommitQuorum {
    /// A specific number of voting replica set members. When set to 0, disables quorum voting.
    Nodes(u32),

    /// All data-bearing voting replica set members (default).
    VotingMembers,

    /// A simple majority of voting members.
    Majority,

    /// A replica set tag name.
    Custom(String),
}

impl Serialize for CommitQuorum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CommitQuorum::Nodes(n) => bson::serde_helpers::serialize_u32_as_i32(n, serializer),
            CommitQuorum::VotingMembers => serializer.serialize_str("votingMembers"),
            CommitQuorum::Majority => serializer.serialize_str("majority"),
            CommitQuorum::Custom(s) => serializer.serialize_str(s),
        }
    }
}

/// Specifies the options to a [`CreateIndexes`] operation.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CreateIndexesOptions {
    /// Specify the commit quorum needed to mark an `index` as ready. Servers before 4.4 do not
    /// accept it.
    pub commit_quorum: Option<CommitQuorum>,

    /// The maximum amount of time to allow the index to build.
    #[serde(rename = "maxTimeMS")]
    pub max_time: Option<MaxTime>,

    /// The write concern for the operation. Not sent to servers that predate write concern on
    /// `createIndexes`.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// Creates one or more indexes on a collection.
#[derive(Debug)]
pub struct CreateIndexes {
    ns: Namespace,
    indexes: Vec<IndexModel>,
    options: Option<CreateIndexesOptions>,
}

impl CreateIndexes {
    pub fn new(
        ns: Namespace,
        indexes: impl IntoIterator<Item = IndexModel>,
        options: impl Into<Option<CreateIndexesOptions>>,
    ) -> Self {
        Self {
            ns,
            indexes: indexes.into_iter().collect(),
            options: options.into(),
        }
    }

    fn check_features(&self, description: &ConnectionDescription) -> Result<()> {
        Feature::CREATE_INDEXES_COMMAND.ensure_supported(&description.server_version)?;
        for index in &self.indexes {
            index.check_features(description)?;
        }
        if let Some(ref options) = self.options {
            ensure_option_supported(
                options.commit_quorum.as_ref(),
                &Feature::CREATE_INDEX_COMMIT_QUORUM,
                description,
            )?;
            ensure_option_supported(options.max_time.as_ref(), &Feature::MAX_TIME, description)?;
        }
        Ok(())
    }
}

impl OperationWithDefaults for CreateIndexes {
    type O = CreateIndexesResult;

    const NAME: &'static str = "createIndexes";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        self.check_features(description)?;

        // Generate names for unnamed indexes.
        self.indexes.iter_mut().for_each(IndexModel::update_name);
        let indexes = bson::to_bson(&self.indexes)?;
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "indexes": indexes,
        };

        append_options(&mut body, self.options.as_ref())?;
        if Feature::COMMANDS_THAT_WRITE_ACCEPT_WRITE_CONCERN.is_supported(&description.server_version)
        {
            append_write_concern(&mut body, self.write_concern())?;
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let response: WriteConcernOnlyBody = response.body()?;
        response.validate()?;
        let index_names = self
            .indexes
            .iter()
            .filter_map(|i| i.name().map(str::to_string))
            .collect();
        Ok(CreateIndexesResult { index_names })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }
}

executable!(CreateIndexes, command => CreateIndexesResult);
