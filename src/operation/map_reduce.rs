use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, CommandResponse, ConnectionDescription},
    collation::Collation,
    concern::{ReadConcern, WriteConcern},
    cursor::CursorSpecification,
    error::{Error, Result},
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
};

/// Specifies the options to a [`MapReduce`] or [`MapReduceToCollection`] operation.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct MapReduceOptions {
    /// Only documents matching this filter are passed to the map function.
    #[serde(rename = "query")]
    pub filter: Option<Document>,

    /// The order in which input documents are passed to the map function.
    pub sort: Option<Document>,

    /// The maximum number of input documents.
    pub limit: Option<i64>,

    /// A JavaScript function applied to every reduced value.
    #[serde(skip)]
    pub finalize: Option<String>,

    /// Global variables visible to the map, reduce and finalize functions.
    pub scope: Option<Document>,

    /// Whether the intermediate data is kept in JavaScript objects instead of BSON.
    #[serde(rename = "jsMode")]
    pub javascript_mode: Option<bool>,

    /// Whether the reply includes timing information.
    pub verbose: Option<bool>,

    /// The maximum amount of time to allow the command to run.
    #[serde(rename = "maxTimeMS")]
    pub max_time: Option<MaxTime>,

    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// The read concern to use. Only sent for inline results.
    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    /// Opt out of document-level validation of the output collection. Only sent when writing to
    /// a collection.
    #[serde(skip)]
    pub bypass_document_validation: Option<bool>,

    /// The write concern for the output collection. Only sent when writing to a collection.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// How the results of a [`MapReduceToCollection`] are combined with the output collection's
/// existing contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum MapReduceOutputMode {
    /// Replace the contents of the collection.
    #[default]
    Replace,

    /// Overwrite existing documents with results of the same key.
    Merge,

    /// Run the reduce function over existing documents and results of the same key.
    Reduce,
}

impl MapReduceOutputMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Merge => "merge",
            Self::Reduce => "reduce",
        }
    }
}

/// Where a [`MapReduceToCollection`] writes its results.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct MapReduceOutput {
    /// The output collection.
    #[builder(!default, setter(!strip_option))]
    pub ns: Namespace,

    /// How results are combined with existing documents.
    #[builder(setter(!strip_option))]
    pub mode: MapReduceOutputMode,

    /// Whether the output collection is sharded.
    pub sharded: Option<bool>,

    /// Whether the output is written without locking the database.
    pub non_atomic: Option<bool>,
}

impl MapReduceOutput {
    fn to_document(&self) -> Document {
        let mut out = doc! {
            self.mode.as_str(): self.ns.coll.clone(),
            "db": self.ns.db.clone(),
        };
        if let Some(sharded) = self.sharded {
            out.insert("sharded", sharded);
        }
        if let Some(non_atomic) = self.non_atomic {
            out.insert("nonAtomic", non_atomic);
        }
        out
    }
}

/// The parts shared by both map-reduce operations.
#[derive(Debug)]
struct MapReduceCommand {
    ns: Namespace,
    map: String,
    reduce: String,
    options: Option<MapReduceOptions>,
}

impl MapReduceCommand {
    const NAME: &'static str = "mapreduce";

    fn build(&self, out: Document, description: &ConnectionDescription) -> Result<Document> {
        if let Some(ref options) = self.options {
            ensure_option_supported(options.collation.as_ref(), &Feature::COLLATION, description)?;
            ensure_option_supported(options.max_time.as_ref(), &Feature::MAX_TIME, description)?;
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "map": Bson::JavaScriptCode(self.map.clone()),
            "reduce": Bson::JavaScriptCode(self.reduce.clone()),
            "out": out,
        };
        if let Some(finalize) = self.options.as_ref().and_then(|opts| opts.finalize.as_ref()) {
            body.insert("finalize", Bson::JavaScriptCode(finalize.clone()));
        }
        append_options(&mut body, self.options.as_ref())?;
        Ok(body)
    }
}

/// Runs a map-reduce whose results are returned inline, as a cursor over the result documents.
#[derive(Debug)]
pub struct MapReduce {
    command: MapReduceCommand,
}

impl MapReduce {
    pub fn new(
        ns: Namespace,
        map: impl Into<String>,
        reduce: impl Into<String>,
        options: impl Into<Option<MapReduceOptions>>,
    ) -> Self {
        Self {
            command: MapReduceCommand {
                ns,
                map: map.into(),
                reduce: reduce.into(),
                options: options.into(),
            },
        }
    }
}

impl OperationWithDefaults for MapReduce {
    type O = CursorSpecification;

    const NAME: &'static str = MapReduceCommand::NAME;

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        let body = self.command.build(doc! { "inline": 1 }, description)?;
        Ok(Command::new(Self::NAME, self.command.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let results = match response.raw_response.get("results") {
            Some(Bson::Array(results)) => results
                .iter()
                .map(|result| match result {
                    Bson::Document(doc) => Ok(doc.clone()),
                    _ => Err(Error::invalid_response(
                        "mapReduce results must be documents",
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(Error::invalid_response(
                    "mapReduce reply is missing its \"results\" array",
                ))
            }
        };
        Ok(CursorSpecification::exhausted(
            self.command.ns.clone(),
            results,
        ))
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.command
            .options
            .as_ref()
            .and_then(|opts| opts.read_concern.as_ref())
    }

    fn supports_read_concern(&self, _description: &ConnectionDescription) -> bool {
        true
    }
}

executable!(MapReduce, cursor);

/// Runs a map-reduce that writes its results to a collection. Returns the server's reply, which
/// describes the output and carries the counts of the run.
#[derive(Debug)]
pub struct MapReduceToCollection {
    command: MapReduceCommand,
    output: MapReduceOutput,
}

impl MapReduceToCollection {
    pub fn new(
        ns: Namespace,
        map: impl Into<String>,
        reduce: impl Into<String>,
        output: MapReduceOutput,
        options: impl Into<Option<MapReduceOptions>>,
    ) -> Self {
        Self {
            command: MapReduceCommand {
                ns,
                map: map.into(),
                reduce: reduce.into(),
                options: options.into(),
            },
            output,
        }
    }
}

impl OperationWithDefaults for MapReduceToCollection {
    type O = Document;

    const NAME: &'static str = MapReduceCommand::NAME;

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        let mut body = self.command.build(self.output.to_document(), description)?;

        if let Some(bypass) = self
            .command
            .options
            .as_ref()
            .and_then(|opts| opts.bypass_document_validation)
        {
            Feature::BYPASS_DOCUMENT_VALIDATION.ensure_supported(&description.server_version)?;
            body.insert("bypassDocumentValidation", bypass);
        }
        if Feature::COMMANDS_THAT_WRITE_ACCEPT_WRITE_CONCERN
            .is_supported(&description.server_version)
        {
            append_write_concern(&mut body, self.write_concern())?;
        }

        Ok(Command::new(Self::NAME, self.command.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        response.body::<WriteConcernOnlyBody>()?.validate()?;
        Ok(response.raw_response)
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.command
            .options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }
}

executable!(MapReduceToCollection, command => Document);

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::{
        MapReduce,
        MapReduceOptions,
        MapReduceOutput,
        MapReduceOutputMode,
        MapReduceToCollection,
    };
    use crate::{
        bson::{doc, Bson},
        collation::Collation,
        concern::{ReadConcern, WriteConcern},
        error::{ErrorKind, WriteFailure},
        max_time::MaxTime,
        namespace::Namespace,
        operation::{
            test::{build, handle_response},
            Executable,
            Operation,
            Retryability,
        },
        session::SessionHandle,
        test::{version, MockServer},
    };

    const MAP: &str = "function() { emit(this.x, 1); }";
    const REDUCE: &str = "function(key, values) { return Array.sum(values); }";

    fn ns() -> Namespace {
        Namespace::new("db", "coll")
    }

    fn output(mode: MapReduceOutputMode) -> MapReduceOutput {
        MapReduceOutput::builder()
            .ns(Namespace::new("out_db", "out_coll"))
            .mode(mode)
            .build()
    }

    #[test]
    fn build_inline() {
        let options = MapReduceOptions::builder()
            .filter(doc! { "x": { "$gt": 0 } })
            .sort(doc! { "x": 1 })
            .limit(10)
            .finalize("function(key, value) { return value; }".to_string())
            .scope(doc! { "y": 2 })
            .javascript_mode(true)
            .verbose(false)
            .max_time(MaxTime::from_millis(30).unwrap())
            .collation(Collation::new("fr"))
            .build();
        let mut op = MapReduce::new(ns(), MAP, REDUCE, options);
        let command = build(&mut op, version(4, 0, 0)).unwrap();

        assert_eq!(command.name, "mapreduce");
        assert_eq!(command.target_db, "db");
        assert_eq!(
            command.body,
            doc! {
                "mapreduce": "coll",
                "map": Bson::JavaScriptCode(MAP.to_string()),
                "reduce": Bson::JavaScriptCode(REDUCE.to_string()),
                "out": { "inline": 1 },
                "finalize": Bson::JavaScriptCode("function(key, value) { return value; }".to_string()),
                "query": { "x": { "$gt": 0 } },
                "sort": { "x": 1 },
                "limit": 10_i64,
                "scope": { "y": 2 },
                "jsMode": true,
                "verbose": false,
                "maxTimeMS": 30,
                "collation": { "locale": "fr" },
            }
        );
        assert_eq!(op.retryability(), Retryability::None);
    }

    #[test]
    fn inline_ignores_write_options() {
        let options = MapReduceOptions::builder()
            .write_concern(WriteConcern::majority())
            .bypass_document_validation(true)
            .build();
        let mut op = MapReduce::new(ns(), MAP, REDUCE, options);
        let command = build(&mut op, version(7, 0, 0)).unwrap();

        assert!(!command.body.contains_key("writeConcern"));
        assert!(!command.body.contains_key("bypassDocumentValidation"));
    }

    #[test]
    fn inline_results_become_an_exhausted_cursor() {
        let op = MapReduce::new(ns(), MAP, REDUCE, None);
        let spec = handle_response(
            &op,
            doc! {
                "results": [{ "_id": 1, "value": 3.0 }, { "_id": 2, "value": 1.0 }],
                "timeMillis": 4,
                "ok": 1,
            },
        )
        .unwrap();

        assert_eq!(spec.id, 0);
        assert_eq!(spec.ns, ns());
        assert_eq!(
            spec.first_batch,
            vec![
                doc! { "_id": 1, "value": 3.0 },
                doc! { "_id": 2, "value": 1.0 },
            ]
        );

        assert!(handle_response(&op, doc! { "ok": 1 }).is_err());
        assert!(handle_response(&op, doc! { "results": [1], "ok": 1 }).is_err());
    }

    #[test]
    fn build_to_collection() {
        let options = MapReduceOptions::builder()
            .bypass_document_validation(true)
            .write_concern(WriteConcern::majority())
            .build();
        let output = MapReduceOutput::builder()
            .ns(Namespace::new("out_db", "out_coll"))
            .mode(MapReduceOutputMode::Merge)
            .sharded(true)
            .non_atomic(true)
            .build();
        let mut op = MapReduceToCollection::new(ns(), MAP, REDUCE, output, options);
        let command = build(&mut op, version(4, 0, 0)).unwrap();

        assert_eq!(
            command.body,
            doc! {
                "mapreduce": "coll",
                "map": Bson::JavaScriptCode(MAP.to_string()),
                "reduce": Bson::JavaScriptCode(REDUCE.to_string()),
                "out": { "merge": "out_coll", "db": "out_db", "sharded": true, "nonAtomic": true },
                "bypassDocumentValidation": true,
                "writeConcern": { "w": "majority" },
            }
        );
        assert_eq!(op.retryability(), Retryability::None);
    }

    #[test]
    fn output_modes() {
        for (mode, key) in [
            (MapReduceOutputMode::Replace, "replace"),
            (MapReduceOutputMode::Merge, "merge"),
            (MapReduceOutputMode::Reduce, "reduce"),
        ] {
            let mut op = MapReduceToCollection::new(ns(), MAP, REDUCE, output(mode), None);
            let command = build(&mut op, version(7, 0, 0)).unwrap();
            assert_eq!(
                command.body.get_document("out").unwrap(),
                &doc! { key: "out_coll", "db": "out_db" }
            );
        }
    }

    #[test]
    fn collation_requires_3_4() {
        let options = MapReduceOptions::builder()
            .collation(Collation::new("fr"))
            .build();

        let mut op = MapReduce::new(ns(), MAP, REDUCE, options.clone());
        assert!(build(&mut op, version(3, 2, 0)).unwrap_err().is_not_supported());

        let mut op = MapReduceToCollection::new(
            ns(),
            MAP,
            REDUCE,
            output(MapReduceOutputMode::Replace),
            options,
        );
        assert!(build(&mut op, version(3, 2, 0)).unwrap_err().is_not_supported());
    }

    #[test]
    fn bypass_document_validation_requires_3_2() {
        let options = MapReduceOptions::builder()
            .bypass_document_validation(true)
            .build();
        let mut op = MapReduceToCollection::new(
            ns(),
            MAP,
            REDUCE,
            output(MapReduceOutputMode::Replace),
            options,
        );
        assert!(build(&mut op, version(3, 0, 0)).unwrap_err().is_not_supported());
    }

    #[test]
    fn write_concern_is_omitted_below_3_4() {
        let options = MapReduceOptions::builder()
            .write_concern(WriteConcern::majority())
            .build();
        let mut op = MapReduceToCollection::new(
            ns(),
            MAP,
            REDUCE,
            output(MapReduceOutputMode::Replace),
            options,
        );
        let command = build(&mut op, version(3, 2, 0)).unwrap();
        assert!(!command.body.contains_key("writeConcern"));
    }

    #[test]
    fn to_collection_reports_write_concern_errors() {
        let op = MapReduceToCollection::new(
            ns(),
            MAP,
            REDUCE,
            output(MapReduceOutputMode::Replace),
            None,
        );
        let reply = doc! { "result": { "db": "out_db", "collection": "out_coll" }, "ok": 1 };
        assert_eq!(handle_response(&op, reply.clone()).unwrap(), reply);

        let error = handle_response(
            &op,
            doc! {
                "ok": 1,
                "writeConcernError": { "code": 64, "codeName": "WriteConcernFailed", "errmsg": "timed out" },
            },
        )
        .unwrap_err();
        assert!(matches!(
            *error.kind,
            ErrorKind::Write(WriteFailure::WriteConcernError(_))
        ));
    }

    #[tokio::test]
    async fn execute_inline_sends_read_concern() {
        let server = MockServer::with_version(version(4, 0, 0));
        server.reply(doc! { "results": [{ "_id": 1, "value": 2.0 }], "ok": 1 });
        let session = SessionHandle::none();
        let binding = server.binding(&session);
        let cancel = CancellationToken::new();

        let options = MapReduceOptions::builder()
            .read_concern(ReadConcern::majority())
            .build();
        let mut cursor = MapReduce::new(ns(), MAP, REDUCE, options)
            .execute(&binding, &cancel)
            .await
            .unwrap();
        let docs = cursor.collect(&cancel).await.unwrap();

        assert_eq!(docs, vec![doc! { "_id": 1, "value": 2.0 }]);
        assert_eq!(server.command_names(), vec!["mapreduce"]);
        assert_eq!(
            server.only_command().body.get_document("readConcern").unwrap(),
            &doc! { "level": "majority" }
        );
    }

    #[tokio::test]
    async fn execute_to_collection_does_not_send_read_concern() {
        let server = MockServer::with_version(version(4, 0, 0));
        server.reply(doc! { "result": "out_coll", "ok": 1 });
        let session = SessionHandle::none();
        let binding = server.binding(&session);
        let cancel = CancellationToken::new();

        let options = MapReduceOptions::builder()
            .read_concern(ReadConcern::majority())
            .build();
        let reply = MapReduceToCollection::new(
            ns(),
            MAP,
            REDUCE,
            output(MapReduceOutputMode::Reduce),
            options,
        )
        .execute(&binding, &cancel)
        .await
        .unwrap();

        assert_eq!(reply.get_str("result").unwrap(), "out_coll");
        assert!(!server.only_command().body.contains_key("readConcern"));
    }
}
