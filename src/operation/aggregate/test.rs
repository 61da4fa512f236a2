use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use super::{Aggregate, AggregateExplain, AggregateOptions};
use crate::{
    bson::{doc, Bson},
    collation::Collation,
    concern::{ReadConcern, WriteConcern},
    error::ErrorKind,
    max_time::MaxTime,
    namespace::Namespace,
    operation::{
        test::{build, handle_response},
        Executable,
        Operation,
        Retryability,
    },
    options::Hint,
    session::SessionHandle,
    test::{cursor_reply, version, MockServer},
};

fn ns() -> Namespace {
    Namespace::new("db", "coll")
}

#[test]
fn build_minimal() {
    let mut op = Aggregate::new(ns(), [doc! { "$match": { "x": 1 } }], None);
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(command.name, "aggregate");
    assert_eq!(command.target_db, "db");
    assert_eq!(
        command.body,
        doc! {
            "aggregate": "coll",
            "pipeline": [{ "$match": { "x": 1 } }],
            "cursor": {},
        }
    );
}

#[test]
fn build_with_options() {
    let options = AggregateOptions::builder()
        .allow_disk_use(true)
        .batch_size(23)
        .collation(Collation::new("en_US"))
        .comment(Bson::String("tag".into()))
        .hint(Hint::Name("x_1".into()))
        .let_vars(doc! { "y": 2 })
        .max_time(MaxTime::from_ticks(10_001).unwrap())
        .build();
    let mut op = Aggregate::new(ns(), Vec::new(), options);
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(
        command.body,
        doc! {
            "aggregate": "coll",
            "pipeline": [],
            "cursor": { "batchSize": 23 },
            "allowDiskUse": true,
            "collation": { "locale": "en_US" },
            "comment": "tag",
            "hint": "x_1",
            "let": { "y": 2 },
            "maxTimeMS": 2,
        }
    );
}

#[test]
fn database_target() {
    let mut op = Aggregate::new("admin", [doc! { "$currentOp": {} }], None);
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(command.target_db, "admin");
    assert_eq!(command.body.get("aggregate"), Some(&Bson::Int32(1)));
}

#[test]
fn collation_is_gated() {
    let options = AggregateOptions::builder()
        .collation(Collation::new("fr"))
        .build();

    let mut op = Aggregate::new(ns(), Vec::new(), options.clone());
    let error = build(&mut op, version(3, 2, 0)).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::NotSupported { .. }));
    assert!(error
        .to_string()
        .contains("Server version 3.2.0 does not support the Collation feature."));

    let mut op = Aggregate::new(ns(), Vec::new(), options);
    let command = build(&mut op, version(3, 4, 0)).unwrap();
    assert!(command.body.contains_key("collation"));
}

#[test]
fn let_and_hint_are_gated() {
    let mut op = Aggregate::new(
        ns(),
        Vec::new(),
        AggregateOptions::builder().let_vars(doc! {}).build(),
    );
    assert!(build(&mut op, version(4, 4, 0)).unwrap_err().is_not_supported());

    let mut op = Aggregate::new(
        ns(),
        Vec::new(),
        AggregateOptions::builder()
            .hint(Hint::Keys(doc! { "x": 1 }))
            .build(),
    );
    assert!(build(&mut op, version(3, 4, 0)).unwrap_err().is_not_supported());
}

#[test]
fn out_stage_strips_batch_size_and_sends_write_concern() {
    let options = AggregateOptions::builder()
        .batch_size(5)
        .bypass_document_validation(true)
        .write_concern(WriteConcern::majority())
        .build();
    let mut op = Aggregate::new(ns(), [doc! { "$out": "other" }], options);
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(command.body.get_document("cursor").unwrap(), &doc! {});
    assert!(command.body.get_bool("bypassDocumentValidation").unwrap());
    assert_eq!(
        command.body.get_document("writeConcern").unwrap(),
        &doc! { "w": "majority" }
    );
    assert_eq!(op.retryability(), Retryability::None);
}

#[test]
fn merge_stage_requires_4_2() {
    let mut op = Aggregate::new(ns(), [doc! { "$merge": { "into": "other" } }], None);
    assert!(build(&mut op, version(4, 0, 0)).unwrap_err().is_not_supported());
}

#[test]
fn read_pipelines_do_not_send_write_concern() {
    let options = AggregateOptions::builder()
        .write_concern(WriteConcern::majority())
        .build();
    let mut op = Aggregate::new(ns(), Vec::new(), options);
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert!(!command.body.contains_key("writeConcern"));
    assert_eq!(op.retryability(), Retryability::Read);
}

#[test]
fn inline_result_below_2_6() {
    let mut op = Aggregate::new(ns(), Vec::new(), None);
    let command = build(&mut op, version(2, 4, 0)).unwrap();
    assert!(!command.body.contains_key("cursor"));

    let spec = handle_response(&op, doc! { "result": [{ "_id": 1 }], "ok": 1 }).unwrap();
    assert_eq!(spec.id, 0);
    assert_eq!(spec.ns, ns());
    assert_eq!(spec.first_batch, vec![doc! { "_id": 1 }]);
}

#[test]
fn cursor_result_carries_options() {
    let options = AggregateOptions::builder()
        .batch_size(2)
        .max_await_time(MaxTime::from_millis(5).unwrap())
        .comment(Bson::Int32(7))
        .build();
    let mut op = Aggregate::new(ns(), Vec::new(), options);
    build(&mut op, version(7, 0, 0)).unwrap();

    let spec = handle_response(&op, cursor_reply("db.coll", 42, "firstBatch", [doc! { "a": 1 }]))
        .unwrap();
    assert_eq!(spec.id, 42);
    assert_eq!(spec.batch_size, Some(2));
    assert_eq!(spec.max_await_time, Some(MaxTime::from_millis(5).unwrap()));
    assert_eq!(spec.comment, Some(Bson::Int32(7)));
}

#[test]
fn out_read_concern_requires_4_2() {
    let op = Aggregate::new(ns(), [doc! { "$out": "other" }], None);
    let description = crate::cmap::ConnectionDescription::with_version(version(4, 0, 0));
    assert!(!op.supports_read_concern(&description));
    let description = crate::cmap::ConnectionDescription::with_version(version(4, 2, 0));
    assert!(op.supports_read_concern(&description));
}

#[tokio::test]
async fn execute_returns_cursor() {
    let server = MockServer::with_version(version(7, 0, 0));
    server
        .reply(cursor_reply("db.coll", 3, "firstBatch", [doc! { "_id": 1 }]))
        .reply(cursor_reply("db.coll", 0, "nextBatch", [doc! { "_id": 2 }]));
    let session = SessionHandle::implicit();
    let binding = server.binding(&session);
    let cancel = CancellationToken::new();

    let mut op = Aggregate::new(
        ns(),
        Vec::new(),
        AggregateOptions::builder()
            .read_concern(ReadConcern::majority())
            .build(),
    );
    let mut cursor = op.execute(&binding, &cancel).await.unwrap();
    let docs = cursor.collect(&cancel).await.unwrap();

    assert_eq!(docs, vec![doc! { "_id": 1 }, doc! { "_id": 2 }]);
    assert_eq!(server.command_names(), vec!["aggregate", "getMore"]);
    assert_eq!(
        server.commands()[0]
            .body
            .get_document("readConcern")
            .unwrap(),
        &doc! { "level": "majority" }
    );

    drop(cursor);
    drop(binding);
    assert_eq!(session.reference_count(), 1);
}

#[test]
fn explain_replaces_the_cursor() {
    let options = AggregateOptions::builder()
        .allow_disk_use(true)
        .batch_size(5)
        .bypass_document_validation(true)
        .write_concern(WriteConcern::majority())
        .build();
    let mut op = AggregateExplain::new(ns(), [doc! { "$out": "other" }], options);
    let command = build(&mut op, version(4, 0, 0)).unwrap();

    assert_eq!(command.name, "aggregate");
    assert_eq!(
        command.body,
        doc! {
            "aggregate": "coll",
            "pipeline": [{ "$out": "other" }],
            "allowDiskUse": true,
            "explain": true,
        }
    );
    assert_eq!(op.retryability(), Retryability::Read);

    let reply = doc! { "stages": [{ "$cursor": {} }], "ok": 1 };
    assert_eq!(handle_response(&op, reply.clone()).unwrap(), reply);
}

#[test]
fn explain_requires_2_6() {
    let mut op = AggregateExplain::new(ns(), Vec::new(), None);
    assert!(build(&mut op, version(2, 4, 0)).unwrap_err().is_not_supported());

    let command = build(&mut op, version(2, 6, 0)).unwrap();
    assert!(command.body.get_bool("explain").unwrap());
}
