use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use super::{CursorType, Find, FindOptions};
use crate::{
    bson::{doc, Bson},
    cmap::{ConnectionDescription, LegacyReply, QueryFlags},
    collation::Collation,
    error::ErrorKind,
    max_time::MaxTime,
    namespace::Namespace,
    operation::{
        test::{build, handle_response},
        Executable,
        Operation,
        Retryability,
    },
    options::ReadPreference,
    sdam::ServerType,
    session::SessionHandle,
    test::{cursor_reply, version, MockEvent, MockServer},
};

fn ns() -> Namespace {
    Namespace::new("db", "coll")
}

#[test]
fn build_minimal() {
    let mut op = Find::new(ns(), None, None);
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(command.name, "find");
    assert_eq!(command.target_db, "db");
    assert_eq!(command.body, doc! { "find": "coll", "filter": {} });
    assert_eq!(op.retryability(), Retryability::Read);
}

#[test]
fn build_with_options() {
    let options = FindOptions::builder()
        .batch_size(23)
        .comment(Bson::String("tag".into()))
        .limit(50)
        .max(doc! { "x": 10 })
        .min(doc! { "x": 1 })
        .no_cursor_timeout(true)
        .projection(doc! { "_id": 0 })
        .return_key(false)
        .show_record_id(true)
        .skip(5)
        .sort(doc! { "x": -1 })
        .max_time(MaxTime::from_millis(100).unwrap())
        .build();
    let mut op = Find::new(ns(), doc! { "x": { "$gt": 1 } }, options);
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(
        command.body,
        doc! {
            "find": "coll",
            "filter": { "x": { "$gt": 1 } },
            "limit": 50_i64,
            "batchSize": 23,
            "comment": "tag",
            "max": { "x": 10 },
            "maxTimeMS": 100,
            "min": { "x": 1 },
            "noCursorTimeout": true,
            "projection": { "_id": 0 },
            "returnKey": false,
            "showRecordId": true,
            "skip": 5_i64,
            "sort": { "x": -1 },
        }
    );
}

#[test]
fn negative_limit_requests_single_batch() {
    let mut op = Find::new(ns(), None, FindOptions::builder().limit(-3).build());
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(command.body.get_i64("limit").unwrap(), 3);
    assert!(command.body.get_bool("singleBatch").unwrap());

    let spec = handle_response(&op, cursor_reply("db.coll", 0, "firstBatch", [])).unwrap();
    assert_eq!(spec.limit, Some(3));
}

#[test]
fn zero_limit_is_omitted() {
    let mut op = Find::new(ns(), None, FindOptions::builder().limit(0).build());
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert!(!command.body.contains_key("limit"));
    assert!(!command.body.contains_key("singleBatch"));
}

#[test]
fn minimum_limit_is_rejected() {
    let mut op = Find::new(ns(), None, FindOptions::builder().limit(i64::MIN).build());
    let error = build(&mut op, version(7, 0, 0)).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));

    let mut op = Find::new(ns(), None, FindOptions::builder().limit(i64::MIN + 1).build());
    let command = build(&mut op, version(7, 0, 0)).unwrap();
    assert_eq!(command.body.get_i64("limit").unwrap(), i64::MAX);
}

#[test]
fn oversized_batch_size_is_rejected() {
    let options = FindOptions::builder().batch_size(u32::MAX).build();
    let mut op = Find::new(ns(), None, options);
    let error = build(&mut op, version(7, 0, 0)).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
}

#[test]
fn cursor_types() {
    let mut op = Find::new(
        ns(),
        None,
        FindOptions::builder()
            .cursor_type(CursorType::Tailable)
            .build(),
    );
    let body = build(&mut op, version(7, 0, 0)).unwrap().body;
    assert!(body.get_bool("tailable").unwrap());
    assert!(!body.contains_key("awaitData"));

    let mut op = Find::new(
        ns(),
        None,
        FindOptions::builder()
            .cursor_type(CursorType::TailableAwait)
            .max_await_time(MaxTime::from_millis(250).unwrap())
            .build(),
    );
    let body = build(&mut op, version(7, 0, 0)).unwrap().body;
    assert!(body.get_bool("tailable").unwrap());
    assert!(body.get_bool("awaitData").unwrap());
    assert!(!body.contains_key("maxAwaitTimeMS"));

    let spec = handle_response(&op, cursor_reply("db.coll", 9, "firstBatch", [])).unwrap();
    assert_eq!(spec.max_await_time, Some(MaxTime::from_millis(250).unwrap()));
}

#[test]
fn allow_partial_results_only_sent_to_mongos() {
    let options = FindOptions::builder().allow_partial_results(true).build();

    let mut op = Find::new(ns(), None, options.clone());
    let body = build(&mut op, version(7, 0, 0)).unwrap().body;
    assert!(!body.contains_key("allowPartialResults"));

    let description = ConnectionDescription::builder()
        .server_version(version(7, 0, 0))
        .server_type(ServerType::Mongos)
        .build();
    let mut op = Find::new(ns(), None, options);
    let body = op.build(&description).unwrap().body;
    assert!(body.get_bool("allowPartialResults").unwrap());
}

#[test]
fn gated_options() {
    let cases = [
        (
            FindOptions::builder().allow_disk_use(true).build(),
            version(4, 2, 0),
        ),
        (
            FindOptions::builder().let_vars(doc! { "a": 1 }).build(),
            version(4, 4, 0),
        ),
        (
            FindOptions::builder()
                .collation(Collation::new("en"))
                .build(),
            version(3, 2, 0),
        ),
    ];

    for (options, server_version) in cases {
        let mut op = Find::new(ns(), None, options);
        let error = build(&mut op, server_version).unwrap_err();
        assert!(error.is_not_supported(), "{error}");
    }
}

#[test]
fn find_command_requires_3_2() {
    let mut op = Find::new(ns(), None, None);
    let error = build(&mut op, version(3, 0, 0)).unwrap_err();
    assert!(error
        .to_string()
        .contains("does not support the FindCommand feature"));
}

#[tokio::test]
async fn execute_iterates_with_limit() {
    let server = MockServer::with_version(version(7, 0, 0));
    server
        .reply(cursor_reply(
            "db.coll",
            12,
            "firstBatch",
            [doc! { "_id": 1 }, doc! { "_id": 2 }],
        ))
        .reply(cursor_reply(
            "db.coll",
            12,
            "nextBatch",
            [doc! { "_id": 3 }],
        ))
        .reply(doc! { "cursorsKilled": [12_i64], "cursorsNotFound": [], "ok": 1 });
    let session = SessionHandle::implicit();
    let binding = server.binding(&session);
    let cancel = CancellationToken::new();

    let options = FindOptions::builder().batch_size(2).limit(3).build();
    let mut op = Find::new(ns(), None, options);
    let mut cursor = op.execute(&binding, &cancel).await.unwrap();
    let docs = cursor.collect(&cancel).await.unwrap();
    assert_eq!(docs.len(), 3);

    let commands = server.commands();
    assert_eq!(commands[1].name, "getMore");
    assert_eq!(commands[1].body.get_i32("batchSize").unwrap(), 1);

    cursor.close(&cancel).await.unwrap();
    assert_eq!(server.command_names(), vec!["find", "getMore", "killCursors"]);
}

fn legacy_options() -> FindOptions {
    FindOptions::builder()
        .comment(Bson::String("funny".into()))
        .max_time(MaxTime::from_millis(20_000).unwrap())
        .projection(doc! { "y": 1 })
        .sort(doc! { "a": 1 })
        .build()
}

#[test]
fn legacy_query_wraps_modifiers() {
    let description = ConnectionDescription::builder()
        .server_version(version(3, 0, 0))
        .server_type(ServerType::RsArbiter)
        .build();
    let op = Find::new(ns(), doc! { "x": 1 }, legacy_options());
    let query = op
        .build_query(&description, &ReadPreference::Secondary { options: None })
        .unwrap();

    assert_eq!(
        query.query,
        doc! {
            "$query": { "x": 1 },
            "$orderby": { "a": 1 },
            "$comment": "funny",
            "$maxTimeMS": 20000,
        }
    );
    assert_eq!(query.fields, Some(doc! { "y": 1 }));
    assert_eq!(query.ns, ns());
    assert_eq!(query.flags, QueryFlags::SECONDARY_OK);
}

#[test]
fn legacy_query_sends_read_preference_to_mongos() {
    let description = ConnectionDescription::builder()
        .server_version(version(3, 0, 0))
        .server_type(ServerType::Mongos)
        .build();
    let op = Find::new(ns(), doc! { "x": 1 }, legacy_options());
    let query = op
        .build_query(&description, &ReadPreference::Secondary { options: None })
        .unwrap();

    assert_eq!(
        query.query,
        doc! {
            "$query": { "x": 1 },
            "$readPreference": { "mode": "secondary" },
            "$orderby": { "a": 1 },
            "$comment": "funny",
            "$maxTimeMS": 20000,
        }
    );
}

#[test]
fn legacy_query_without_modifiers_sends_the_filter() {
    let description = ConnectionDescription::with_version(version(3, 0, 0));
    let options = FindOptions::builder()
        .skip(3)
        .no_cursor_timeout(true)
        .cursor_type(CursorType::TailableAwait)
        .build();
    let op = Find::new(ns(), doc! { "x": 1 }, options);
    let query = op
        .build_query(&description, &ReadPreference::Primary)
        .unwrap();

    assert_eq!(query.query, doc! { "x": 1 });
    assert_eq!(query.skip, 3);
    assert_eq!(query.number_to_return, 0);
    assert_eq!(
        query.flags,
        QueryFlags::TAILABLE_CURSOR | QueryFlags::AWAIT_DATA | QueryFlags::NO_CURSOR_TIMEOUT
    );
}

#[test]
fn legacy_number_to_return() {
    let description = ConnectionDescription::with_version(version(3, 0, 0));
    let cases = [
        (None, None, None, 0),
        (Some(5), None, None, 5),
        (None, Some(4), None, 4),
        (Some(5), Some(2), None, 2),
        (Some(2), Some(5), None, 2),
        (Some(-3), Some(10), None, -3),
        (Some(5), None, Some(true), -5),
    ];

    for (limit, batch_size, single_batch, expected) in cases {
        let options = FindOptions {
            limit,
            batch_size,
            single_batch,
            ..Default::default()
        };
        let op = Find::new(ns(), None, options);
        let query = op
            .build_query(&description, &ReadPreference::Primary)
            .unwrap();
        assert_eq!(query.number_to_return, expected, "limit {:?}", limit);
    }

    let op = Find::new(ns(), None, FindOptions::builder().limit(i64::MIN).build());
    let error = op
        .build_query(&description, &ReadPreference::Primary)
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
}

#[tokio::test]
async fn execute_falls_back_to_legacy_query_below_3_2() {
    let server = MockServer::with_version(version(3, 0, 0));
    server
        .reply_legacy(Ok(LegacyReply {
            cursor_id: 7,
            documents: vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
            ..Default::default()
        }))
        .reply_legacy(Ok(LegacyReply {
            cursor_id: 0,
            documents: vec![doc! { "_id": 3 }],
            ..Default::default()
        }));
    let session = SessionHandle::implicit();
    let binding = server.binding(&session);
    let cancel = CancellationToken::new();

    let options = FindOptions::builder().batch_size(2).build();
    let mut cursor = Find::new(ns(), doc! { "x": 1 }, options)
        .execute(&binding, &cancel)
        .await
        .unwrap();
    assert_eq!(cursor.collect(&cancel).await.unwrap().len(), 3);

    assert!(server.commands().is_empty());
    let messages = server.legacy_messages();
    assert_eq!(messages.len(), 2);
    match messages[0] {
        MockEvent::LegacyQuery(ref query) => {
            assert_eq!(query.query, doc! { "x": 1 });
            assert_eq!(query.number_to_return, 2);
        }
        ref other => panic!("expected a legacy query, got {:?}", other),
    }
    assert!(matches!(messages[1], MockEvent::LegacyGetMore(ref m) if m.cursor_id == 7));
    assert_eq!(server.channels_acquired(), 2);
}

#[tokio::test]
async fn legacy_query_failure_is_a_command_error() {
    use crate::cmap::ResponseFlags;

    let server = MockServer::with_version(version(3, 0, 0));
    server.reply_legacy(Ok(LegacyReply {
        flags: ResponseFlags::QUERY_FAILURE,
        cursor_id: 0,
        documents: vec![doc! { "$err": "bad query", "code": 2 }],
    }));
    let session = SessionHandle::implicit();
    let binding = server.binding(&session);
    let cancel = CancellationToken::new();

    let error = Find::new(ns(), None, None)
        .execute(&binding, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::Command(ref e) if e.code == 2));
}

#[tokio::test]
async fn legacy_query_rejects_unsupported_options_before_sending() {
    let server = MockServer::with_version(version(3, 0, 0));
    let session = SessionHandle::implicit();
    let binding = server.binding(&session);
    let cancel = CancellationToken::new();

    let options = FindOptions::builder()
        .collation(Collation::new("en"))
        .build();
    let error = Find::new(ns(), None, options)
        .execute(&binding, &cancel)
        .await
        .unwrap_err();
    assert!(error.is_not_supported());
    assert!(server.legacy_messages().is_empty());
}
