use std::{num::NonZeroU64, time::Duration};

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use super::{
    ChangeStreamPreAndPostImages,
    ClusteredIndex,
    Create,
    CreateCollectionOptions,
    TimeseriesGranularity,
    TimeseriesOptions,
    ValidationAction,
    ValidationLevel,
};
use crate::{
    bson::doc,
    collation::Collation,
    concern::{Acknowledgment, WriteConcern},
    error::{ErrorKind, WriteFailure},
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

fn ns() -> Namespace {
    Namespace::new("test_db", "test_coll")
}

#[test]
fn build_collection() {
    let options = CreateCollectionOptions::builder()
        .capped(true)
        .size(NonZeroU64::new(4096).unwrap())
        .max(NonZeroU64::new(100).unwrap())
        .validator(doc! { "x": { "$type": "int" } })
        .validation_level(ValidationLevel::Moderate)
        .validation_action(ValidationAction::Warn)
        .write_concern(WriteConcern::builder().journal(true).build())
        .build();
    let mut op = Create::new(ns(), options);
    let command = build(&mut op, version(4, 2, 0)).unwrap();

    assert_eq!(command.name, "create");
    assert_eq!(command.target_db, "test_db");
    assert_eq!(command.read_pref, None);
    assert_eq!(
        command.body,
        doc! {
            "create": "test_coll",
            "capped": true,
            "size": 4096_i64,
            "max": 100_i64,
            "validator": { "x": { "$type": "int" } },
            "validationLevel": "moderate",
            "validationAction": "warn",
            "writeConcern": { "j": true },
        }
    );
    assert_eq!(op.retryability(), Retryability::None);
}

#[test]
fn capped_size_is_positive() {
    // A zero cap cannot be expressed; the smallest size is one byte.
    assert!(NonZeroU64::new(0).is_none());

    let options = CreateCollectionOptions::builder()
        .capped(true)
        .size(NonZeroU64::MIN)
        .build();
    let mut op = Create::new(ns(), options);
    let command = build(&mut op, version(4, 2, 0)).unwrap();
    assert_eq!(
        command.body,
        doc! { "create": "test_coll", "capped": true, "size": 1_i64 }
    );
}

#[test]
fn build_view() {
    let options = CreateCollectionOptions::builder()
        .view_on("source".to_string())
        .pipeline(vec![doc! { "$match": { "a": 1 } }])
        .collation(Collation::new("en_US"))
        .build();
    let mut op = Create::new(ns(), options.clone());
    let command = build(&mut op, version(3, 4, 0)).unwrap();

    assert_eq!(
        command.body,
        doc! {
            "create": "test_coll",
            "viewOn": "source",
            "pipeline": [{ "$match": { "a": 1 } }],
            "collation": { "locale": "en_US" },
        }
    );

    let mut op = Create::new(ns(), options);
    let error = build(&mut op, version(3, 2, 0)).unwrap_err();
    assert!(error.is_not_supported());
}

#[test]
fn build_time_series_and_clustered() {
    let options = CreateCollectionOptions::builder()
        .timeseries(
            TimeseriesOptions::builder()
                .time_field("ts")
                .meta_field("sensor".to_string())
                .granularity(TimeseriesGranularity::Minutes)
                .build(),
        )
        .expire_after(Duration::from_secs(3600))
        .build();
    let mut op = Create::new(ns(), options.clone());
    let command = build(&mut op, version(5, 0, 0)).unwrap();
    assert_eq!(
        command.body,
        doc! {
            "create": "test_coll",
            "timeseries": { "timeField": "ts", "metaField": "sensor", "granularity": "minutes" },
            "expireAfterSeconds": 3600,
        }
    );

    let mut op = Create::new(ns(), options);
    assert!(build(&mut op, version(4, 4, 0)).unwrap_err().is_not_supported());

    let options = CreateCollectionOptions::builder()
        .clustered_index(ClusteredIndex::default())
        .build();
    let mut op = Create::new(ns(), options.clone());
    let command = build(&mut op, version(5, 3, 0)).unwrap();
    assert_eq!(
        command.body.get_document("clusteredIndex").unwrap(),
        &doc! { "key": { "_id": 1 }, "unique": true }
    );
    let mut op = Create::new(ns(), options);
    assert!(build(&mut op, version(5, 0, 0)).unwrap_err().is_not_supported());
}

#[test]
fn pre_and_post_images_require_6_0() {
    let options = CreateCollectionOptions::builder()
        .change_stream_pre_and_post_images(ChangeStreamPreAndPostImages { enabled: true })
        .build();
    let mut op = Create::new(ns(), options.clone());
    let command = build(&mut op, version(6, 0, 0)).unwrap();
    assert_eq!(
        command
            .body
            .get_document("changeStreamPreAndPostImages")
            .unwrap(),
        &doc! { "enabled": true }
    );

    let mut op = Create::new(ns(), options);
    assert!(build(&mut op, version(5, 0, 0)).unwrap_err().is_not_supported());
}

#[test]
fn validation_requires_3_2() {
    let options = CreateCollectionOptions::builder()
        .validation_action(ValidationAction::Error)
        .build();
    let mut op = Create::new(ns(), options);
    let error = build(&mut op, version(3, 0, 0)).unwrap_err();
    assert!(error
        .to_string()
        .contains("does not support the DocumentValidation feature"));
}

#[test]
fn write_concern_omitted_on_old_servers() {
    let options = CreateCollectionOptions::builder()
        .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
        .build();
    let mut op = Create::new(ns(), options);
    let command = build(&mut op, version(3, 2, 0)).unwrap();
    assert_eq!(command.body, doc! { "create": "test_coll" });
}

#[test]
fn handle_write_concern_error() {
    let op = Create::new(ns(), None);

    assert!(handle_response(&op, doc! { "ok": 1.0, "hello": "world" }).is_ok());

    let error = handle_response(
        &op,
        doc! {
            "writeConcernError": {
                "code": 100,
                "codeName": "hello world",
                "errmsg": "12345"
            },
            "ok": 1
        },
    )
    .unwrap_err();

    match *error.kind {
        ErrorKind::Write(WriteFailure::WriteConcernError(ref wc_err)) => {
            assert_eq!(wc_err.code, 100);
            assert_eq!(wc_err.code_name, "hello world");
            assert_eq!(wc_err.message, "12345");
        }
        ref e => panic!("expected write concern error, got {:?}", e),
    }
}

#[tokio::test]
async fn execute_reports_command_error() {
    let server = MockServer::with_version(version(7, 0, 0));
    server.reply(doc! {
        "ok": 0,
        "code": 48,
        "codeName": "NamespaceExists",
        "errmsg": "Collection already exists",
    });
    let session = SessionHandle::implicit();
    let binding = server.binding(&session);
    let cancel = CancellationToken::new();

    let error = Create::new(ns(), None)
        .execute(&binding, &cancel)
        .await
        .unwrap_err();
    assert_eq!(error.code(), Some(48));
    assert!(error.server_response().is_some());
}
