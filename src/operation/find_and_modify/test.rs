use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use super::{
    FindAndModify,
    FindOneAndDeleteOptions,
    FindOneAndReplaceOptions,
    FindOneAndUpdateOptions,
    ReturnDocument,
};
use crate::{
    bson::{doc, Bson},
    collation::Collation,
    concern::WriteConcern,
    error::{ErrorKind, WriteFailure},
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
    test::{version, MockServer},
};

fn ns() -> Namespace {
    Namespace::new("db", "coll")
}

#[test]
fn delete_command() {
    let options = FindOneAndDeleteOptions::builder()
        .projection(doc! { "x": 1 })
        .sort(doc! { "y": -1 })
        .max_time(MaxTime::from_millis(20).unwrap())
        .write_concern(WriteConcern::majority())
        .build();
    let mut op = FindAndModify::delete(ns(), doc! { "x": 1 }, options);
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(command.name, "findAndModify");
    assert_eq!(
        command.body,
        doc! {
            "findAndModify": "coll",
            "query": { "x": 1 },
            "remove": true,
            "sort": { "y": -1 },
            "maxTimeMS": 20,
            "fields": { "x": 1 },
            "writeConcern": { "w": "majority" },
        }
    );
    assert_eq!(op.retryability(), Retryability::Write);
}

#[test]
fn update_command() {
    let options = FindOneAndUpdateOptions::builder()
        .array_filters(vec![doc! { "e.x": 1 }])
        .bypass_document_validation(true)
        .return_document(ReturnDocument::After)
        .upsert(true)
        .let_vars(doc! { "v": 2 })
        .comment(Bson::String("c".into()))
        .build();
    let mut op = FindAndModify::update(
        ns(),
        doc! { "_id": 1 },
        doc! { "$set": { "a": "$$v" } },
        options,
    )
    .unwrap();
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(
        command.body,
        doc! {
            "findAndModify": "coll",
            "query": { "_id": 1 },
            "update": { "$set": { "a": "$$v" } },
            "new": true,
            "upsert": true,
            "arrayFilters": [{ "e.x": 1 }],
            "comment": "c",
            "let": { "v": 2 },
            "bypassDocumentValidation": true,
        }
    );
}

#[test]
fn pipeline_update() {
    let mut op = FindAndModify::update(
        ns(),
        doc! {},
        vec![doc! { "$set": { "a": 1 } }],
        None,
    )
    .unwrap();
    let command = build(&mut op, version(4, 2, 0)).unwrap();
    assert_eq!(
        command.body.get_array("update").unwrap(),
        &vec![Bson::Document(doc! { "$set": { "a": 1 } })]
    );
}

#[test]
fn replace_command() {
    let options = FindOneAndReplaceOptions::builder()
        .return_document(ReturnDocument::Before)
        .build();
    let mut op = FindAndModify::replace(ns(), doc! { "_id": 1 }, doc! { "a": 2 }, options).unwrap();
    let command = build(&mut op, version(7, 0, 0)).unwrap();

    assert_eq!(command.body.get_document("update").unwrap(), &doc! { "a": 2 });
    assert!(!command.body.get_bool("new").unwrap());
}

#[test]
fn update_and_replace_documents_are_checked() {
    let error = FindAndModify::update(ns(), doc! {}, doc! { "a": 1 }, None).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));

    let error = FindAndModify::replace(ns(), doc! {}, doc! { "$set": { "a": 1 } }, None)
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
}

#[test]
fn silently_omitted_below_support() {
    let options = FindOneAndReplaceOptions::builder()
        .bypass_document_validation(true)
        .write_concern(WriteConcern::majority())
        .build();
    let mut op = FindAndModify::replace(ns(), doc! {}, doc! { "a": 1 }, options).unwrap();
    let command = build(&mut op, version(3, 0, 0)).unwrap();

    assert!(!command.body.contains_key("bypassDocumentValidation"));
    assert!(!command.body.contains_key("writeConcern"));
}

#[test]
fn gated_options() {
    let options = FindOneAndUpdateOptions::builder()
        .array_filters(vec![])
        .build();
    let mut op = FindAndModify::update(ns(), doc! {}, doc! { "$inc": { "n": 1 } }, options).unwrap();
    assert!(build(&mut op, version(3, 4, 0)).unwrap_err().is_not_supported());

    let options = FindOneAndDeleteOptions::builder()
        .collation(Collation::new("en"))
        .build();
    let mut op = FindAndModify::delete(ns(), doc! {}, options);
    assert!(build(&mut op, version(3, 2, 0)).unwrap_err().is_not_supported());
}

#[test]
fn hint_validation() {
    let hinted = || {
        FindOneAndDeleteOptions::builder()
            .hint(Hint::Name("x_1".into()))
            .build()
    };

    // 4.2 servers reject the hint themselves.
    let mut op = FindAndModify::delete(ns(), doc! {}, hinted());
    let command = build(&mut op, version(4, 2, 0)).unwrap();
    assert_eq!(command.body.get_str("hint").unwrap(), "x_1");

    // older servers would ignore it.
    let mut op = FindAndModify::delete(ns(), doc! {}, hinted());
    assert!(build(&mut op, version(4, 0, 0)).unwrap_err().is_not_supported());

    let options = FindOneAndDeleteOptions::builder()
        .hint(Hint::Name("x_1".into()))
        .write_concern(WriteConcern::unacknowledged())
        .build();
    let mut op = FindAndModify::delete(ns(), doc! {}, options);
    let error = build(&mut op, version(7, 0, 0)).unwrap_err();
    assert!(error.to_string().contains("unacknowledged"));
}

#[test]
fn response_handling() {
    let op = FindAndModify::delete(ns(), doc! {}, None);

    let value = handle_response(&op, doc! { "value": { "_id": 1 }, "ok": 1 }).unwrap();
    assert_eq!(value, Some(doc! { "_id": 1 }));

    let value = handle_response(&op, doc! { "value": Bson::Null, "ok": 1 }).unwrap();
    assert_eq!(value, None);

    let error = handle_response(&op, doc! { "value": 5, "ok": 1 }).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidResponse { .. }));

    let error = handle_response(
        &op,
        doc! {
            "value": { "_id": 1 },
            "writeConcernError": { "code": 100, "codeName": "UnsatisfiableWriteConcern", "errmsg": "no" },
            "ok": 1,
        },
    )
    .unwrap_err();
    assert!(matches!(
        *error.kind,
        ErrorKind::Write(WriteFailure::WriteConcernError(_))
    ));
}

#[tokio::test]
async fn execute_sends_transaction_number() {
    let server = MockServer::with_version(version(7, 0, 0));
    server.reply(doc! { "value": { "_id": 7, "n": 2 }, "ok": 1 });
    let session = SessionHandle::implicit();
    let binding = server.binding(&session);
    let cancel = CancellationToken::new();

    let mut op = FindAndModify::update(
        ns(),
        doc! { "_id": 7 },
        doc! { "$inc": { "n": 1 } },
        FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build(),
    )
    .unwrap();
    let value = op.execute(&binding, &cancel).await.unwrap();

    assert_eq!(value, Some(doc! { "_id": 7, "n": 2 }));
    let command = server.only_command();
    assert!(command.body.contains_key("lsid"));
    assert_eq!(command.body.get_i64("txnNumber").unwrap(), 1);
}
