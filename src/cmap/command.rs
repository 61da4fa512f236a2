use serde::de::DeserializeOwned;

use crate::{
    bson::{Bson, Document},
    bson_util,
    error::{CommandError, Error, ErrorKind, Result, MAX_TIME_MS_EXPIRED_CODE},
    selection_criteria::ReadPreference,
    session::ClusterTime,
};

/// Whether the sender waits for a reply to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ResponseHandling {
    /// Wait for and return the server's reply.
    #[default]
    Return,

    /// Write the message and return without waiting. Used for unacknowledged writes.
    Ignore,
}

/// A payload of documents sent alongside a command body (an `OP_MSG` kind 1 section) instead of
/// as an array inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSequence {
    pub(crate) identifier: String,
    pub(crate) documents: Vec<Document>,
}

impl DocumentSequence {
    pub(crate) fn new(identifier: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            identifier: identifier.into(),
            documents,
        }
    }

    /// The field name the server reads these documents into, e.g. `documents` for an insert.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The documents in this payload.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }
}

/// `Command` is a driver side abstraction of a server command containing all the information
/// necessary to serialize it to a wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub(crate) name: String,
    pub(crate) target_db: String,
    pub(crate) body: Document,
    pub(crate) document_sequences: Vec<DocumentSequence>,
    pub(crate) read_pref: Option<ReadPreference>,
    pub(crate) response_handling: ResponseHandling,
}

impl Command {
    /// Constructs a new command.
    pub(crate) fn new(name: impl Into<String>, target_db: impl Into<String>, body: Document) -> Self {
        Self {
            name: name.into(),
            target_db: target_db.into(),
            body,
            document_sequences: Vec::new(),
            read_pref: None,
            response_handling: ResponseHandling::Return,
        }
    }

    /// The command name, which is also the first key of the body.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The database the command runs against.
    pub fn target_db(&self) -> &str {
        &self.target_db
    }

    /// The command document. The first key is the command name.
    pub fn body(&self) -> &Document {
        &self.body
    }

    /// Payloads to send as document sequences.
    pub fn document_sequences(&self) -> &[DocumentSequence] {
        &self.document_sequences
    }

    /// The read preference to send as `$readPreference`, if any.
    pub fn read_preference(&self) -> Option<&ReadPreference> {
        self.read_pref.as_ref()
    }

    /// Whether the sender should wait for the server's reply.
    pub fn response_handling(&self) -> ResponseHandling {
        self.response_handling
    }

    pub(crate) fn add_document_sequence(
        &mut self,
        identifier: impl Into<String>,
        documents: Vec<Document>,
    ) {
        self.document_sequences
            .push(DocumentSequence::new(identifier, documents));
    }

    pub(crate) fn set_session(&mut self, session_id: &Document) {
        self.body.insert("lsid", session_id.clone());
    }

    pub(crate) fn set_cluster_time(&mut self, cluster_time: &ClusterTime) {
        // this should never fail.
        if let Ok(doc) = bson::to_bson(cluster_time) {
            self.body.insert("$clusterTime", doc);
        }
    }

    pub(crate) fn set_txn_number(&mut self, txn_number: i64) {
        self.body.insert("txnNumber", txn_number);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CommandResponse {
    pub(crate) raw_response: Document,
    cluster_time: Option<ClusterTime>,
}

impl CommandResponse {
    pub(crate) fn new(raw_response: Document) -> Self {
        let cluster_time = raw_response
            .get("$clusterTime")
            .and_then(|subdoc| bson::from_bson(subdoc.clone()).ok());

        Self {
            raw_response,
            cluster_time,
        }
    }

    /// Initialize a response from a document.
    #[cfg(test)]
    pub(crate) fn with_document(doc: Document) -> Self {
        Self::new(doc)
    }

    /// Returns whether this response indicates a success or not (i.e. if "ok: 1")
    pub(crate) fn is_success(&self) -> bool {
        if self.raw_response.contains_key("$err") {
            return false;
        }
        match self.raw_response.get("ok") {
            Some(b) => bson_util::get_int(b) == Some(1),
            _ => false,
        }
    }

    /// Returns a result indicating whether this response corresponds to a command failure. The
    /// error kind is chosen from the shape of the reply, and the reply is attached to the error.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }

        let command_error = match self.raw_response.get_str("$err") {
            Ok(message) => CommandError::new(
                bson_util::get_int_field(&self.raw_response, "code").unwrap_or(0) as i32,
                "",
                message,
            ),
            Err(_) => bson::from_bson(Bson::Document(self.raw_response.clone())).map_err(|_| {
                Error::invalid_response("invalid server response").with_server_response(&self.raw_response)
            })?,
        };

        let labels: Option<Vec<String>> = self
            .raw_response
            .get_array("errorLabels")
            .ok()
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|label| label.as_str().map(String::from))
                    .collect()
            });

        let kind = if command_error.code == MAX_TIME_MS_EXPIRED_CODE {
            ErrorKind::ExecutionTimeout(command_error)
        } else {
            ErrorKind::Command(command_error)
        };

        Err(Error::new(kind, labels).with_server_response(&self.raw_response))
    }

    /// Deserialize the body of the response.
    pub(crate) fn body<T: DeserializeOwned>(&self) -> Result<T> {
        match bson::from_bson(Bson::Document(self.raw_response.clone())) {
            Ok(body) => Ok(body),
            Err(e) => Err(Error::invalid_response(e.to_string())),
        }
    }

    /// Gets the cluster time from the response, if any.
    pub(crate) fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    /// Gets the operation time from the response, if any.
    pub(crate) fn operation_time(&self) -> Option<bson::Timestamp> {
        self.raw_response.get_timestamp("operationTime").ok()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        bson::doc,
        cmap::CommandResponse,
        error::{ErrorKind, RETRYABLE_WRITE_ERROR},
    };

    #[test]
    fn command_error_keeps_reply_and_labels() {
        let reply = doc! {
            "ok": 0,
            "code": 91,
            "codeName": "ShutdownInProgress",
            "errmsg": "shutting down",
            "errorLabels": [RETRYABLE_WRITE_ERROR],
        };
        let error = CommandResponse::with_document(reply.clone())
            .validate()
            .unwrap_err();
        match error.kind.as_ref() {
            ErrorKind::Command(command_error) => {
                assert_eq!(command_error.code, 91);
                assert_eq!(command_error.code_name, "ShutdownInProgress");
            }
            other => panic!("expected command error, got {:?}", other),
        }
        assert!(error.contains_label(RETRYABLE_WRITE_ERROR));
        assert_eq!(error.server_response(), Some(&reply));
    }

    #[test]
    fn max_time_expired_is_execution_timeout() {
        let error = CommandResponse::with_document(doc! {
            "ok": 0.0,
            "code": 50,
            "codeName": "MaxTimeMSExpired",
            "errmsg": "operation exceeded time limit",
        })
        .validate()
        .unwrap_err();
        assert!(matches!(error.kind.as_ref(), ErrorKind::ExecutionTimeout(_)));
    }

    #[test]
    fn legacy_err_payload() {
        let error = CommandResponse::with_document(doc! { "$err": "not master", "code": 10107 })
            .validate()
            .unwrap_err();
        assert!(error.is_notwritableprimary());
        assert!(error.server_response().is_some());
    }

    #[test]
    fn ok_reply_validates() {
        assert!(CommandResponse::with_document(doc! { "ok": 1.0 })
            .validate()
            .is_ok());
    }
}
