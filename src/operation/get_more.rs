use serde::Deserialize;

use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, CommandResponse, ConnectionDescription},
    error::{Error, ErrorKind, Result},
    feature::Feature,
    max_time::MaxTime,
    namespace::Namespace,
    operation::{ExecutionContext, OperationWithDefaults},
};

/// Fetches the next batch of an open cursor.
#[derive(Debug)]
pub(crate) struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    batch_size: Option<i32>,
    max_time: Option<MaxTime>,
    comment: Option<Bson>,
}

impl GetMore {
    /// `batch_size` is the number of documents to ask for, already capped by any remaining limit.
    pub(crate) fn new(
        ns: Namespace,
        cursor_id: i64,
        batch_size: Option<i32>,
        max_time: Option<MaxTime>,
        comment: Option<Bson>,
    ) -> Self {
        Self {
            ns,
            cursor_id,
            batch_size,
            max_time,
            comment,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GetMoreResult {
    pub(crate) batch: Vec<Document>,
    pub(crate) id: i64,
    pub(crate) post_batch_resume_token: Option<Document>,
}

impl OperationWithDefaults for GetMore {
    type O = GetMoreResult;

    const NAME: &'static str = "getMore";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.cursor_id,
            "collection": self.ns.coll.clone(),
        };

        if let Some(batch_size) = self.batch_size.filter(|n| *n > 0) {
            body.insert("batchSize", batch_size);
        }

        if let Some(max_time) = self.max_time {
            body.insert("maxTimeMS", max_time.as_max_time_ms());
        }

        if let Some(ref comment) = self.comment {
            if Feature::GET_MORE_COMMENT.is_supported(&description.server_version) {
                body.insert("comment", comment.clone());
            }
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let response: GetMoreResponseBody = response.body()?;

        Ok(GetMoreResult {
            batch: response.cursor.next_batch,
            id: response.cursor.id,
            post_batch_resume_token: response.cursor.post_batch_resume_token,
        })
    }

    fn handle_error(&self, error: Error) -> Result<Self::O> {
        if error.is_cursor_not_found() && !matches!(*error.kind, ErrorKind::CursorNotFound { .. })
        {
            let response = error.server_response().cloned();
            let mut not_found = Error::new(
                ErrorKind::CursorNotFound {
                    cursor_id: self.cursor_id,
                },
                Some(error.labels().clone()),
            );
            if let Some(response) = response {
                not_found = not_found.with_server_response(&response);
            }
            return Err(not_found);
        }
        Err(error)
    }
}

#[derive(Debug, Deserialize)]
struct GetMoreResponseBody {
    cursor: NextBatchBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextBatchBody {
    id: i64,
    #[serde(default)]
    next_batch: Vec<Document>,
    post_batch_resume_token: Option<Document>,
}
