use bitflags::bitflags;

use crate::{
    bson::Document,
    cmap::CommandResponse,
    error::{Error, ErrorKind, Result},
    namespace::Namespace,
};

bitflags! {
    /// The bitwise flags of a legacy `OP_QUERY` message.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct QueryFlags: u32 {
        const TAILABLE_CURSOR   = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const SECONDARY_OK      = 0b_0000_0000_0000_0000_0000_0000_0000_0100;
        const NO_CURSOR_TIMEOUT = 0b_0000_0000_0000_0000_0000_0000_0001_0000;
        const AWAIT_DATA        = 0b_0000_0000_0000_0000_0000_0000_0010_0000;
        const PARTIAL           = 0b_0000_0000_0000_0000_0000_0000_1000_0000;
    }
}

bitflags! {
    /// The bitwise flags of a legacy `OP_REPLY` message.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ResponseFlags: u32 {
        const CURSOR_NOT_FOUND = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        const QUERY_FAILURE    = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const AWAIT_CAPABLE    = 0b_0000_0000_0000_0000_0000_0000_0000_0100;
    }
}

/// A legacy `OP_QUERY` message, used to read from servers that predate the `find` command.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyQuery {
    /// The collection to query.
    pub ns: Namespace,

    /// The filter, or a `{ $query: <filter>, <modifiers> }` wrapper when modifiers are present.
    pub query: Document,

    /// The projection, if any.
    pub fields: Option<Document>,

    /// The number of documents to skip.
    pub skip: i32,

    /// The size of the first batch. Negative values ask the server to close the cursor after it.
    pub number_to_return: i32,

    /// The message flags.
    pub flags: QueryFlags,
}

/// A legacy `OP_GET_MORE` message.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyGetMore {
    /// The collection the cursor iterates.
    pub ns: Namespace,

    /// The id of the server cursor.
    pub cursor_id: i64,

    /// The number of documents to ask for, or 0 for the server default.
    pub number_to_return: i32,
}

/// The `OP_REPLY` answering a [`LegacyQuery`] or a [`LegacyGetMore`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegacyReply {
    /// The reply's flags.
    pub flags: ResponseFlags,

    /// The id of the server cursor, or 0 once it is exhausted.
    pub cursor_id: i64,

    /// The documents returned.
    pub documents: Vec<Document>,
}

impl LegacyReply {
    /// Turns the failure flags of the reply into errors. `cursor_id` is the cursor the message
    /// was about, for get-more messages.
    pub(crate) fn validate(self, cursor_id: i64) -> Result<Self> {
        if self.flags.contains(ResponseFlags::CURSOR_NOT_FOUND) {
            return Err(ErrorKind::CursorNotFound { cursor_id }.into());
        }

        if self.flags.contains(ResponseFlags::QUERY_FAILURE) {
            let Some(failure) = self.documents.into_iter().next() else {
                return Err(Error::invalid_response(
                    "query failure reply is missing its error document",
                ));
            };
            CommandResponse::new(failure.clone()).validate()?;
            return Err(Error::invalid_response("query failure reply has no $err field")
                .with_server_response(&failure));
        }

        Ok(self)
    }
}

#[cfg(test)]
mod test {
    use super::{LegacyReply, ResponseFlags};
    use crate::{bson::doc, error::ErrorKind};

    #[test]
    fn cursor_not_found_flag() {
        let reply = LegacyReply {
            flags: ResponseFlags::CURSOR_NOT_FOUND,
            ..Default::default()
        };
        let error = reply.validate(17).unwrap_err();
        assert!(matches!(
            *error.kind,
            ErrorKind::CursorNotFound { cursor_id: 17 }
        ));
    }

    #[test]
    fn query_failure_uses_the_err_document() {
        let reply = LegacyReply {
            flags: ResponseFlags::QUERY_FAILURE,
            cursor_id: 0,
            documents: vec![doc! { "$err": "bad query", "code": 2 }],
        };
        let error = reply.validate(0).unwrap_err();
        assert_eq!(error.code(), Some(2));
        assert!(error.server_response().is_some());
    }

    #[test]
    fn successful_reply_passes_through() {
        let reply = LegacyReply {
            flags: ResponseFlags::AWAIT_CAPABLE,
            cursor_id: 4,
            documents: vec![doc! { "_id": 1 }],
        };
        assert_eq!(reply.clone().validate(0).unwrap(), reply);
    }
}
