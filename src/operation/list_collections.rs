use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, CommandResponse, ConnectionDescription},
    cursor::CursorSpecification,
    error::Result,
    feature::Feature,
    operation::{
        append_options,
        executable,
        CursorBody,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
    },
    serde_util,
};

/// Specifies the options to a [`ListCollections`] operation.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ListCollectionsOptions {
    /// The number of documents the server should return per cursor batch.
    #[serde(
        serialize_with = "serde_util::serialize_u32_option_as_batch_size",
        rename(serialize = "cursor")
    )]
    pub batch_size: Option<u32>,

    /// Tags the command with an arbitrary value to help trace it through the database profiler,
    /// currentOp and logs.
    pub comment: Option<Bson>,

    /// Filters the list operation.
    pub filter: Option<Document>,

    /// When `true` together with `name_only`, the command returns only those collections for
    /// which the user has privileges.
    pub authorized_collections: Option<bool>,

    /// Whether to return only the name and type of each collection. Ignored when the filter
    /// refers to fields other than `name`.
    #[serde(skip)]
    pub name_only: Option<bool>,
}

/// Lists the collections of a database.
#[derive(Debug)]
pub struct ListCollections {
    db: String,
    options: Option<ListCollectionsOptions>,
}

impl ListCollections {
    pub fn new(
        db: impl Into<String>,
        options: impl Into<Option<ListCollectionsOptions>>,
    ) -> Self {
        Self {
            db: db.into(),
            options: options.into(),
        }
    }
}

impl OperationWithDefaults for ListCollections {
    type O = CursorSpecification;

    const NAME: &'static str = "listCollections";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        Feature::LIST_COLLECTIONS_COMMAND.ensure_supported(&description.server_version)?;

        let mut body = doc! {
            Self::NAME: 1,
        };

        let mut name_only = self
            .options
            .as_ref()
            .and_then(|o| o.name_only)
            .unwrap_or(false);
        if let Some(filter) = self.options.as_ref().and_then(|o| o.filter.as_ref()) {
            if name_only && filter.keys().any(|k| k != "name") {
                name_only = false;
            }
        }
        if name_only {
            body.insert("nameOnly", true);
        }

        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let response: CursorBody = response.body()?;
        Ok(CursorSpecification::new(
            response,
            self.options.as_ref().and_then(|opts| opts.batch_size),
            None,
        ))
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

executable!(ListCollections, cursor);
