mod options;
#[cfg(test)]
mod test;

use serde::Deserialize;

pub use self::options::{
    FindOneAndDeleteOptions,
    FindOneAndReplaceOptions,
    FindOneAndUpdateOptions,
    ReturnDocument,
};
use self::options::FindAndModifyOptions;
use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, CommandResponse, ConnectionDescription},
    concern::WriteConcern,
    error::{ErrorKind, Result},
    feature::Feature,
    namespace::Namespace,
    operation::{
        append_options,
        append_write_concern,
        ensure_option_supported,
        executable,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
        UpdateModifications,
        WriteConcernOnlyBody,
    },
};

/// Atomically finds a single document and deletes, updates or replaces it, returning either the
/// original or the modified document.
#[derive(Debug)]
pub struct FindAndModify {
    ns: Namespace,
    query: Document,
    options: FindAndModifyOptions,
}

impl FindAndModify {
    /// Deletes the first document matching `filter`, returning it.
    pub fn delete(
        ns: Namespace,
        filter: Document,
        options: impl Into<Option<FindOneAndDeleteOptions>>,
    ) -> Self {
        let options = options.into().unwrap_or_default();
        Self {
            ns,
            query: filter,
            options: FindAndModifyOptions::from_find_one_and_delete_options(options),
        }
    }

    /// Replaces the first document matching `filter` with `replacement`.
    pub fn replace(
        ns: Namespace,
        filter: Document,
        replacement: Document,
        options: impl Into<Option<FindOneAndReplaceOptions>>,
    ) -> Result<Self> {
        bson_util::replacement_document_check(&replacement)?;
        let options = options.into().unwrap_or_default();
        Ok(Self {
            ns,
            query: filter,
            options: FindAndModifyOptions::from_find_one_and_replace_options(replacement, options),
        })
    }

    /// Applies `update`, either an update document or a pipeline, to the first document matching
    /// `filter`.
    pub fn update(
        ns: Namespace,
        filter: Document,
        update: impl Into<UpdateModifications>,
        options: impl Into<Option<FindOneAndUpdateOptions>>,
    ) -> Result<Self> {
        let update = update.into();
        if let UpdateModifications::Document(ref d) = update {
            bson_util::update_document_check(d)?;
        }
        let options = options.into().unwrap_or_default();
        Ok(Self {
            ns,
            query: filter,
            options: FindAndModifyOptions::from_find_one_and_update_options(update, options),
        })
    }

    fn check_features(&self, description: &ConnectionDescription) -> Result<()> {
        let options = &self.options;
        ensure_option_supported(options.collation.as_ref(), &Feature::COLLATION, description)?;
        ensure_option_supported(
            options.array_filters.as_ref(),
            &Feature::ARRAY_FILTERS,
            description,
        )?;
        ensure_option_supported(options.max_time.as_ref(), &Feature::MAX_TIME, description)?;
        if options.hint.is_some() {
            Feature::HINT_FOR_FIND_AND_MODIFY
                .validate(&description.server_version, self.is_acknowledged())?;
        }
        Ok(())
    }
}

impl OperationWithDefaults for FindAndModify {
    type O = Option<Document>;

    const NAME: &'static str = "findAndModify";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        self.check_features(description)?;
        let version = &description.server_version;

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "query": self.query.clone(),
        };
        append_options(&mut body, Some(&self.options))?;

        if let Some(bypass) = self.options.bypass_document_validation {
            if Feature::BYPASS_DOCUMENT_VALIDATION.is_supported(version) {
                body.insert("bypassDocumentValidation", bypass);
            }
        }
        if Feature::FIND_AND_MODIFY_WRITE_CONCERN.is_supported(version) {
            append_write_concern(&mut body, self.options.write_concern.as_ref())?;
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        response.body::<WriteConcernOnlyBody>()?.validate()?;

        #[derive(Debug, Deserialize)]
        struct Response {
            #[serde(default)]
            value: Bson,
        }
        let response: Response = response.body()?;

        match response.value {
            Bson::Document(doc) => Ok(Some(doc)),
            Bson::Null => Ok(None),
            other => Err(ErrorKind::InvalidResponse {
                message: format!(
                    "expected document for value field of findAndModify response, but instead got \
                     {:?}",
                    other
                ),
            }
            .into()),
        }
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.write_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }
}

executable!(FindAndModify, command => Option<Document>);

