use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, CommandResponse, ConnectionDescription},
    collation::Collation,
    concern::ReadConcern,
    error::Result,
    feature::Feature,
    max_time::MaxTime,
    namespace::Namespace,
    operation::{
        append_options,
        ensure_option_supported,
        executable,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
    },
};

/// Specifies the options to a [`GeoNear`] operation.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct GeoNearOptions {
    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// A factor applied to every returned distance.
    pub distance_multiplier: Option<f64>,

    /// Limits the results to documents matching this query.
    #[serde(rename = "query")]
    pub filter: Option<Document>,

    /// Whether to return the location used to compute each distance.
    pub include_locs: Option<bool>,

    /// The maximum number of documents to return.
    pub limit: Option<i64>,

    /// The maximum distance from the center point.
    pub max_distance: Option<f64>,

    /// The maximum amount of time to allow the command to run.
    #[serde(rename = "maxTimeMS")]
    pub max_time: Option<MaxTime>,

    /// The read concern to use for the operation.
    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    /// Whether distances are computed on a sphere.
    pub spherical: Option<bool>,

    /// Whether a document matching through several locations is returned only once.
    pub unique_docs: Option<bool>,
}

/// Returns the documents closest to a point, using the `geoNear` command. The output is the
/// server's reply, with the matches under `results`.
#[derive(Debug)]
pub struct GeoNear {
    ns: Namespace,
    near: Bson,
    options: Option<GeoNearOptions>,
}

impl GeoNear {
    /// `near` is either a legacy coordinate pair or a GeoJSON point.
    pub fn new(
        ns: Namespace,
        near: impl Into<Bson>,
        options: impl Into<Option<GeoNearOptions>>,
    ) -> Self {
        Self {
            ns,
            near: near.into(),
            options: options.into(),
        }
    }
}

impl OperationWithDefaults for GeoNear {
    type O = Document;

    const NAME: &'static str = "geoNear";

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        Feature::GEO_NEAR_COMMAND.ensure_supported(&description.server_version)?;
        if let Some(ref options) = self.options {
            ensure_option_supported(options.collation.as_ref(), &Feature::COLLATION, description)?;
            ensure_option_supported(options.max_time.as_ref(), &Feature::MAX_TIME, description)?;
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "near": self.near.clone(),
        };
        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        Ok(response.raw_response)
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.read_concern.as_ref())
    }

    fn supports_read_concern(&self, _description: &ConnectionDescription) -> bool {
        true
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

executable!(GeoNear, command => Document);
