use tokio_util::sync::CancellationToken;

use crate::{
    binding::Binding,
    bson::{doc, Document, Timestamp},
    change_stream::{
        event::{ChangeStreamEvent, ResumeToken},
        options::ChangeStreamOptions,
        ChangeStream,
    },
    cmap::{Command, CommandResponse, ConnectionDescription},
    concern::ReadConcern,
    cursor::CursorSpecification,
    error::Result,
    executor::execute_cursor_operation,
    feature::Feature,
    namespace::Namespace,
    operation::{
        aggregate::{Aggregate, AggregateTarget},
        ensure_option_supported,
        CursorBody,
        Executable,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
    },
    BoxFuture,
};

/// What a change stream watches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeStreamTarget {
    /// Changes to one collection.
    Collection(Namespace),

    /// Changes to every collection of a database. Requires MongoDB 4.0.
    Database(String),

    /// Changes to every database of the deployment, watched through `admin`. Requires MongoDB
    /// 4.0.
    Cluster,
}

impl From<Namespace> for ChangeStreamTarget {
    fn from(ns: Namespace) -> Self {
        Self::Collection(ns)
    }
}

/// The point a resumed change stream restarts from. Replaces whichever starting point the stream
/// was opened with.
#[derive(Clone, Debug, PartialEq)]
enum ResumePoint {
    StartAfter(ResumeToken),
    ResumeAfter(ResumeToken),
    StartAtOperationTime(Timestamp),
}

/// Opens a change stream: an `aggregate` whose pipeline starts with a `$changeStream` stage.
/// Executing it produces a [`ChangeStream`], which resumes itself after transient errors by
/// running this operation again from the last known position.
#[derive(Clone, Debug)]
pub struct ChangeStreamAggregate {
    target: ChangeStreamTarget,
    pipeline: Vec<Document>,
    options: ChangeStreamOptions,
    resume_point: Option<ResumePoint>,
}

impl ChangeStreamAggregate {
    /// `pipeline` holds the stages that follow `$changeStream`.
    pub fn new(
        target: impl Into<ChangeStreamTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> Self {
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options: options.into().unwrap_or_default(),
            resume_point: None,
        }
    }

    /// The token the stream was opened with, if any.
    pub(crate) fn initial_resume_token(&self) -> Option<ResumeToken> {
        self.options
            .start_after
            .as_ref()
            .or(self.options.resume_after.as_ref())
            .cloned()
    }

    /// Moves the starting point to where a resumed stream should pick up. A token is sent as
    /// `startAfter` only while the stream was opened with `startAfter` and has not returned a
    /// document yet; without a token the stream restarts at an operation time if it has one.
    pub(crate) fn update_for_resume(
        &mut self,
        token: Option<ResumeToken>,
        document_returned: bool,
        initial_operation_time: Option<Timestamp>,
    ) {
        self.resume_point = match token {
            Some(token) if self.options.start_after.is_some() && !document_returned => {
                Some(ResumePoint::StartAfter(token))
            }
            Some(token) => Some(ResumePoint::ResumeAfter(token)),
            None => self
                .options
                .start_at_operation_time
                .or(initial_operation_time)
                .map(ResumePoint::StartAtOperationTime),
        };
    }

    fn check_features(&self, description: &ConnectionDescription) -> Result<()> {
        let version = &description.server_version;
        Feature::CHANGE_STREAM_STAGE.ensure_supported(version)?;
        match self.target {
            ChangeStreamTarget::Collection(_) => {}
            ChangeStreamTarget::Database(_) => {
                Feature::CHANGE_STREAM_FOR_DATABASE.ensure_supported(version)?
            }
            ChangeStreamTarget::Cluster => {
                Feature::CHANGE_STREAM_ALL_CHANGES_FOR_CLUSTER.ensure_supported(version)?
            }
        }

        let options = &self.options;
        let (start_after, start_at_operation_time) = match self.resume_point {
            Some(ResumePoint::StartAfter(ref token)) => (Some(token), None),
            Some(ResumePoint::ResumeAfter(_)) => (None, None),
            Some(ResumePoint::StartAtOperationTime(ref time)) => (None, Some(time)),
            None => (
                options.start_after.as_ref(),
                options.start_at_operation_time.as_ref(),
            ),
        };
        ensure_option_supported(start_after, &Feature::CHANGE_STREAM_START_AFTER, description)?;
        ensure_option_supported(
            start_at_operation_time,
            &Feature::CHANGE_STREAM_START_AT_OPERATION_TIME,
            description,
        )?;
        ensure_option_supported(
            options.full_document_before_change.as_ref(),
            &Feature::CHANGE_STREAM_PRE_POST_IMAGES,
            description,
        )?;
        if options
            .full_document
            .as_ref()
            .is_some_and(|f| f.uses_post_images())
        {
            Feature::CHANGE_STREAM_PRE_POST_IMAGES.ensure_supported(version)?;
        }
        Ok(())
    }

    fn stage(&self) -> Result<Document> {
        let mut stage = bson::to_document(&self.options)?;
        if let Some(ref resume_point) = self.resume_point {
            for key in ["resumeAfter", "startAfter", "startAtOperationTime"] {
                stage.remove(key);
            }
            match resume_point {
                ResumePoint::StartAfter(token) => {
                    stage.insert("startAfter", token.0.clone());
                }
                ResumePoint::ResumeAfter(token) => {
                    stage.insert("resumeAfter", token.0.clone());
                }
                ResumePoint::StartAtOperationTime(time) => {
                    stage.insert("startAtOperationTime", *time);
                }
            }
        }
        if self.target == ChangeStreamTarget::Cluster {
            stage.insert("allChangesForCluster", true);
        }
        Ok(stage)
    }

    fn aggregate_target(&self) -> AggregateTarget {
        match self.target {
            ChangeStreamTarget::Collection(ref ns) => AggregateTarget::Collection(ns.clone()),
            ChangeStreamTarget::Database(ref db) => AggregateTarget::Database(db.clone()),
            ChangeStreamTarget::Cluster => AggregateTarget::Database("admin".to_string()),
        }
    }
}

impl OperationWithDefaults for ChangeStreamAggregate {
    type O = CursorSpecification;

    const NAME: &'static str = Aggregate::NAME;

    fn build(&mut self, description: &ConnectionDescription) -> Result<Command> {
        self.check_features(description)?;

        let mut pipeline = vec![doc! { "$changeStream": self.stage()? }];
        pipeline.extend(self.pipeline.iter().cloned());

        let mut aggregate = Aggregate::new(
            self.aggregate_target(),
            pipeline,
            self.options.aggregate_options(),
        );
        aggregate.build(description)
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let body: CursorBody = response.body()?;
        let mut spec = CursorSpecification::new(body, self.options.batch_size, None)
            .with_max_await_time(self.options.max_await_time)
            .with_comment(self.options.comment.clone());

        // The operation time is only a usable starting point for a stream that was not told
        // where to start, on a server that accepts `startAtOperationTime`.
        if self.options.has_starting_point()
            || self.resume_point.is_some()
            || !Feature::CHANGE_STREAM_START_AT_OPERATION_TIME
                .is_supported(&context.description.server_version)
        {
            spec.operation_time = None;
        }
        Ok(spec)
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.options.read_concern.as_ref()
    }

    fn supports_read_concern(&self, _description: &ConnectionDescription) -> bool {
        true
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

impl Executable for ChangeStreamAggregate {
    type Output = ChangeStream<ChangeStreamEvent<Document>>;

    fn execute<'a>(
        &'a mut self,
        binding: &'a Binding,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let cursor = execute_cursor_operation(self, binding, cancel).await?;
            Ok(ChangeStream::new(cursor, binding.fork(), self.clone()))
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{ChangeStreamAggregate, ChangeStreamTarget};
    use crate::{
        bson::{doc, Timestamp},
        change_stream::{
            event::ResumeToken,
            options::{ChangeStreamOptions, FullDocumentBeforeChangeType, FullDocumentType},
        },
        namespace::Namespace,
        operation::test::{build, handle_response},
        test::{cursor_reply, version},
    };

    fn ns() -> Namespace {
        Namespace::new("db", "coll")
    }

    #[test]
    fn collection_stream() {
        let options = ChangeStreamOptions::builder()
            .full_document(FullDocumentType::UpdateLookup)
            .batch_size(3)
            .show_expanded_events(true)
            .build();
        let mut op = ChangeStreamAggregate::new(ns(), [doc! { "$match": { "x": 1 } }], options);
        let command = build(&mut op, version(5, 0, 0)).unwrap();

        assert_eq!(command.target_db, "db");
        assert_eq!(
            command.body,
            doc! {
                "aggregate": "coll",
                "pipeline": [
                    {
                        "$changeStream": {
                            "fullDocument": "updateLookup",
                            "showExpandedEvents": true,
                        }
                    },
                    { "$match": { "x": 1 } },
                ],
                "cursor": { "batchSize": 3 },
            }
        );
    }

    #[test]
    fn database_and_cluster_streams() {
        let mut op = ChangeStreamAggregate::new(ChangeStreamTarget::Database("db".into()), [], None);
        assert!(build(&mut op, version(3, 6, 0)).unwrap_err().is_not_supported());
        let command = build(&mut op, version(4, 0, 0)).unwrap();
        assert_eq!(command.body.get_i32("aggregate").unwrap(), 1);
        assert_eq!(command.target_db, "db");

        let mut op = ChangeStreamAggregate::new(ChangeStreamTarget::Cluster, [], None);
        assert!(build(&mut op, version(3, 6, 0)).unwrap_err().is_not_supported());
        let command = build(&mut op, version(4, 0, 0)).unwrap();
        assert_eq!(command.target_db, "admin");
        assert_eq!(
            command.body.get_array("pipeline").unwrap()[0],
            bson::Bson::Document(doc! { "$changeStream": { "allChangesForCluster": true } })
        );
    }

    #[test]
    fn gated_options() {
        let token = ResumeToken::from(doc! { "t": 1 });
        let cases = [
            (
                ChangeStreamOptions::builder().start_after(token).build(),
                version(4, 0, 0),
                version(4, 1, 1),
            ),
            (
                ChangeStreamOptions::builder()
                    .start_at_operation_time(Timestamp { time: 1, increment: 0 })
                    .build(),
                version(3, 6, 0),
                version(4, 0, 0),
            ),
            (
                ChangeStreamOptions::builder()
                    .full_document_before_change(FullDocumentBeforeChangeType::Required)
                    .build(),
                version(5, 0, 0),
                version(6, 0, 0),
            ),
            (
                ChangeStreamOptions::builder()
                    .full_document(FullDocumentType::WhenAvailable)
                    .build(),
                version(5, 0, 0),
                version(6, 0, 0),
            ),
        ];

        for (options, unsupported, supported) in cases {
            let mut op = ChangeStreamAggregate::new(ns(), [], options);
            assert!(build(&mut op, unsupported).unwrap_err().is_not_supported());
            build(&mut op, supported).unwrap();
        }

        let mut op = ChangeStreamAggregate::new(ns(), [], None);
        assert!(build(&mut op, version(3, 4, 0)).unwrap_err().is_not_supported());
    }

    #[test]
    fn resume_point_replaces_initial_options() {
        let initial = ResumeToken::from(doc! { "t": 0 });
        let cached = ResumeToken::from(doc! { "t": 5 });
        let options = ChangeStreamOptions::builder()
            .start_after(initial)
            .build();
        let stage = |op: &mut ChangeStreamAggregate| {
            let command = build(op, version(7, 0, 0)).unwrap();
            command.body.get_array("pipeline").unwrap()[0]
                .as_document()
                .unwrap()
                .get_document("$changeStream")
                .unwrap()
                .clone()
        };

        let mut op = ChangeStreamAggregate::new(ns(), [], options);
        op.update_for_resume(Some(cached.clone()), false, None);
        assert_eq!(stage(&mut op), doc! { "startAfter": { "t": 5 } });

        op.update_for_resume(Some(cached), true, None);
        assert_eq!(stage(&mut op), doc! { "resumeAfter": { "t": 5 } });

        let mut op = ChangeStreamAggregate::new(ns(), [], None);
        let time = Timestamp { time: 7, increment: 2 };
        op.update_for_resume(None, false, Some(time));
        assert_eq!(stage(&mut op), doc! { "startAtOperationTime": time });
    }

    #[test]
    fn operation_time_kept_only_without_starting_point() {
        let mut reply = cursor_reply("db.coll", 0, "firstBatch", []);
        reply.insert("operationTime", Timestamp { time: 9, increment: 1 });

        let op = ChangeStreamAggregate::new(ns(), [], None);
        let spec = handle_response(&op, reply.clone()).unwrap();
        assert_eq!(spec.operation_time, Some(Timestamp { time: 9, increment: 1 }));

        let options = ChangeStreamOptions::builder()
            .resume_after(ResumeToken::from(doc! { "t": 1 }))
            .build();
        let op = ChangeStreamAggregate::new(ns(), [], options);
        let spec = handle_response(&op, reply).unwrap();
        assert_eq!(spec.operation_time, None);
    }
}
