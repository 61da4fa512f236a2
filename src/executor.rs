//! Runs operations: builds the command for the server at hand, attaches session and read concern
//! state, sends it, and hands the reply back to the operation. Retries at most once.


use std::{
    sync::atomic::{AtomicI32, Ordering},
    time::Instant,
};

use tokio_util::sync::CancellationToken;

use crate::{
    binding::{Binding, ChannelSource},
    cmap::{Channel, CommandResponse, LegacyGetMore, LegacyQuery, LegacyReply, ResponseHandling},
    concern::ReadConcernInternal,
    cursor::{AsyncCursor, CursorSpecification},
    error::{Error, Result, RETRYABLE_WRITE_ERROR},
    feature::Feature,
    operation::{ExecutionContext, Operation, Retryability},
    runtime,
    selection_criteria::ReadPreference,
    session::SessionHandle,
    trace::{TracingRepresentation, COMMAND_TRACING_EVENT_TARGET},
};

static REQUEST_ID: AtomicI32 = AtomicI32::new(0);

fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Executes an operation through the binding, returning its output.
pub(crate) async fn execute_operation<Op: Operation>(
    op: &mut Op,
    binding: &Binding,
    cancel: &CancellationToken,
) -> Result<Op::O> {
    let source = binding.channel_source();
    execute_with_retry(op, &source, binding.read_preference(), cancel).await
}

/// Executes an operation whose reply opens a cursor. The cursor keeps its own reference to the
/// binding's session and server.
pub(crate) async fn execute_cursor_operation<Op>(
    op: &mut Op,
    binding: &Binding,
    cancel: &CancellationToken,
) -> Result<AsyncCursor>
where
    Op: Operation<O = CursorSpecification>,
{
    let source = binding.channel_source();
    let spec = execute_with_retry(op, &source, binding.read_preference(), cancel).await?;
    Ok(AsyncCursor::new(source, spec))
}

/// Acquires a channel from `source` and runs the operation on it. If the attempt fails with an
/// error the operation's retryability allows, the operation is run once more on a newly acquired
/// channel, with the same session and transaction number.
pub(crate) async fn execute_with_retry<Op: Operation>(
    op: &mut Op,
    source: &ChannelSource,
    read_preference: &ReadPreference,
    cancel: &CancellationToken,
) -> Result<Op::O> {
    let channel = source.get_channel(cancel).await?;
    execute_with_retry_on(op, source, channel, read_preference, cancel).await
}

/// Like [`execute_with_retry`], with the first attempt made on an already acquired channel.
pub(crate) async fn execute_with_retry_on<Op: Operation>(
    op: &mut Op,
    source: &ChannelSource,
    channel: Box<dyn Channel>,
    read_preference: &ReadPreference,
    cancel: &CancellationToken,
) -> Result<Op::O> {
    let session = source.session();
    let retryability = effective_retryability(op, channel.as_ref(), session);
    let txn_number = match retryability {
        Retryability::Write => Some(session.get_and_increment_txn_number()),
        _ => None,
    };

    let first_error = match execute_on_channel(
        op,
        channel.as_ref(),
        session,
        read_preference,
        txn_number,
        cancel,
    )
    .await
    {
        Ok(output) => return Ok(output),
        Err(error) => error,
    };
    drop(channel);

    let first_error = match retryability {
        Retryability::Read if first_error.is_read_retryable() => first_error,
        Retryability::Write if first_error.is_write_retryable() => {
            let mut error = first_error;
            error.add_label(RETRYABLE_WRITE_ERROR);
            error
        }
        _ => return Err(first_error),
    };

    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        commandName = op.name(),
        error = first_error.tracing_representation(),
        "Retrying operation"
    );

    // A failure to reach a server for the retry is not more interesting than the original error.
    let channel = match source.get_channel(cancel).await {
        Ok(channel) => channel,
        Err(error) if error.is_cancelled() => return Err(error),
        Err(_) => return Err(first_error),
    };
    if effective_retryability(op, channel.as_ref(), session) != retryability {
        return Err(first_error);
    }

    op.update_for_retry();
    execute_on_channel(
        op,
        channel.as_ref(),
        session,
        read_preference,
        txn_number,
        cancel,
    )
    .await
}

fn effective_retryability<Op: Operation>(
    op: &Op,
    channel: &dyn Channel,
    session: &SessionHandle,
) -> Retryability {
    let description = channel.description();
    match op.retryability() {
        Retryability::Read
            if Feature::RETRYABLE_READS.is_supported(&description.server_version) =>
        {
            Retryability::Read
        }
        Retryability::Write
            if session.id().is_some()
                && description.supports_sessions
                && !description.server_type.is_standalone()
                && op.is_acknowledged()
                && Feature::RETRYABLE_WRITES.is_supported(&description.server_version) =>
        {
            Retryability::Write
        }
        _ => Retryability::None,
    }
}

/// Runs a single attempt of an operation on the given channel.
pub(crate) async fn execute_on_channel<Op: Operation>(
    op: &mut Op,
    channel: &dyn Channel,
    session: &SessionHandle,
    read_preference: &ReadPreference,
    txn_number: Option<i64>,
    cancel: &CancellationToken,
) -> Result<Op::O> {
    let description = channel.description();
    let mut command = op.build(description)?;

    if op.supports_read_concern(description) {
        let mut read_concern: ReadConcernInternal =
            op.read_concern().cloned().map(Into::into).unwrap_or_default();
        if read_concern.level.is_some() {
            Feature::READ_CONCERN.ensure_supported(&description.server_version)?;
        }
        if session.causal_consistency()
            && session.id().is_some()
            && Feature::READ_CONCERN.is_supported(&description.server_version)
        {
            read_concern.after_cluster_time = session.operation_time();
        }
        if read_concern.level.is_some() || read_concern.after_cluster_time.is_some() {
            command
                .body
                .insert("readConcern", bson::to_bson(&read_concern)?);
        }
    }

    if !read_preference.is_primary() {
        read_preference.ensure_supported(&description.server_version)?;
        command.read_pref = Some(read_preference.clone());
    }

    let acknowledged = op.is_acknowledged();
    if !acknowledged {
        command.response_handling = ResponseHandling::Ignore;
    }

    if let Some(session_id) = session.id() {
        if description.supports_sessions && op.supports_sessions() && acknowledged {
            command.set_session(session_id);
            if let Some(txn_number) = txn_number {
                command.set_txn_number(txn_number);
            }
        }
    }

    if let Some(cluster_time) = session.cluster_time() {
        command.set_cluster_time(&cluster_time);
    }

    let request_id = next_request_id();
    let command_name = command.name.clone();
    let response_handling = command.response_handling;
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        command = command.body.tracing_representation(),
        databaseName = command.target_db.as_str(),
        commandName = command_name.as_str(),
        requestId = request_id,
        "Command started"
    );

    let start = Instant::now();
    let result = runtime::cancellable(cancel, channel.command(command, cancel)).await;
    let duration = start.elapsed();

    let reply = match result {
        Ok(reply) => reply,
        Err(error) => {
            log_failure(&command_name, request_id, duration.as_millis(), &error);
            return op.handle_error(error);
        }
    };

    let response = CommandResponse::new(reply);
    if response_handling == ResponseHandling::Return {
        if let Some(cluster_time) = response.cluster_time() {
            session.advance_cluster_time(cluster_time);
        }
        if let Some(operation_time) = response.operation_time() {
            session.advance_operation_time(operation_time);
        }
        if let Err(error) = response.validate() {
            log_failure(&command_name, request_id, duration.as_millis(), &error);
            return op.handle_error(error);
        }
    }

    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        reply = response.raw_response.tracing_representation(),
        commandName = command_name.as_str(),
        requestId = request_id,
        durationMS = duration.as_millis(),
        "Command succeeded"
    );

    let raw_response = response.raw_response.clone();
    let context = ExecutionContext {
        description,
        session,
    };
    op.handle_response(response, context)
        .map_err(|error| attach_reply(error, &raw_response))
}

/// Sends a legacy query message. Sessions, read concern and cluster times do not exist on the
/// servers this is used for.
pub(crate) async fn execute_query(
    channel: &dyn Channel,
    query: LegacyQuery,
    cancel: &CancellationToken,
) -> Result<LegacyReply> {
    let request_id = next_request_id();
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        command = query.query.tracing_representation(),
        databaseName = query.ns.db.as_str(),
        commandName = "find",
        requestId = request_id,
        "Legacy query started"
    );

    let start = Instant::now();
    let result = runtime::cancellable(cancel, channel.query(query, cancel))
        .await
        .and_then(|reply| reply.validate(0));
    log_legacy_outcome("find", request_id, start.elapsed().as_millis(), &result);
    result
}

/// Sends a legacy get-more message for the given cursor.
pub(crate) async fn execute_get_more_message(
    channel: &dyn Channel,
    get_more: LegacyGetMore,
    cancel: &CancellationToken,
) -> Result<LegacyReply> {
    let request_id = next_request_id();
    let cursor_id = get_more.cursor_id;
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        databaseName = get_more.ns.db.as_str(),
        commandName = "getMore",
        cursorId = cursor_id,
        requestId = request_id,
        "Legacy get more started"
    );

    let start = Instant::now();
    let result = runtime::cancellable(cancel, channel.get_more(get_more, cancel))
        .await
        .and_then(|reply| reply.validate(cursor_id));
    log_legacy_outcome("getMore", request_id, start.elapsed().as_millis(), &result);
    result
}

fn log_legacy_outcome(
    command_name: &str,
    request_id: i32,
    duration_ms: u128,
    result: &Result<LegacyReply>,
) {
    match result {
        Ok(reply) => tracing::debug!(
            target: COMMAND_TRACING_EVENT_TARGET,
            commandName = command_name,
            requestId = request_id,
            cursorId = reply.cursor_id,
            numberReturned = reply.documents.len(),
            durationMS = duration_ms,
            "Legacy message succeeded"
        ),
        Err(error) => log_failure(command_name, request_id, duration_ms, error),
    }
}

fn attach_reply(error: Error, reply: &crate::bson::Document) -> Error {
    if error.is_server_error() {
        error.with_server_response(reply)
    } else {
        error
    }
}

fn log_failure(command_name: &str, request_id: i32, duration_ms: u128, error: &Error) {
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        failure = error.tracing_representation(),
        commandName = command_name,
        requestId = request_id,
        durationMS = duration_ms,
        "Command failed"
    );
}
