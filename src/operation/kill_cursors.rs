use serde::Deserialize;

use crate::{
    bson::doc,
    cmap::{Command, CommandResponse, ConnectionDescription},
    error::{CommandError, Error, ErrorKind, Result, CURSOR_NOT_FOUND_CODE},
    namespace::Namespace,
    operation::{ExecutionContext, OperationWithDefaults},
};

/// Kills a single server cursor with the `killCursors` command.
#[derive(Debug)]
pub(crate) struct KillCursors {
    ns: Namespace,
    cursor_id: i64,
}

impl KillCursors {
    pub(crate) fn new(ns: Namespace, cursor_id: i64) -> Self {
        Self { ns, cursor_id }
    }
}

impl OperationWithDefaults for KillCursors {
    type O = ();

    const NAME: &'static str = "killCursors";

    fn build(&mut self, _description: &ConnectionDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "cursors": [self.cursor_id],
        };
        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let body: KillCursorsResponseBody = response.body()?;

        if body.cursors_not_found.contains(&self.cursor_id) {
            return Err(ErrorKind::CursorNotFound {
                cursor_id: self.cursor_id,
            }
            .into());
        }
        if !body.cursors_killed.contains(&self.cursor_id) {
            return Err(ErrorKind::Command(CommandError::new(
                0,
                "",
                format!("killCursors did not report cursor {} as killed", self.cursor_id),
            ))
            .into());
        }
        Ok(())
    }

    fn handle_error(&self, error: Error) -> Result<Self::O> {
        // The server already forgot the cursor: the outcome the caller asked for.
        if matches!(*error.kind, ErrorKind::Command(ref e) if e.code == CURSOR_NOT_FOUND_CODE)
        {
            return Ok(());
        }
        Err(error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KillCursorsResponseBody {
    #[serde(default)]
    cursors_killed: Vec<i64>,

    #[serde(default)]
    cursors_not_found: Vec<i64>,
}
