//! Handle to a streaming turn running in the background.

use codecrab_core::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::loop_runner::TurnOutcome;
use crate::session::Session;

/// Owns a turn started by [`crate::Agent::ask_stream`].
///
/// Output arrives through the agent's notifier. The session comes back
/// from [`StreamHandle::join`] once the turn is over.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    join: JoinHandle<(Session, Result<TurnOutcome, Error>)>,
}

impl StreamHandle {
    pub(crate) fn new(
        cancel: CancellationToken,
        join: JoinHandle<(Session, Result<TurnOutcome, Error>)>,
    ) -> Self {
        Self { cancel, join }
    }

    /// Ask the turn to stop. Partial output is kept in the session.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the turn and take the session back with its outcome.
    pub async fn join(self) -> Result<(Session, Result<TurnOutcome, Error>), Error> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("streaming turn failed: {e}")))
    }

    /// Cancel, then wait for the session.
    pub async fn cancel_and_join(self) -> Result<(Session, Result<TurnOutcome, Error>), Error> {
        self.cancel();
        self.join().await
    }
}
