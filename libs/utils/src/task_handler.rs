// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Cancellable task sets.

use tokio::{
    signal::unix::{SignalKind, signal},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A combination of a [tokio::task::JoinSet] and
/// [tokio_util::sync::CancellationToken].
///
/// All tasks of the set observe the same token. The first task that fails cancels the token so
/// the remaining tasks can shut down gracefully.
pub struct CancelTaskSet {
    /// Task set join set.
    pub join_set: JoinSet<Result<(), std::io::Error>>,
    cancellation_token: CancellationToken,
}

impl CancelTaskSet {
    /// Creates a new task set.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::from_cancel_token(false, CancellationToken::new())
    }

    /// Creates a task set and registers a handler that cancels the token upon receiving `SIGINT`
    /// or `SIGTERM`.
    pub fn new_with_signal_handler() -> Self {
        Self::from_cancel_token(true, CancellationToken::new())
    }

    /// Creates a task set from an existing cancellation token.
    pub fn from_cancel_token(
        register_signal_handler: bool,
        cancellation_token: CancellationToken,
    ) -> Self {
        let mut join_set = JoinSet::new();
        if register_signal_handler {
            join_set.spawn(shutdown_on_signal(cancellation_token.clone()));
        }
        CancelTaskSet {
            join_set,
            cancellation_token,
        }
    }

    /// Returns a clone of the cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Spawns a task that runs until it completes or the token is cancelled.
    pub fn spawn_cancellable_task<Fut>(&mut self, task: Fut)
    where
        Fut: Future<Output = Result<(), std::io::Error>> + Send + 'static,
    {
        let token = self.cancellation_token();
        self.join_set.spawn(async move {
            token.run_until_cancelled(task).await.unwrap_or(Ok(()))
        });
    }

    /// Joins all tasks in the set. If any task fails, the token is cancelled.
    ///
    /// Returns the first error observed, if any.
    pub async fn join_all(&mut self) -> Result<(), std::io::Error> {
        let mut first_error = None;
        while let Some(result) = self.join_set.join_next().await {
            let err = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => {
                    error!(error=%e, "Task failed");
                    e
                }
                Err(e) => {
                    error!(error=%e, "Task join failed");
                    std::io::Error::other(e)
                }
            };
            self.cancellation_token.cancel();
            first_error.get_or_insert(err);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for CancelTaskSet {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        self.join_set.abort_all();
    }
}

async fn shutdown_on_signal(cancellation_token: CancellationToken) -> Result<(), std::io::Error> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            debug!("Received SIGINT, cancelling token");
            cancellation_token.cancel();
        },
        _ = sigterm.recv() => {
            debug!("Received SIGTERM, cancelling token");
            cancellation_token.cancel();
        },
        _ = cancellation_token.cancelled() => {
            debug!("Cancellation token cancelled, exiting shutdown handler");
        },
    }
    Ok(())
}
