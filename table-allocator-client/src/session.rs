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
//! Lease session state machine.
//!
//! [LeaseSession] performs no I/O. Inputs are fed through [LeaseSession::request],
//! [LeaseSession::release], [LeaseSession::handle_response] and [LeaseSession::handle_timeout].
//! The resulting actions are drained with [LeaseSession::poll_action], and
//! [LeaseSession::poll_timeout] tells the driver when to call [LeaseSession::handle_timeout]
//! next.
//!
//! ```text
//! Idle -> AwaitingReply -> Granted -> AwaitingReply (renewal) -> Granted -> ...
//!                |                                                  |
//!                +--> Failed                         release() -> Releasing -> Closed
//! ```

use std::{collections::VecDeque, time::Duration};

use table_allocator_proto::{Command, LeaseKey, Request, Response, Status};
use thiserror::Error;
use tokio::time::Instant;

use crate::timer::Timer;

/// Default interval between two transmissions of the same request.
pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(2000);
/// Default number of unanswered transmissions after which a request fails.
pub const DEFAULT_MAX_FAILURES: u32 = 5;
/// Default number of unanswered transmissions after which a release is given up.
pub const DEFAULT_MAX_RELEASE_FAILURES: u32 = 2;

/// Session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Interval between two transmissions of the same request.
    pub retransmit_interval: Duration,
    /// Unanswered transmissions after which a request fails.
    pub max_failures: u32,
    /// Unanswered transmissions after which a release is given up.
    pub max_release_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: DEFAULT_RETRANSMIT_INTERVAL,
            max_failures: DEFAULT_MAX_FAILURES,
            max_release_failures: DEFAULT_MAX_RELEASE_FAILURES,
        }
    }
}

impl SessionConfig {
    /// Delay after a grant at which the lease is renewed.
    ///
    /// Leaves room for a full retransmission cycle before the lease expires, but renews no later
    /// than halfway through the lease. The delay is at least one retransmission interval and
    /// always shorter than the lease.
    pub fn renewal_delay(&self, lease: Duration) -> Duration {
        let retry_budget = self
            .retransmit_interval
            .saturating_mul(self.max_failures.saturating_add(1));
        let delay = (lease / 2)
            .min(lease.saturating_sub(retry_budget))
            .max(self.retransmit_interval);
        if delay >= lease { lease / 2 } else { delay }
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing requested yet.
    Idle,
    /// A REQUEST is outstanding.
    AwaitingReply,
    /// A table is leased, the renewal timer is armed.
    Granted,
    /// A RELEASE is outstanding.
    Releasing,
    /// The session ended after a release.
    Closed,
    /// The session ended with an error.
    Failed,
}

/// Terminal session errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The server rejected the request.
    #[error("server rejected the request: {0}")]
    Rejected(Status),
    /// The server did not answer.
    #[error("no reply after {0} transmissions")]
    NoReply(u32),
}

/// Work for the driver of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send a request to the server.
    Transmit(Request),
    /// Route traffic through the leased table.
    InstallRoute {
        /// Leased table.
        table: u32,
    },
    /// Stop routing traffic through a table.
    RemoveRoute {
        /// Table no longer leased.
        table: u32,
    },
    /// The session failed. No further actions follow.
    Failed(SessionError),
    /// The session is closed. No further actions follow.
    Closed {
        /// `true` if the server confirmed the release.
        released: bool,
    },
}

/// Reliable lease session for one [LeaseKey].
#[derive(Debug)]
pub struct LeaseSession {
    key: LeaseKey,
    config: SessionConfig,
    state: SessionState,
    seq: u32,
    outstanding: Option<Request>,
    failures: u32,
    table: Option<u32>,
    lease: Option<Duration>,
    retransmit: Timer,
    renewal: Timer,
    actions: VecDeque<SessionAction>,
}

impl LeaseSession {
    /// Creates an idle session. `initial_seq` seeds the sequence numbers of the exchanges.
    pub fn new(key: LeaseKey, config: SessionConfig, initial_seq: u32) -> Self {
        Self {
            key,
            config,
            state: SessionState::Idle,
            seq: initial_seq,
            outstanding: None,
            failures: 0,
            table: None,
            lease: None,
            retransmit: Timer::new(),
            renewal: Timer::new(),
            actions: VecDeque::new(),
        }
    }

    /// The lease key.
    pub fn key(&self) -> &LeaseKey {
        &self.key
    }

    /// The current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The leased table.
    pub fn table(&self) -> Option<u32> {
        self.table
    }

    /// Duration of the last granted lease.
    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }

    /// Requests a table. Renews immediately if a table is already leased.
    ///
    /// Ignored while a request or release is outstanding and after the session ended.
    pub fn request(&mut self, now: Instant) {
        match self.state {
            SessionState::Idle | SessionState::Granted => {
                self.renewal.cancel();
                self.send(Command::Request, now);
            }
            state => tracing::debug!(?state, "Ignoring table request"),
        }
    }

    /// Releases the lease.
    ///
    /// The route of a leased table is removed before the release is sent. The release is
    /// retransmitted at most [SessionConfig::max_release_failures] times, after which the session
    /// closes regardless of the server's answer.
    pub fn release(&mut self, now: Instant) {
        match self.state {
            SessionState::Releasing | SessionState::Closed | SessionState::Failed => {
                tracing::debug!(state=?self.state, "Ignoring release");
            }
            SessionState::Idle | SessionState::AwaitingReply | SessionState::Granted => {
                self.renewal.cancel();
                if let Some(table) = self.table.take() {
                    self.actions.push_back(SessionAction::RemoveRoute { table });
                }
                self.send(Command::Release, now);
            }
        }
    }

    /// Handles a reply from the server.
    ///
    /// Replies that do not answer the outstanding request are discarded.
    pub fn handle_response(&mut self, response: &Response, now: Instant) {
        let Some(outstanding) = &self.outstanding else {
            tracing::debug!(seq=response.seq, state=?self.state, "Discarding unsolicited reply");
            return;
        };
        if !response.matches(outstanding) {
            tracing::debug!(
                seq=response.seq,
                expected=outstanding.seq,
                command=%response.command,
                "Discarding mismatched reply"
            );
            return;
        }

        match (self.state, response.status) {
            (SessionState::Releasing, Status::Ok) => self.close(true),
            (_, status) if status.is_transient() => {
                tracing::debug!(seq=response.seq, %status, "Server failed transiently, retrying");
            }
            (SessionState::Releasing, status) => {
                tracing::warn!(%status, "Server rejected release");
                self.close(false);
            }
            (SessionState::AwaitingReply, Status::Ok) => self.granted(response, now),
            (SessionState::AwaitingReply, status) => self.fail(SessionError::Rejected(status)),
            (state, _) => tracing::debug!(?state, "Discarding reply"),
        }
    }

    /// Fires the timers whose deadline has passed at `now`.
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.renewal.fire(now) {
            tracing::debug!(key=%self.key, "Renewing lease");
            self.send(Command::Request, now);
        }

        if self.retransmit.fire(now) {
            self.failures += 1;
            let (limit, releasing) = match self.state {
                SessionState::Releasing => (self.config.max_release_failures, true),
                _ => (self.config.max_failures, false),
            };

            if self.failures >= limit {
                if releasing {
                    tracing::warn!(failures=self.failures, "No reply to release, giving up");
                    self.close(false);
                } else {
                    self.fail(SessionError::NoReply(self.failures));
                }
                return;
            }

            if let Some(request) = &self.outstanding {
                tracing::debug!(seq=request.seq, failures=self.failures, "Retransmitting");
                self.actions
                    .push_back(SessionAction::Transmit(request.clone()));
                self.retransmit.arm(now, self.config.retransmit_interval);
            }
        }
    }

    /// Returns the next action for the driver.
    pub fn poll_action(&mut self) -> Option<SessionAction> {
        self.actions.pop_front()
    }

    /// Returns the earliest armed deadline.
    pub fn poll_timeout(&self) -> Option<Instant> {
        match (self.retransmit.deadline(), self.renewal.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn send(&mut self, command: Command, now: Instant) {
        self.seq = self.seq.wrapping_add(1);
        let request = Request::new(self.seq, command, &self.key);
        self.failures = 0;
        self.state = match command {
            Command::Request => SessionState::AwaitingReply,
            Command::Release => SessionState::Releasing,
        };
        self.actions
            .push_back(SessionAction::Transmit(request.clone()));
        self.outstanding = Some(request);
        self.retransmit.arm(now, self.config.retransmit_interval);
    }

    fn granted(&mut self, response: &Response, now: Instant) {
        let (Some(table), Some(lease_secs)) = (response.table, response.lease_secs) else {
            tracing::warn!(seq=response.seq, "Discarding grant without table or lease");
            return;
        };

        self.retransmit.cancel();
        self.outstanding = None;
        self.failures = 0;
        self.state = SessionState::Granted;

        match self.table.replace(table) {
            Some(old) if old == table => {}
            Some(old) => {
                tracing::warn!(old, table, "Server moved the lease to another table");
                self.actions
                    .push_back(SessionAction::RemoveRoute { table: old });
                self.actions.push_back(SessionAction::InstallRoute { table });
            }
            None => self.actions.push_back(SessionAction::InstallRoute { table }),
        }

        let lease = Duration::from_secs(lease_secs);
        let delay = self.config.renewal_delay(lease);
        self.lease = Some(lease);
        self.renewal.arm(now, delay);
        tracing::debug!(table, lease_secs, renew_in=?delay, "Lease granted");
    }

    fn fail(&mut self, err: SessionError) {
        tracing::warn!(key=%self.key, error=%err, "Lease session failed");
        self.retransmit.cancel();
        self.renewal.cancel();
        self.outstanding = None;
        if let Some(table) = self.table.take() {
            self.actions.push_back(SessionAction::RemoveRoute { table });
        }
        self.state = SessionState::Failed;
        self.actions.push_back(SessionAction::Failed(err));
    }

    fn close(&mut self, released: bool) {
        self.retransmit.cancel();
        self.renewal.cancel();
        self.outstanding = None;
        self.state = SessionState::Closed;
        self.actions.push_back(SessionAction::Closed { released });
    }
}
