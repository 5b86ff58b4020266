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
//! Drives a [LeaseSession] over UDP.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::SystemTime,
};

use table_allocator_proto::{
    Command, EncodeError, LeaseKey, MAX_MESSAGE_SIZE, Request, Response, error::FieldTooLong,
};
use thiserror::Error;
use tokio::{net::UdpSocket, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    route::RouteInstaller,
    session::{LeaseSession, SessionAction, SessionConfig, SessionError, SessionState},
};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The lease key cannot be sent.
    #[error("invalid lease key: {0}")]
    InvalidKey(#[from] FieldTooLong),
    /// The session failed.
    #[error("lease session failed: {0}")]
    Session(#[from] SessionError),
    /// A request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[from] EncodeError),
    /// Socket setup failed.
    #[error("i/o error {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOutcome {
    /// `true` if the server confirmed the release.
    pub released: bool,
    /// The last table leased during the session.
    pub table: Option<u32>,
}

/// Table allocator client.
pub struct LeaseClient {
    server: SocketAddr,
    key: LeaseKey,
    config: SessionConfig,
    installer: Arc<dyn RouteInstaller>,
}

impl LeaseClient {
    /// Creates a client leasing a table for `key` from `server`.
    ///
    /// Fails if requests for `key` cannot be sent.
    pub fn new(
        server: SocketAddr,
        key: LeaseKey,
        config: SessionConfig,
        installer: Arc<dyn RouteInstaller>,
    ) -> Result<Self, ClientError> {
        let request = Request::new(0, Command::Request, &key);
        request.validate()?;
        // Escaping can grow a key past the datagram size even if every field fits.
        request.encode()?;
        Ok(Self {
            server,
            key,
            config,
            installer,
        })
    }

    /// Leases a table and keeps renewing it until `cancel` is cancelled, then releases it.
    ///
    /// Returns an error if the server rejects the request or stops answering.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ClientOutcome, ClientError> {
        let mut session = LeaseSession::new(self.key.clone(), self.config, rand::random());
        session.request(Instant::now());
        self.drive(session, Some(cancel)).await
    }

    /// Releases the table leased for the key without requesting one first.
    pub async fn release_only(&self) -> Result<ClientOutcome, ClientError> {
        let mut session = LeaseSession::new(self.key.clone(), self.config, rand::random());
        session.release(Instant::now());
        self.drive(session, None).await
    }

    async fn connect(&self) -> std::io::Result<UdpSocket> {
        let bind_addr = match self.server {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.server).await?;
        Ok(socket)
    }

    async fn drive(
        &self,
        mut session: LeaseSession,
        cancel: Option<CancellationToken>,
    ) -> Result<ClientOutcome, ClientError> {
        let socket = self.connect().await?;
        let mut release_requested = cancel.is_none();
        let cancel = cancel.unwrap_or_default();
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let mut last_table = None;

        loop {
            while let Some(action) = session.poll_action() {
                match action {
                    SessionAction::Transmit(request) => {
                        let raw = request.encode()?;
                        if let Err(e) = socket.send(&raw).await {
                            tracing::warn!(error=%e, seq=request.seq, "Failed to send request");
                        }
                    }
                    SessionAction::InstallRoute { table } => {
                        last_table = Some(table);
                        if let Err(e) = self.installer.install(table, &self.key).await {
                            tracing::error!(error=%e, table, "Failed to install route");
                        }
                    }
                    SessionAction::RemoveRoute { table } => {
                        if let Err(e) = self.installer.remove(table, &self.key).await {
                            tracing::error!(error=%e, table, "Failed to remove route");
                        }
                    }
                    SessionAction::Failed(e) => return Err(e.into()),
                    SessionAction::Closed { released } => {
                        tracing::info!(key=%self.key, released, "Lease session closed");
                        return Ok(ClientOutcome {
                            released,
                            table: last_table,
                        });
                    }
                }
            }

            let deadline = session.poll_timeout();
            tokio::select! {
                _ = cancel.cancelled(), if !release_requested => {
                    release_requested = true;
                    tracing::info!(key=%self.key, "Releasing lease");
                    session.release(Instant::now());
                }
                _ = sleep_until(deadline) => session.handle_timeout(Instant::now()),
                received = socket.recv(&mut buf) => {
                    match received {
                        Ok(size) => self.handle_datagram(&mut session, &buf[..size]),
                        // Connected sockets report ICMP errors, e.g. while the server is down.
                        Err(e) => tracing::debug!(error=%e, "Failed to receive reply"),
                    }
                }
            }
        }
    }

    fn handle_datagram(&self, session: &mut LeaseSession, buf: &[u8]) {
        let response = match Response::decode(buf) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error=%e, "Dropping malformed reply");
                return;
            }
        };

        let before = session.state();
        session.handle_response(&response, Instant::now());
        if before == SessionState::AwaitingReply && session.state() == SessionState::Granted {
            if let (Some(table), Some(lease)) = (session.table(), session.lease()) {
                tracing::info!(
                    key=%self.key,
                    table,
                    expires=%chrono::DateTime::<chrono::Utc>::from(SystemTime::now() + lease).to_rfc3339(),
                    "Table leased"
                );
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
