//! One-shot peer dials: connect, send one message, read one reply, close.
//!
//! Every peer exchange in the protocol is a fresh `TcpStream` (§4.6); there
//! is no persistent peer connection to keep alive. Grounded on
//! `client_actions.py`'s four `_send_*`/`_ask_*` methods, generalised from
//! bare sockets to [`crate::codec::MessageStream`].

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{instrument, warn};

use federation_core::{Address, FirstMessage, PeerReply, PeerRequest, ServerId, WorkerId};

use crate::backoff::BackoffPolicy;
use crate::codec::{CodecError, MessageStream, ReadOutcome};

#[derive(Debug, Error)]
pub enum DialError {
    #[error("connect to {0} timed out")]
    ConnectTimeout(Address),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("peer closed the connection before replying")]
    ClosedEarly,
    #[error("peer sent a line that was not valid JSON")]
    Garbage,
    #[error("peer reply did not match any known shape: {0:?}")]
    Unexpected(serde_json::Value),
}

/// One unconnected dial of 5s (§5: "Worker connect: 5s"; the same ceiling is
/// used for every peer-to-peer exchange in the original).
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

async fn dial(addr: Address) -> Result<MessageStream, DialError> {
    let socket = timeout(DIAL_TIMEOUT, TcpStream::connect(addr.to_socket_addr()))
        .await
        .map_err(|_| DialError::ConnectTimeout(addr))??;
    Ok(MessageStream::new(socket))
}

async fn exchange(addr: Address, request: &serde_json::Value) -> Result<PeerReply, DialError> {
    let mut stream = dial(addr).await?;
    stream.write_message(request).await?;
    match stream.read_message().await? {
        ReadOutcome::Message(value) => {
            PeerReply::from_value(&value).map_err(|_| DialError::Unexpected(value))
        }
        ReadOutcome::GarbageLine => Err(DialError::Garbage),
        ReadOutcome::Closed => Err(DialError::ClosedEarly),
    }
}

/// A peer's configured dial target, used by the heartbeat sender, the
/// load-balancer, and the release-backoff task.
pub struct PeerClient {
    pub peer_id: ServerId,
    pub address: Address,
}

impl PeerClient {
    /// Sends one `HEARTBEAT`, retrying with backoff on any failure, up to
    /// `retries` attempts. A peer that exhausts every retry is **not**
    /// dropped from the caller's table; it is simply reported as down for
    /// this round (§5).
    #[instrument(skip(self, policy), fields(peer = %self.peer_id))]
    pub async fn send_heartbeat(&self, server_id: &ServerId, policy: BackoffPolicy) -> bool {
        let request = PeerRequest::Heartbeat {
            server_id: server_id.clone(),
        }
        .to_value();

        for attempt in 0..policy.max_attempts {
            match exchange(self.address, &request).await {
                Ok(PeerReply::HeartbeatAck { .. }) => return true,
                Ok(other) => warn!(?other, "unexpected heartbeat reply"),
                Err(err) => warn!(attempt, %err, "heartbeat attempt failed"),
            }
            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
        }
        false
    }

    /// Asks a peer whether it has workers to loan. A bare boolean is enough
    /// here: the original never receives worker identities back from this
    /// call, only `AVAILABLE`/`UNAVAILABLE` (§4.4) — the peer initiates the
    /// actual loan asynchronously via its own admission decision.
    #[instrument(skip(self), fields(peer = %self.peer_id))]
    pub async fn ask_peer_for_workers(&self, requestor: Address) -> bool {
        let request = PeerRequest::WorkerRequest { requestor }.to_value();
        match exchange(self.address, &request).await {
            Ok(PeerReply::Available { .. }) => true,
            Ok(PeerReply::Unavailable { .. }) => false,
            Ok(other) => {
                warn!(?other, "unexpected worker-request reply");
                false
            }
            Err(err) => {
                warn!(%err, "worker request failed");
                false
            }
        }
    }

    /// Notifies the original owner that workers are about to return home.
    /// Returns whether the owner acknowledged with `RELEASE_ACK`.
    #[instrument(skip(self, workers), fields(peer = %self.peer_id, n = workers.len()))]
    pub async fn send_command_release(&self, server_id: &ServerId, workers: &[WorkerId]) -> bool {
        let request = PeerRequest::CommandRelease {
            server_id: server_id.clone(),
            workers: workers.to_vec(),
        }
        .to_value();
        match exchange(self.address, &request).await {
            Ok(PeerReply::ReleaseAck { .. }) => true,
            Ok(other) => {
                warn!(?other, "unexpected release reply");
                false
            }
            Err(err) => {
                warn!(%err, "command release failed");
                false
            }
        }
    }

    /// Fire-and-forget: tells the borrower's former owner that the release
    /// finished. A failure here is logged, not retried (§4.6).
    #[instrument(skip(self, workers), fields(peer = %self.peer_id, n = workers.len()))]
    pub async fn send_release_completed(&self, server_id: &ServerId, workers: &[WorkerId]) {
        let request = PeerRequest::ReleaseCompleted {
            server_id: server_id.clone(),
            workers: workers.to_vec(),
        }
        .to_value();
        let mut stream = match dial(self.address).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "release-completed dial failed");
                return;
            }
        };
        if let Err(err) = stream.write_message(&request).await {
            warn!(%err, "release-completed send failed");
        }
    }
}

/// Also used by the dispatcher to turn a just-classified [`FirstMessage`]
/// back into the [`PeerReply`] shape for logging symmetry.
pub fn describe(message: &FirstMessage) -> &'static str {
    match message {
        FirstMessage::WorkerAlive { .. } => "WORKER_ALIVE",
        FirstMessage::WorkerStatus { .. } => "WORKER_STATUS",
        FirstMessage::PeerHeartbeat { .. } => "PEER_HEARTBEAT",
        FirstMessage::PeerWorkerRequest { .. } => "PEER_WORKER_REQUEST",
        FirstMessage::PeerCommandRelease { .. } => "PEER_COMMAND_RELEASE",
        FirstMessage::PeerReleaseCompleted { .. } => "PEER_RELEASE_COMPLETED",
    }
}
