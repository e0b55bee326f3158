//! Connection acceptance and first-message classification (§4.2).
//!
//! One task per accepted connection. Garbage lines are dropped and the
//! connection stays open (§4.1); a line that parses as JSON but fails
//! classification, or a role whose required field is absent, closes the
//! connection (§7, "protocol-malformed").

use std::net::SocketAddr;
use std::sync::Arc;

use federation_core::config::MasterConfig;
use federation_core::FirstMessage;
use federation_net::codec::{MessageStream, ReadOutcome};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, instrument, warn};

use crate::handlers::{peer_request, release, worker};
use crate::state::MasterState;

pub struct Dispatcher {
    pub state: Arc<MasterState>,
    pub config: Arc<MasterConfig>,
}

impl Dispatcher {
    /// Binds the listen socket. Split out from [`Dispatcher::run`] so `main`
    /// can observe a bind failure directly, before the process commits to
    /// waiting on a shutdown signal (§6: "non-zero on... bind failure").
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let addr = SocketAddr::new(self.config.ip, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "master listening");
        Ok(listener)
    }

    /// Accepts connections on an already-bound listener until `shutdown`
    /// fires. Matches §5's cancellation contract: closing the accept socket
    /// is how a blocked `accept()` is unblocked.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, remote_addr) = accepted?;
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.handle_connection(socket, remote_addr).await;
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("accept loop shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    #[instrument(skip(self, socket), fields(remote = %remote_addr))]
    async fn handle_connection(&self, socket: TcpStream, remote_addr: SocketAddr) {
        let mut stream = MessageStream::new(socket);

        let first = loop {
            match stream.read_message().await {
                Ok(ReadOutcome::Message(value)) => break value,
                Ok(ReadOutcome::GarbageLine) => {
                    warn!("dropped a non-JSON line");
                    continue;
                }
                Ok(ReadOutcome::Closed) => return,
                Err(err) => {
                    warn!(%err, "transport error reading first message");
                    return;
                }
            }
        };

        let classified = match FirstMessage::classify(&first) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "unclassifiable first message, closing connection");
                return;
            }
        };

        match classified {
            FirstMessage::WorkerAlive { worker_id, owner_id } => {
                let outcome = worker::handle_alive(&self.state, worker_id, owner_id, remote_addr).await;
                let reply = outcome.reply.to_value();
                if let Err(err) = stream.write_message(&reply).await {
                    warn!(%err, "failed to send worker reply");
                }
                if let Some((peer, workers)) = outcome.notify_release_completed {
                    let server_id = self.state.id.clone();
                    tokio::spawn(async move {
                        release::notify_release_completed(&peer, &workers, &server_id).await;
                    });
                }
            }
            FirstMessage::WorkerStatus {
                worker_id,
                outcome,
                ..
            } => {
                let reply = worker::handle_status(&self.state, worker_id, outcome, remote_addr).await;
                if let Err(err) = stream.write_message(&reply.to_value()).await {
                    warn!(%err, "failed to send status ack");
                }
            }
            FirstMessage::PeerHeartbeat { server_id } => {
                self.state.mark_peer_alive(server_id.clone()).await;
                let reply = federation_core::PeerReply::HeartbeatAck { server_id: self.state.id.clone() };
                if let Err(err) = stream.write_message(&reply.to_value()).await {
                    warn!(%err, "failed to send heartbeat ack");
                }
            }
            FirstMessage::PeerWorkerRequest { requestor } => {
                let reply = peer_request::handle_worker_request(&self.state, &self.config.load_balancing, requestor).await;
                if let Err(err) = stream.write_message(&reply.to_value()).await {
                    warn!(%err, "failed to send worker-request reply");
                }
            }
            FirstMessage::PeerCommandRelease { server_id, workers } => {
                let reply = release::handle_command_release(&self.state, server_id, workers).await;
                if let Err(err) = stream.write_message(&reply.to_value()).await {
                    warn!(%err, "failed to send release ack");
                }
            }
            FirstMessage::PeerReleaseCompleted { server_id, workers } => {
                release::handle_release_completed(&server_id, &workers);
            }
        }
    }
}
