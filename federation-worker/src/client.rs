//! The worker client state machine (§4.8): AT_HOME / BORROWED, one-shot
//! connections, REDIRECT/RETURN handling, fallback-to-home on a dead
//! temporary master. Grounded on `connection_loop.py`, adapted from its
//! long-lived-connection shape to the spec-mandated one-exchange-per-poll
//! model (Open Question 4).

use std::time::Duration;

use federation_core::{Address, PeerDescriptor, ServerId, WorkerId, WorkerReply};
use federation_net::codec::{MessageStream, ReadOutcome};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::executor::SimulatedExecutor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle delay after a `NO_TASK` reply (§4.8: "~5s on NO_TASK").
const NO_TASK_DELAY: Duration = Duration::from_secs(5);
/// Delay between finishing a task and the next poll (§4.8: "~1s").
const POST_TASK_DELAY: Duration = Duration::from_secs(1);
/// Delay right after a state transition (§4.8: "~2s after a state transition").
const TRANSITION_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug)]
enum PollError {
    Connect,
    Transport,
    Protocol,
}

pub struct WorkerClient {
    pub worker_id: WorkerId,
    pub home: PeerDescriptor,
    pub current_master: Address,
    pub reconnect_delay: Duration,
    executor: SimulatedExecutor,
}

impl WorkerClient {
    pub fn new(worker_id: WorkerId, home: PeerDescriptor, reconnect_delay: Duration) -> Self {
        let current_master = home.address();
        WorkerClient {
            worker_id,
            home,
            current_master,
            reconnect_delay,
            executor: SimulatedExecutor::default(),
        }
    }

    fn is_at_home(&self) -> bool {
        self.current_master == self.home.address()
    }

    /// Runs forever: one connect-poll-process cycle per iteration.
    pub async fn run(&mut self) {
        loop {
            match self.poll_once().await {
                Ok(delay) => {
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {
                    let was_at_home = self.is_at_home();
                    if !was_at_home {
                        warn!(temporary = %self.current_master, "temporary master unreachable, falling back home");
                        self.current_master = self.home.address();
                        tokio::time::sleep(self.reconnect_delay).await;
                    } else {
                        warn!(home = %self.current_master, delay = ?self.reconnect_delay, "home master unreachable, retrying");
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                }
            }
        }
    }

    /// One connect, present, react, close cycle. Returns the idle delay to
    /// sleep before the next cycle on success.
    #[instrument(skip(self), fields(worker = %self.worker_id, master = %self.current_master))]
    async fn poll_once(&mut self) -> Result<Duration, PollError> {
        let owner_id: Option<ServerId> = if self.is_at_home() {
            None
        } else {
            Some(self.home.id.clone())
        };

        let socket = timeout(CONNECT_TIMEOUT, TcpStream::connect(self.current_master.to_socket_addr()))
            .await
            .map_err(|_| PollError::Connect)?
            .map_err(|_| PollError::Connect)?;
        let mut stream = MessageStream::new(socket);

        let alive = federation_core::WorkerRequest::Alive {
            worker_id: self.worker_id.clone(),
            owner_id,
        };
        stream
            .write_message(&alive.to_value())
            .await
            .map_err(|_| PollError::Transport)?;

        let reply = loop {
            match stream.read_message().await.map_err(|_| PollError::Transport)? {
                ReadOutcome::Message(value) => break value,
                ReadOutcome::GarbageLine => continue,
                ReadOutcome::Closed => return Err(PollError::Transport),
            }
        };

        let reply = WorkerReply::from_value(&reply).map_err(|_| PollError::Protocol)?;
        match reply {
            WorkerReply::NoTask => {
                info!("no task available");
                Ok(NO_TASK_DELAY)
            }
            WorkerReply::Redirect(target) => {
                info!(%target, "redirected to a temporary master");
                self.current_master = target;
                Ok(TRANSITION_DELAY)
            }
            WorkerReply::Return(target) => {
                info!(%target, "returning home");
                self.current_master = target;
                Ok(TRANSITION_DELAY)
            }
            WorkerReply::Task(task) => {
                let outcome = self.executor.execute(&task).await;
                self.report_status(task.task_type, outcome).await?;
                Ok(POST_TASK_DELAY)
            }
            WorkerReply::StatusAck => Ok(POST_TASK_DELAY),
        }
    }

    async fn report_status(
        &self,
        task_type: String,
        outcome: federation_core::Outcome,
    ) -> Result<(), PollError> {
        let socket = timeout(CONNECT_TIMEOUT, TcpStream::connect(self.current_master.to_socket_addr()))
            .await
            .map_err(|_| PollError::Connect)?
            .map_err(|_| PollError::Connect)?;
        let mut stream = MessageStream::new(socket);

        let status = federation_core::WorkerRequest::Status {
            worker_id: self.worker_id.clone(),
            outcome,
            task_type,
        };
        stream
            .write_message(&status.to_value())
            .await
            .map_err(|_| PollError::Transport)?;

        match stream.read_message().await.map_err(|_| PollError::Transport)? {
            ReadOutcome::Message(_) => Ok(()),
            ReadOutcome::GarbageLine => Ok(()),
            ReadOutcome::Closed => Err(PollError::Transport),
        }
    }
}
