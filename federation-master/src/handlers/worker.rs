//! The WORKER role (§4.3): a worker's ALIVE poll or STATUS report.

use std::net::SocketAddr;

use federation_core::{Outcome, PeerDescriptor, ServerId, WorkerId, WorkerReply};
use tracing::{info, instrument};

use crate::state::{MasterState, RedirectKind};

/// A release-completed notification the caller must fire-and-forget to the
/// named peer after this handler returns (keeps handlers free of dialling).
pub struct WorkerAliveOutcome {
    pub reply: WorkerReply,
    pub notify_release_completed: Option<(PeerDescriptor, Vec<WorkerId>)>,
}

#[instrument(skip(state), fields(worker = %worker_id))]
pub async fn handle_alive(
    state: &MasterState,
    worker_id: WorkerId,
    owner_id: Option<ServerId>,
    remote_addr: SocketAddr,
) -> WorkerAliveOutcome {
    state.touch_worker(&worker_id, remote_addr, owner_id).await;

    // Step 1: arrival-home check, must run before redirect-order (§4.3).
    let arrival = state.record_arrival(&worker_id).await;

    // Step 2: redirect-order check.
    if let Some(order) = state.take_redirect_order(&worker_id).await {
        state.remove_worker(&worker_id).await;
        let reply = match order.kind {
            RedirectKind::Redirect => WorkerReply::Redirect(order.target),
            RedirectKind::Return => WorkerReply::Return(order.target),
        };
        info!(target = %order.target, kind = ?order.kind, "dispatching redirect order");
        return WorkerAliveOutcome {
            reply,
            notify_release_completed: arrival.batch_completed,
        };
    }

    // Step 3: task dispatch.
    let reply = match state.pop_task().await {
        Some(task) => WorkerReply::Task(task),
        None => WorkerReply::NoTask,
    };
    WorkerAliveOutcome {
        reply,
        notify_release_completed: arrival.batch_completed,
    }
}

#[instrument(skip(state), fields(worker = %worker_id))]
pub async fn handle_status(
    state: &MasterState,
    worker_id: WorkerId,
    outcome: Outcome,
    remote_addr: SocketAddr,
) -> WorkerReply {
    state.touch_worker(&worker_id, remote_addr, None).await;
    state.record_completion().await;
    info!(?outcome, "worker reported task outcome");
    WorkerReply::StatusAck
}
