//! The release protocol (§4.5): both sides.
//!
//! `handle_command_release` is the owner's (S1's) inbound handler, invoked
//! by the dispatcher when a borrower announces it intends to return
//! workers. `run_release_with_backoff` is the borrower's (S2's) outbound
//! side, spawned by the load-balancer loop — grounded on
//! `_handle_release_with_backoff` in `background_tasks.py`.

use std::time::Duration;

use federation_core::{PeerDescriptor, PeerReply, ServerId, WorkerId};
use federation_net::backoff::BackoffPolicy;
use federation_net::dial::PeerClient;
use tracing::{error, info, instrument, warn};

use crate::state::{MasterState, RedirectKind, RedirectOrder};

#[instrument(skip(state), fields(borrower = %borrower_id, n = workers.len()))]
pub async fn handle_command_release(
    state: &MasterState,
    borrower_id: ServerId,
    workers: Vec<WorkerId>,
) -> PeerReply {
    let peer = state
        .peers_static
        .iter()
        .find(|p| p.id == borrower_id)
        .cloned();

    match peer {
        Some(peer) => {
            info!("registering pending-return batch from borrower");
            state
                .register_pending_return(borrower_id.clone(), peer, workers.clone())
                .await;
        }
        None => {
            warn!("command-release from an unconfigured peer; ack without tracking");
        }
    }

    PeerReply::ReleaseAck {
        server_id: state.id.clone(),
        workers,
    }
}

/// A no-op on the borrower's side: `RELEASE_COMPLETED` is purely
/// operational visibility (§4.5 step 5), so there is nothing to mutate.
#[instrument(fields(owner = %owner_id, n = workers.len()))]
pub fn handle_release_completed(owner_id: &ServerId, workers: &[WorkerId]) {
    info!("owner confirmed full batch returned");
}

/// Runs on its own task, one per in-flight release attempt (enforced by
/// [`MasterState::try_start_release_attempt`]). On success, schedules RETURN
/// redirects for the batch and marks every worker `release_notified`. Gives
/// up silently after `policy.max_attempts` (§8 scenario 6); the next
/// load-balancer tick may start a fresh attempt.
pub async fn run_release_with_backoff(
    state: &MasterState,
    client: PeerClient,
    workers: Vec<WorkerId>,
    policy: BackoffPolicy,
) {
    let owner_id = client.peer_id.clone();
    for attempt in 0..policy.max_attempts {
        if client.send_command_release(&state.id, &workers).await {
            info!(owner = %owner_id, n = workers.len(), "release acknowledged, scheduling returns");
            state.mark_release_notified(&workers).await;
            for worker_id in &workers {
                state
                    .enqueue_redirect(RedirectOrder {
                        worker_id: worker_id.clone(),
                        target: client.address,
                        kind: RedirectKind::Return,
                    })
                    .await;
            }
            state.clear_release_attempt(&owner_id).await;
            return;
        }
        warn!(owner = %owner_id, attempt, "release attempt failed");
        tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
    }
    error!(owner = %owner_id, attempts = policy.max_attempts, "release backoff exhausted, giving up for now");
    state.clear_release_attempt(&owner_id).await;
}

/// Fire-and-forget completion of the borrower's side of a finished batch
/// (§4.3 step 1's deferred notification).
pub async fn notify_release_completed(peer: &PeerDescriptor, workers: &[WorkerId], server_id: &ServerId) {
    let client = PeerClient {
        peer_id: peer.id.clone(),
        address: peer.address(),
    };
    client.send_release_completed(server_id, workers).await;
}
