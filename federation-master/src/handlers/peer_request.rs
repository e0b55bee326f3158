//! The PEER_WORKER_REQUEST role (§4.4): admission policy for loaning a
//! worker to a peer.

use federation_core::{Address, PeerReply, ServerId};
use tracing::{info, instrument};

use crate::state::{MasterState, RedirectKind, RedirectOrder};
use federation_core::config::LoadBalancingConfig;

#[instrument(skip(state, config))]
pub async fn handle_worker_request(
    state: &MasterState,
    config: &LoadBalancingConfig,
    requestor: Address,
) -> PeerReply {
    let worker_count = state.worker_count().await;
    let window = std::time::Duration::from_secs_f64(config.threshold_window);
    let recent_completions = state.completions_in_window(window).await;

    // I5 / Open Question 1: strict inequality on the "keep" side.
    let admitted = worker_count > config.min_workers_before_sharing
        && recent_completions >= config.threshold_min_tasks;

    if !admitted {
        info!(worker_count, recent_completions, "worker request denied");
        return PeerReply::Unavailable {
            server_id: state.id.clone(),
        };
    }

    match state.pick_any_worker().await {
        Some(worker_id) => {
            state
                .enqueue_redirect(RedirectOrder {
                    worker_id: worker_id.clone(),
                    target: requestor,
                    kind: RedirectKind::Redirect,
                })
                .await;
            info!(%worker_id, "worker request admitted");
            PeerReply::Available {
                server_id: state.id.clone(),
                workers: vec![worker_id],
            }
        }
        None => {
            // Admitted by policy but nothing to hand over; rare race with
            // another admission draining the pool between the two checks.
            PeerReply::Unavailable {
                server_id: state.id.clone(),
            }
        }
    }
}
