//! The master's mutable state, as a small set of mutex-guarded domains
//! (§9: "a single coordinator... or a small set of mutex-guarded domains").
//!
//! Everything here is snapshot-then-release: every public method takes the
//! lock, reads or mutates in-memory maps, and returns before any caller does
//! network I/O (I6). Grounded on `connection_handler.py` and
//! `background_tasks.py`, whose process-wide dicts (`worker_status`,
//! `peer_status`, `task_queue`, `redirect_queue`, `pending_returns`,
//! `pending_release_attempts`) this module collapses into one
//! `Mutex<Inner>`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use federation_core::{Address, PeerDescriptor, ServerId, Task, WorkerId};

/// A single worker's bookkeeping, keyed by `worker_uuid` (§3).
#[derive(Clone, Debug)]
pub struct WorkerRecord {
    pub last_seen: Instant,
    pub remote_addr: SocketAddr,
    /// Set once, at first registration (W1): never mutated after.
    pub owner_id: Option<ServerId>,
    pub release_notified: bool,
}

impl WorkerRecord {
    pub fn is_borrowed(&self) -> bool {
        self.owner_id.is_some()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RedirectKind {
    Redirect,
    Return,
}

#[derive(Clone, Debug)]
pub struct RedirectOrder {
    pub worker_id: WorkerId,
    pub target: Address,
    pub kind: RedirectKind,
}

/// A batch of workers this master (the owner) expects back from a borrower,
/// keyed by the borrower's id. The spec's data model calls this map "keyed
/// by owner_id"; the original source keys it by the `SERVER_UUID` on the
/// inbound `COMMAND_RELEASE` — i.e. the borrower's id, since the record
/// lives on the *owner*'s side. We key by borrower id to match the runnable
/// behaviour in `connection_handler.py`.
#[derive(Clone, Debug)]
pub struct PendingReturn {
    pub peer: PeerDescriptor,
    pub workers_pending: HashSet<WorkerId>,
    pub workers_original: Vec<WorkerId>,
    pub created_at: Instant,
}

/// The result of folding a worker's ALIVE poll into pending-returns
/// bookkeeping (§4.3 step 1).
pub struct ArrivalOutcome {
    pub batch_completed: Option<(PeerDescriptor, Vec<WorkerId>)>,
}

#[derive(Default)]
struct Inner {
    workers: HashMap<WorkerId, WorkerRecord>,
    peers: HashMap<ServerId, Instant>,
    task_queue: VecDeque<Task>,
    redirect_queue: Vec<RedirectOrder>,
    pending_returns: HashMap<ServerId, PendingReturn>,
    pending_release_attempts: HashMap<ServerId, Instant>,
    completed_task_timestamps: VecDeque<Instant>,
}

/// All mutable state for one master, behind one lock.
pub struct MasterState {
    pub id: ServerId,
    pub peers_static: Vec<PeerDescriptor>,
    inner: Mutex<Inner>,
}

impl MasterState {
    pub fn new(id: ServerId, peers_static: Vec<PeerDescriptor>) -> Self {
        MasterState {
            id,
            peers_static,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registers a worker on its first poll, honouring W1: if already
    /// present, `owner_id` is left untouched even if this poll names a
    /// different one (§3: "if the worker reconnects presenting a different
    /// owner, it is treated as a new record" — since worker records are
    /// looked up by id only, a genuinely different owner on a reconnect
    /// simply doesn't overwrite the existing one; callers that need a fresh
    /// identity must mint a new worker id).
    pub async fn touch_worker(
        &self,
        worker_id: &WorkerId,
        remote_addr: SocketAddr,
        owner_id: Option<ServerId>,
    ) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner
            .workers
            .entry(worker_id.clone())
            .and_modify(|record| record.last_seen = now)
            .or_insert_with(|| WorkerRecord {
                last_seen: now,
                remote_addr,
                owner_id,
                release_notified: false,
            });
    }

    /// §4.3 step 1: remove `worker_id` from any pending-return batch it
    /// belongs to. Must be called before `take_redirect_order` for the same
    /// poll (ordering requirement in §4.3).
    pub async fn record_arrival(&self, worker_id: &WorkerId) -> ArrivalOutcome {
        let mut inner = self.inner.lock().await;
        let mut completed_owner = None;
        for (borrower_id, batch) in inner.pending_returns.iter_mut() {
            if batch.workers_pending.remove(worker_id) && batch.workers_pending.is_empty() {
                completed_owner = Some(borrower_id.clone());
                break;
            }
        }
        let batch_completed = if let Some(borrower_id) = completed_owner {
            let batch = inner.pending_returns.remove(&borrower_id).expect("just matched");
            Some((batch.peer, batch.workers_original))
        } else {
            None
        };
        ArrivalOutcome { batch_completed }
    }

    /// §4.3 step 2: pop this worker's one pending order, if any (I1).
    pub async fn take_redirect_order(&self, worker_id: &WorkerId) -> Option<RedirectOrder> {
        let mut inner = self.inner.lock().await;
        let index = inner
            .redirect_queue
            .iter()
            .position(|order| &order.worker_id == worker_id)?;
        Some(inner.redirect_queue.remove(index))
    }

    /// Deletes a worker's record; used when it is being redirected away
    /// (§4.3: "the worker-record is deleted on this path because the worker
    /// will reappear under another master").
    pub async fn remove_worker(&self, worker_id: &WorkerId) {
        let mut inner = self.inner.lock().await;
        inner.workers.remove(worker_id);
    }

    pub async fn pop_task(&self) -> Option<Task> {
        let mut inner = self.inner.lock().await;
        inner.task_queue.pop_front()
    }

    pub async fn push_task(&self, task: Task) {
        let mut inner = self.inner.lock().await;
        inner.task_queue.push_back(task);
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.task_queue.len()
    }

    pub async fn record_completion(&self) {
        let mut inner = self.inner.lock().await;
        inner.completed_task_timestamps.push_back(Instant::now());
    }

    /// Count of completions within the trailing `window`; telemetry-only,
    /// and also the admission throughput gate in §4.4.
    pub async fn completions_in_window(&self, window: Duration) -> usize {
        let mut inner = self.inner.lock().await;
        let cutoff = Instant::now().checked_sub(window).unwrap_or_else(Instant::now);
        while matches!(inner.completed_task_timestamps.front(), Some(t) if *t < cutoff) {
            inner.completed_task_timestamps.pop_front();
        }
        inner.completed_task_timestamps.len()
    }

    pub async fn worker_count(&self) -> usize {
        self.inner.lock().await.workers.len()
    }

    /// The admission candidate: the worker with the smallest id among
    /// currently registered workers (§4.4's tie-break choice).
    pub async fn pick_any_worker(&self) -> Option<WorkerId> {
        let inner = self.inner.lock().await;
        inner.workers.keys().min().cloned()
    }

    pub async fn enqueue_redirect(&self, order: RedirectOrder) {
        let mut inner = self.inner.lock().await;
        inner.redirect_queue.push(order);
    }

    pub async fn mark_peer_alive(&self, peer_id: ServerId) {
        let mut inner = self.inner.lock().await;
        inner.peers.insert(peer_id, Instant::now());
    }

    /// Evicts peers whose `last_alive` is older than `timeout` (§4.6
    /// monitor loop).
    pub async fn evict_stale_peers(&self, timeout: Duration) -> Vec<ServerId> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let stale: Vec<ServerId> = inner
            .peers
            .iter()
            .filter(|(_, last_alive)| now.duration_since(**last_alive) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            inner.peers.remove(id);
        }
        stale
    }

    pub async fn is_peer_alive(&self, peer_id: &ServerId) -> bool {
        self.inner.lock().await.peers.contains_key(peer_id)
    }

    /// Registers `COMMAND_RELEASE(workers)` from `borrower_id` (§4.5 step 2).
    /// Idempotent per R3: re-registering the same batch simply overwrites
    /// the timestamp and does not duplicate any worker within
    /// `workers_pending`.
    pub async fn register_pending_return(
        &self,
        borrower_id: ServerId,
        peer: PeerDescriptor,
        workers: Vec<WorkerId>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.pending_returns.insert(
            borrower_id,
            PendingReturn {
                peer,
                workers_pending: workers.iter().cloned().collect(),
                workers_original: workers,
                created_at: Instant::now(),
            },
        );
    }

    /// Workers this master owns that are candidates for release, grouped
    /// by borrower, honouring `release_notified` (I3) and the
    /// `min_workers_before_sharing` floor (§4.7).
    pub async fn release_candidates(&self, min_workers_before_sharing: usize) -> HashMap<ServerId, Vec<WorkerId>> {
        let inner = self.inner.lock().await;
        let total = inner.workers.len();
        let mut by_owner: HashMap<ServerId, Vec<WorkerId>> = HashMap::new();
        for (worker_id, record) in inner.workers.iter() {
            if let Some(owner_id) = &record.owner_id {
                if !record.release_notified {
                    by_owner.entry(owner_id.clone()).or_default().push(worker_id.clone());
                }
            }
        }
        if total <= min_workers_before_sharing {
            return HashMap::new();
        }
        let headroom = total - min_workers_before_sharing;
        let mut trimmed = HashMap::new();
        let mut remaining = headroom;
        for (owner, mut workers) in by_owner {
            if remaining == 0 {
                break;
            }
            workers.truncate(remaining);
            remaining -= workers.len();
            if !workers.is_empty() {
                trimmed.insert(owner, workers);
            }
        }
        trimmed
    }

    pub async fn mark_release_notified(&self, workers: &[WorkerId]) {
        let mut inner = self.inner.lock().await;
        for worker_id in workers {
            if let Some(record) = inner.workers.get_mut(worker_id) {
                record.release_notified = true;
            }
        }
    }

    /// Guards a single in-flight release-attempt task per peer. Returns
    /// `true` if this call acquired the slot (caller should proceed and
    /// later call [`Self::clear_release_attempt`]).
    pub async fn try_start_release_attempt(&self, peer_id: &ServerId) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.pending_release_attempts.contains_key(peer_id) {
            return false;
        }
        inner.pending_release_attempts.insert(peer_id.clone(), Instant::now());
        true
    }

    pub async fn clear_release_attempt(&self, peer_id: &ServerId) {
        let mut inner = self.inner.lock().await;
        inner.pending_release_attempts.remove(peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9001)
    }

    fn peer(id: &str) -> PeerDescriptor {
        PeerDescriptor {
            id: ServerId::new(id),
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 9100,
        }
    }

    #[tokio::test]
    async fn owner_id_is_set_once_and_not_overwritten() {
        let state = MasterState::new(ServerId::new("SERVER_1"), vec![]);
        let worker = WorkerId::new("W_1");
        state.touch_worker(&worker, addr(), Some(ServerId::new("SERVER_2"))).await;
        state.touch_worker(&worker, addr(), Some(ServerId::new("SERVER_3"))).await;
        let inner = state.inner.lock().await;
        assert_eq!(
            inner.workers.get(&worker).unwrap().owner_id,
            Some(ServerId::new("SERVER_2"))
        );
    }

    #[tokio::test]
    async fn at_most_one_redirect_order_per_worker() {
        let state = MasterState::new(ServerId::new("SERVER_1"), vec![]);
        let worker = WorkerId::new("W_1");
        state
            .enqueue_redirect(RedirectOrder {
                worker_id: worker.clone(),
                target: Address::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9002),
                kind: RedirectKind::Redirect,
            })
            .await;
        let taken = state.take_redirect_order(&worker).await;
        assert!(taken.is_some());
        assert!(state.take_redirect_order(&worker).await.is_none());
    }

    #[tokio::test]
    async fn arrival_completes_batch_when_last_worker_returns() {
        let state = MasterState::new(ServerId::new("SERVER_1"), vec![]);
        state
            .register_pending_return(
                ServerId::new("SERVER_2"),
                peer("SERVER_2"),
                vec![WorkerId::new("W_1"), WorkerId::new("W_2")],
            )
            .await;
        let first = state.record_arrival(&WorkerId::new("W_1")).await;
        assert!(first.batch_completed.is_none());
        let second = state.record_arrival(&WorkerId::new("W_2")).await;
        let (returned_peer, workers) = second.batch_completed.unwrap();
        assert_eq!(returned_peer.id, ServerId::new("SERVER_2"));
        assert_eq!(workers.len(), 2);
    }

    #[tokio::test]
    async fn release_attempt_slot_is_exclusive() {
        let state = MasterState::new(ServerId::new("SERVER_1"), vec![]);
        let peer_id = ServerId::new("SERVER_2");
        assert!(state.try_start_release_attempt(&peer_id).await);
        assert!(!state.try_start_release_attempt(&peer_id).await);
        state.clear_release_attempt(&peer_id).await;
        assert!(state.try_start_release_attempt(&peer_id).await);
    }

    #[tokio::test]
    async fn release_candidates_respect_worker_floor() {
        let state = MasterState::new(ServerId::new("SERVER_1"), vec![]);
        for i in 0..3 {
            state
                .touch_worker(&WorkerId::new(format!("W_{}", i)), addr(), Some(ServerId::new("SERVER_2")))
                .await;
        }
        let candidates = state.release_candidates(2).await;
        let total: usize = candidates.values().map(Vec::len).sum();
        assert_eq!(total, 1);
    }
}
