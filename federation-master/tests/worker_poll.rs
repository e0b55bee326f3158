//! End-to-end: a real `TcpListener` on `127.0.0.1:0`, a hand-rolled client
//! playing the worker's side of one poll exchange.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use federation_core::config::{LoadBalancingConfig, MasterConfig, SupervisorConfig, SupervisorTarget, TimingConfig};
use federation_core::{Address, PeerReply, ServerId, Task, WorkerId, WorkerReply, WorkerRequest};
use federation_master::{Dispatcher, MasterState};
use federation_net::codec::{MessageStream, ReadOutcome};
use tokio::net::TcpStream;

fn test_config(port: u16) -> MasterConfig {
    MasterConfig {
        id: ServerId::new("SERVER_1"),
        ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        port,
        peers: vec![],
        timing: TimingConfig {
            heartbeat_interval: 5.0,
            heartbeat_timeout: 15.0,
            heartbeat_retries: 3,
            heartbeat_retry_delay: 1.0,
            heartbeat_backoff_factor: 2.0,
            heartbeat_max_delay: 10.0,
            heartbeat_jitter_frac: 0.0,
            load_balancer_interval: 5.0,
        },
        load_balancing: LoadBalancingConfig {
            min_queue_threshold: 5,
            max_queue_threshold: 20,
            min_workers_before_sharing: 2,
            threshold_window: 60.0,
            threshold_min_tasks: 0,
        },
        supervisor: SupervisorConfig {
            supervisor_interval: 3600.0,
            supervisor_info: SupervisorTarget {
                ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
                port: 1,
            },
        },
    }
}

async fn read_reply(stream: &mut MessageStream) -> serde_json::Value {
    match stream.read_message().await.unwrap() {
        ReadOutcome::Message(value) => value,
        _ => panic!("expected a message"),
    }
}

#[tokio::test]
async fn worker_poll_receives_no_task_then_a_queued_task() {
    let config = Arc::new(test_config(0));
    let state = Arc::new(MasterState::new(config.id.clone(), config.peers.clone()));
    let dispatcher = Arc::new(Dispatcher {
        state: Arc::clone(&state),
        config: Arc::clone(&config),
    });
    let listener = dispatcher.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(Arc::clone(&dispatcher).run(listener, rx));

    // First poll: empty queue, expect NO_TASK.
    let socket = TcpStream::connect(addr).await.unwrap();
    let mut stream = MessageStream::new(socket);
    let alive = WorkerRequest::Alive {
        worker_id: WorkerId::new("W_1"),
        owner_id: None,
    };
    stream.write_message(&alive.to_value()).await.unwrap();
    let reply = WorkerReply::from_value(&read_reply(&mut stream).await).unwrap();
    assert_eq!(reply, WorkerReply::NoTask);

    // Push a task directly into the queue, then poll again on a fresh connection.
    state.push_task(Task::query("Arthur")).await;
    let socket = TcpStream::connect(addr).await.unwrap();
    let mut stream = MessageStream::new(socket);
    stream.write_message(&alive.to_value()).await.unwrap();
    let reply = WorkerReply::from_value(&read_reply(&mut stream).await).unwrap();
    assert_eq!(reply, WorkerReply::Task(Task::query("Arthur")));
}

#[tokio::test]
async fn peer_worker_request_is_denied_below_the_sharing_floor() {
    let config = Arc::new(test_config(0));
    let state = Arc::new(MasterState::new(config.id.clone(), config.peers.clone()));
    let dispatcher = Arc::new(Dispatcher {
        state: Arc::clone(&state),
        config: Arc::clone(&config),
    });
    let listener = dispatcher.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(Arc::clone(&dispatcher).run(listener, rx));

    let socket = TcpStream::connect(addr).await.unwrap();
    let mut stream = MessageStream::new(socket);
    let request = federation_core::PeerRequest::WorkerRequest {
        requestor: Address::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9200),
    };
    stream.write_message(&request.to_value()).await.unwrap();
    let reply = PeerReply::from_value(&read_reply(&mut stream).await).unwrap();
    assert_eq!(
        reply,
        PeerReply::Unavailable {
            server_id: ServerId::new("SERVER_1")
        }
    );
}

#[tokio::test]
async fn garbage_line_is_dropped_and_the_heartbeat_after_it_is_processed() {
    let config = Arc::new(test_config(0));
    let state = Arc::new(MasterState::new(config.id.clone(), config.peers.clone()));
    let dispatcher = Arc::new(Dispatcher {
        state: Arc::clone(&state),
        config: Arc::clone(&config),
    });
    let listener = dispatcher.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(Arc::clone(&dispatcher).run(listener, rx));

    let socket = TcpStream::connect(addr).await.unwrap();
    let mut raw = tokio::io::BufWriter::new(socket);
    use tokio::io::AsyncWriteExt;
    raw.write_all(b"not-json\n").await.unwrap();
    raw.write_all(b"{\"TASK\":\"HEARTBEAT\",\"SERVER_UUID\":\"SERVER_2\"}\n")
        .await
        .unwrap();
    raw.flush().await.unwrap();
    let socket = raw.into_inner();
    let mut stream = MessageStream::new(socket);
    let reply = PeerReply::from_value(&read_reply(&mut stream).await).unwrap();
    assert_eq!(
        reply,
        PeerReply::HeartbeatAck {
            server_id: ServerId::new("SERVER_1")
        }
    );
}
