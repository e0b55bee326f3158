//! The wire message tagged union.
//!
//! The original implementation classifies an incoming JSON object by "which
//! keys are present" rather than by a single discriminant field (see
//! `connection_handler.py`'s `if/elif` chain over `data`). We keep that
//! classification *behaviour* — first match wins over a fixed list of shapes
//! — but replace the duck-typing with an explicit tagged union: a connection
//! is classified exactly once into a [`FirstMessage`], and every other
//! message shape is a concrete, named struct with hand-written (de)serialize
//! logic rather than a derive, because the same JSON key (`TASK`, `RESPONSE`)
//! carries different meanings across shapes.

use serde_json::{json, Value};
use thiserror::Error;

use crate::address::Address;
use crate::ids::{ServerId, WorkerId};
use crate::task::{Outcome, Task};

/// A message that parsed as JSON but matched none of the known first-message
/// shapes, or was missing a field required by its role.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("first message did not match any known shape: {0}")]
    UnknownShape(Value),
    #[error("message missing required field `{field}` for role {role}")]
    MissingField { role: &'static str, field: &'static str },
}

/// The result of classifying the first message on a freshly accepted
/// connection (§4.2). Each variant is single-exchange: the dispatcher reads
/// this, hands it to the matching handler, and the handler sends at most one
/// reply before closing the connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FirstMessage {
    /// `{"WORKER": "ALIVE", "WORKER_UUID": ..., "OWNER_UUID": ...?}`
    WorkerAlive {
        worker_id: WorkerId,
        owner_id: Option<ServerId>,
    },
    /// `{"STATUS": "OK"|"NOK", "TASK": ..., "WORKER_UUID": ...}`
    WorkerStatus {
        worker_id: WorkerId,
        outcome: Outcome,
        task_type: Option<String>,
    },
    /// `{"SERVER_UUID": ..., "TASK": "HEARTBEAT"}`
    PeerHeartbeat { server_id: ServerId },
    /// `{"TASK": "WORKER_REQUEST", "REQUESTOR_INFO": {ip, port}}`
    PeerWorkerRequest { requestor: Address },
    /// `{"SERVER_UUID": ..., "TASK": "COMMAND_RELEASE", "WORKERS_UUID": [...]}`
    PeerCommandRelease {
        server_id: ServerId,
        workers: Vec<WorkerId>,
    },
    /// `{"SERVER_UUID": ..., "RESPONSE": "RELEASE_COMPLETED", "WORKERS_UUID": [...]}`
    PeerReleaseCompleted {
        server_id: ServerId,
        workers: Vec<WorkerId>,
    },
}

impl FirstMessage {
    /// Classifies a parsed JSON value against the table in §4.2, first match
    /// wins.
    pub fn classify(value: &Value) -> Result<FirstMessage, ClassifyError> {
        let has_worker_intent = value.get("WORKER").is_some() || value.get("STATUS").is_some();
        if has_worker_intent && value.get("WORKER_UUID").is_some() {
            return classify_worker(value);
        }

        if value.get("TASK").and_then(Value::as_str) == Some("HEARTBEAT")
            && value.get("SERVER_UUID").is_some()
        {
            let server_id = required_server_id(value, "PEER_HEARTBEAT")?;
            return Ok(FirstMessage::PeerHeartbeat { server_id });
        }

        if value.get("TASK").and_then(Value::as_str) == Some("WORKER_REQUEST") {
            let requestor = value
                .get("REQUESTOR_INFO")
                .ok_or(ClassifyError::MissingField {
                    role: "PEER_WORKER_REQUEST",
                    field: "REQUESTOR_INFO",
                })?;
            let requestor: Address =
                serde_json::from_value(requestor.clone()).map_err(|_| ClassifyError::MissingField {
                    role: "PEER_WORKER_REQUEST",
                    field: "REQUESTOR_INFO",
                })?;
            return Ok(FirstMessage::PeerWorkerRequest { requestor });
        }

        if value.get("TASK").and_then(Value::as_str) == Some("COMMAND_RELEASE")
            && value.get("SERVER_UUID").is_some()
        {
            let server_id = required_server_id(value, "PEER_COMMAND_RELEASE")?;
            let workers = required_worker_list(value, "PEER_COMMAND_RELEASE")?;
            return Ok(FirstMessage::PeerCommandRelease { server_id, workers });
        }

        if value.get("RESPONSE").and_then(Value::as_str) == Some("RELEASE_COMPLETED") {
            let server_id = required_server_id(value, "PEER_RELEASE_COMPLETED")?;
            let workers = value
                .get("WORKERS_UUID")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|s| WorkerId::new(s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            return Ok(FirstMessage::PeerReleaseCompleted { server_id, workers });
        }

        Err(ClassifyError::UnknownShape(value.clone()))
    }
}

fn classify_worker(value: &Value) -> Result<FirstMessage, ClassifyError> {
    let worker_id = value
        .get("WORKER_UUID")
        .and_then(Value::as_str)
        .map(|s| WorkerId::new(s.to_string()))
        .ok_or(ClassifyError::MissingField {
            role: "WORKER",
            field: "WORKER_UUID",
        })?;

    if value.get("WORKER").and_then(Value::as_str) == Some("ALIVE") {
        let owner_id = value
            .get("OWNER_UUID")
            .and_then(Value::as_str)
            .map(|s| ServerId::new(s.to_string()));
        return Ok(FirstMessage::WorkerAlive { worker_id, owner_id });
    }

    if let Some(status) = value.get("STATUS").and_then(Value::as_str) {
        let outcome = match status {
            "OK" => Outcome::Ok,
            "NOK" => Outcome::Nok,
            other => {
                return Err(ClassifyError::MissingField {
                    role: "WORKER",
                    field: if other.is_empty() { "STATUS" } else { "STATUS(OK|NOK)" },
                })
            }
        };
        let task_type = value
            .get("TASK")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(FirstMessage::WorkerStatus {
            worker_id,
            outcome,
            task_type,
        });
    }

    Err(ClassifyError::UnknownShape(value.clone()))
}

fn required_server_id(value: &Value, role: &'static str) -> Result<ServerId, ClassifyError> {
    value
        .get("SERVER_UUID")
        .and_then(Value::as_str)
        .map(|s| ServerId::new(s.to_string()))
        .ok_or(ClassifyError::MissingField {
            role,
            field: "SERVER_UUID",
        })
}

fn required_worker_list(value: &Value, role: &'static str) -> Result<Vec<WorkerId>, ClassifyError> {
    value
        .get("WORKERS_UUID")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| WorkerId::new(s.to_string()))
                .collect()
        })
        .ok_or(ClassifyError::MissingField {
            role,
            field: "WORKERS_UUID",
        })
}

fn worker_list_json(workers: &[WorkerId]) -> Value {
    Value::Array(
        workers
            .iter()
            .map(|w| Value::String(w.as_str().to_string()))
            .collect(),
    )
}

/// A master's reply to a worker poll (§4.3), or the message a worker parses
/// after sending one.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerReply {
    Task(Task),
    NoTask,
    Redirect(Address),
    Return(Address),
    StatusAck,
}

impl WorkerReply {
    pub fn to_value(&self) -> Value {
        match self {
            WorkerReply::Task(task) => serde_json::to_value(task).expect("Task always serializes"),
            WorkerReply::NoTask => json!({ "TASK": "NO_TASK" }),
            WorkerReply::Redirect(target) => json!({
                "TASK": "REDIRECT",
                "SERVER_REDIRECT": target,
            }),
            WorkerReply::Return(target) => json!({
                "TASK": "RETURN",
                "SERVER_RETURN": target,
            }),
            WorkerReply::StatusAck => json!({ "STATUS": "ACK" }),
        }
    }

    pub fn from_value(value: &Value) -> Result<WorkerReply, ClassifyError> {
        if value.get("STATUS").and_then(Value::as_str) == Some("ACK") {
            return Ok(WorkerReply::StatusAck);
        }
        match value.get("TASK").and_then(Value::as_str) {
            Some("NO_TASK") => Ok(WorkerReply::NoTask),
            Some("REDIRECT") => {
                let target = value
                    .get("SERVER_REDIRECT")
                    .ok_or(ClassifyError::MissingField {
                        role: "REDIRECT",
                        field: "SERVER_REDIRECT",
                    })?;
                let target = serde_json::from_value(target.clone()).map_err(|_| {
                    ClassifyError::MissingField {
                        role: "REDIRECT",
                        field: "SERVER_REDIRECT",
                    }
                })?;
                Ok(WorkerReply::Redirect(target))
            }
            Some("RETURN") => {
                let target = value
                    .get("SERVER_RETURN")
                    .ok_or(ClassifyError::MissingField {
                        role: "RETURN",
                        field: "SERVER_RETURN",
                    })?;
                let target = serde_json::from_value(target.clone()).map_err(|_| {
                    ClassifyError::MissingField {
                        role: "RETURN",
                        field: "SERVER_RETURN",
                    }
                })?;
                Ok(WorkerReply::Return(target))
            }
            Some("QUERY") | None if value.get("USER").is_some() => {
                let task: Task = serde_json::from_value(value.clone()).map_err(|_| {
                    ClassifyError::MissingField {
                        role: "QUERY",
                        field: "USER",
                    }
                })?;
                Ok(WorkerReply::Task(task))
            }
            _ => Err(ClassifyError::UnknownShape(value.clone())),
        }
    }
}

/// A message a master sends to, or receives from, a peer master (§4.5/§4.6).
/// Covers both the initiator's request and the responder's reply; direction
/// is clear from context at each call site.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerReply {
    HeartbeatAck { server_id: ServerId },
    Available { server_id: ServerId, workers: Vec<WorkerId> },
    Unavailable { server_id: ServerId },
    ReleaseAck { server_id: ServerId, workers: Vec<WorkerId> },
}

impl PeerReply {
    pub fn to_value(&self) -> Value {
        match self {
            PeerReply::HeartbeatAck { server_id } => json!({
                "SERVER_UUID": server_id,
                "TASK": "HEARTBEAT",
                "RESPONSE": "ALIVE",
            }),
            PeerReply::Available { server_id, workers } => json!({
                "SERVER_UUID": server_id,
                "RESPONSE": "AVAILABLE",
                "WORKERS_UUID": worker_list_json(workers),
            }),
            PeerReply::Unavailable { server_id } => json!({
                "SERVER_UUID": server_id,
                "RESPONSE": "UNAVAILABLE",
            }),
            PeerReply::ReleaseAck { server_id, workers } => json!({
                "SERVER_UUID": server_id,
                "RESPONSE": "RELEASE_ACK",
                "WORKERS_UUID": worker_list_json(workers),
            }),
        }
    }

    pub fn from_value(value: &Value) -> Result<PeerReply, ClassifyError> {
        let server_id = required_server_id(value, "PEER_REPLY")?;
        match value.get("RESPONSE").and_then(Value::as_str) {
            Some("ALIVE") => Ok(PeerReply::HeartbeatAck { server_id }),
            Some("AVAILABLE") => {
                let workers = required_worker_list(value, "PEER_REPLY").unwrap_or_default();
                Ok(PeerReply::Available { server_id, workers })
            }
            Some("UNAVAILABLE") => Ok(PeerReply::Unavailable { server_id }),
            Some("RELEASE_ACK") => {
                let workers = required_worker_list(value, "PEER_REPLY")?;
                Ok(PeerReply::ReleaseAck { server_id, workers })
            }
            _ => Err(ClassifyError::UnknownShape(value.clone())),
        }
    }
}

/// A peer-initiated request: the messages `federation-net::dial` sends out.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerRequest {
    Heartbeat { server_id: ServerId },
    WorkerRequest { requestor: Address },
    CommandRelease { server_id: ServerId, workers: Vec<WorkerId> },
    ReleaseCompleted { server_id: ServerId, workers: Vec<WorkerId> },
}

impl PeerRequest {
    pub fn to_value(&self) -> Value {
        match self {
            PeerRequest::Heartbeat { server_id } => json!({
                "SERVER_UUID": server_id,
                "TASK": "HEARTBEAT",
            }),
            PeerRequest::WorkerRequest { requestor } => json!({
                "TASK": "WORKER_REQUEST",
                "REQUESTOR_INFO": requestor,
            }),
            PeerRequest::CommandRelease { server_id, workers } => json!({
                "SERVER_UUID": server_id,
                "TASK": "COMMAND_RELEASE",
                "WORKERS_UUID": worker_list_json(workers),
            }),
            PeerRequest::ReleaseCompleted { server_id, workers } => json!({
                "SERVER_UUID": server_id,
                "RESPONSE": "RELEASE_COMPLETED",
                "WORKERS_UUID": worker_list_json(workers),
            }),
        }
    }
}

/// A worker's outbound poll or status report: what `federation-worker`
/// sends, and what the master's `classify` reads back as a [`FirstMessage`].
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerRequest {
    Alive {
        worker_id: WorkerId,
        owner_id: Option<ServerId>,
    },
    Status {
        worker_id: WorkerId,
        outcome: Outcome,
        task_type: String,
    },
}

impl WorkerRequest {
    pub fn to_value(&self) -> Value {
        match self {
            WorkerRequest::Alive { worker_id, owner_id } => {
                let mut value = json!({
                    "WORKER": "ALIVE",
                    "WORKER_UUID": worker_id,
                });
                if let Some(owner_id) = owner_id {
                    value["OWNER_UUID"] = json!(owner_id);
                }
                value
            }
            WorkerRequest::Status {
                worker_id,
                outcome,
                task_type,
            } => json!({
                "STATUS": outcome.as_status_str(),
                "TASK": task_type,
                "WORKER_UUID": worker_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> Address {
        Address::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn classifies_worker_alive_home() {
        let value = WorkerRequest::Alive {
            worker_id: WorkerId::new("W_1"),
            owner_id: None,
        }
        .to_value();
        let classified = FirstMessage::classify(&value).unwrap();
        assert_eq!(
            classified,
            FirstMessage::WorkerAlive {
                worker_id: WorkerId::new("W_1"),
                owner_id: None,
            }
        );
    }

    #[test]
    fn classifies_worker_alive_borrowed() {
        let value = WorkerRequest::Alive {
            worker_id: WorkerId::new("W_1"),
            owner_id: Some(ServerId::new("SERVER_2")),
        }
        .to_value();
        let classified = FirstMessage::classify(&value).unwrap();
        assert_eq!(
            classified,
            FirstMessage::WorkerAlive {
                worker_id: WorkerId::new("W_1"),
                owner_id: Some(ServerId::new("SERVER_2")),
            }
        );
    }

    #[test]
    fn classifies_worker_status() {
        let value = WorkerRequest::Status {
            worker_id: WorkerId::new("W_1"),
            outcome: Outcome::Ok,
            task_type: "QUERY".to_string(),
        }
        .to_value();
        let classified = FirstMessage::classify(&value).unwrap();
        assert_eq!(
            classified,
            FirstMessage::WorkerStatus {
                worker_id: WorkerId::new("W_1"),
                outcome: Outcome::Ok,
                task_type: Some("QUERY".to_string()),
            }
        );
    }

    #[test]
    fn classifies_peer_heartbeat() {
        let value = PeerRequest::Heartbeat {
            server_id: ServerId::new("SERVER_1"),
        }
        .to_value();
        let classified = FirstMessage::classify(&value).unwrap();
        assert_eq!(
            classified,
            FirstMessage::PeerHeartbeat {
                server_id: ServerId::new("SERVER_1"),
            }
        );
    }

    #[test]
    fn classifies_peer_worker_request() {
        let value = PeerRequest::WorkerRequest { requestor: addr(9001) }.to_value();
        let classified = FirstMessage::classify(&value).unwrap();
        assert_eq!(
            classified,
            FirstMessage::PeerWorkerRequest { requestor: addr(9001) }
        );
    }

    #[test]
    fn classifies_command_release() {
        let value = PeerRequest::CommandRelease {
            server_id: ServerId::new("SERVER_2"),
            workers: vec![WorkerId::new("W_1"), WorkerId::new("W_2")],
        }
        .to_value();
        let classified = FirstMessage::classify(&value).unwrap();
        assert_eq!(
            classified,
            FirstMessage::PeerCommandRelease {
                server_id: ServerId::new("SERVER_2"),
                workers: vec![WorkerId::new("W_1"), WorkerId::new("W_2")],
            }
        );
    }

    #[test]
    fn classifies_release_completed() {
        let value = PeerRequest::ReleaseCompleted {
            server_id: ServerId::new("SERVER_1"),
            workers: vec![WorkerId::new("W_1")],
        }
        .to_value();
        let classified = FirstMessage::classify(&value).unwrap();
        assert_eq!(
            classified,
            FirstMessage::PeerReleaseCompleted {
                server_id: ServerId::new("SERVER_1"),
                workers: vec![WorkerId::new("W_1")],
            }
        );
    }

    #[test]
    fn unknown_shape_is_rejected() {
        let value = json!({ "HELLO": "WORLD" });
        assert!(FirstMessage::classify(&value).is_err());
    }

    #[test]
    fn worker_reply_round_trips() {
        for reply in [
            WorkerReply::NoTask,
            WorkerReply::StatusAck,
            WorkerReply::Redirect(addr(9002)),
            WorkerReply::Return(addr(9001)),
            WorkerReply::Task(Task::query("Arthur")),
        ] {
            let value = reply.to_value();
            let parsed = WorkerReply::from_value(&value).unwrap();
            assert_eq!(parsed, reply);
        }
    }

    #[test]
    fn peer_reply_round_trips() {
        for reply in [
            PeerReply::HeartbeatAck {
                server_id: ServerId::new("SERVER_1"),
            },
            PeerReply::Unavailable {
                server_id: ServerId::new("SERVER_1"),
            },
            PeerReply::Available {
                server_id: ServerId::new("SERVER_1"),
                workers: vec![WorkerId::new("W_1")],
            },
            PeerReply::ReleaseAck {
                server_id: ServerId::new("SERVER_1"),
                workers: vec![WorkerId::new("W_1"), WorkerId::new("W_2")],
            },
        ] {
            let value = reply.to_value();
            let parsed = PeerReply::from_value(&value).unwrap();
            assert_eq!(parsed, reply);
        }
    }
}
