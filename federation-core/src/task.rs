//! Task payloads carried over the wire between a master and its workers.
//!
//! The database queries workers pretend to run are out of scope (§1); a
//! [`Task`] is an opaque `{task_type, user}` pair and an [`Outcome`] is just
//! OK/NOK.

use serde::{Deserialize, Serialize};

/// A unit of work sitting in a master's task queue.
///
/// Mirrors `new_task_payload` in the original: `{"TASK": task_type, "USER": user}`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "TASK")]
    pub task_type: String,
    #[serde(rename = "USER")]
    pub user: String,
}

impl Task {
    pub fn query(user: impl Into<String>) -> Self {
        Task {
            task_type: "QUERY".to_string(),
            user: user.into(),
        }
    }
}

/// The result of running a [`Task`], as reported by a worker's STATUS message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Ok,
    Nok,
}

impl Outcome {
    pub fn as_status_str(self) -> &'static str {
        match self {
            Outcome::Ok => "OK",
            Outcome::Nok => "NOK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_serializes_with_wire_keys() {
        let task = Task::query("Arthur");
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["TASK"], "QUERY");
        assert_eq!(value["USER"], "Arthur");
    }

    #[test]
    fn outcome_status_strings_match_wire_vocabulary() {
        assert_eq!(Outcome::Ok.as_status_str(), "OK");
        assert_eq!(Outcome::Nok.as_status_str(), "NOK");
    }
}
