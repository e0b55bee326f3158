//! The opaque task executor (§1 Non-goal: "the database queries workers
//! pretend to run"). A worker only needs an OK/NOK outcome within a bounded
//! time; this module's simulation stands in for that external collaborator,
//! grounded on `worker_main.py`'s `process_task`.

use std::time::Duration;

use federation_core::{Outcome, Task};
use rand::Rng;

/// Simulates query processing the way the original does: a named user
/// fails, anyone else succeeds, with a short artificial delay either way.
pub struct SimulatedExecutor {
    pub failing_user: String,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        SimulatedExecutor {
            failing_user: "Joao".to_string(),
        }
    }
}

impl SimulatedExecutor {
    pub async fn execute(&self, task: &Task) -> Outcome {
        if task.user == self.failing_user {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Outcome::Nok
        } else {
            let delay = Duration::from_millis(rand::thread_rng().gen_range(200..2_000));
            tokio::time::sleep(delay).await;
            Outcome::Ok
        }
    }
}
