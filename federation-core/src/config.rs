//! On-disk configuration shapes, loaded by each binary's one required CLI
//! argument (§6: "path to its JSON config file"). Widened from
//! `server_lib/config.py`'s field set to the full key list in §6; the
//! scoped-out piece is a config *grammar* (layering, env overrides, schema
//! validation beyond serde's own), not the act of loading one.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::address::PeerDescriptor;
use crate::error::FederationError;
use crate::ids::{ServerId, WorkerId};

/// Heartbeat and load-balancer cadence (§6, `timing`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimingConfig {
    pub heartbeat_interval: f64,
    pub heartbeat_timeout: f64,
    pub heartbeat_retries: u32,
    pub heartbeat_retry_delay: f64,
    pub heartbeat_backoff_factor: f64,
    pub heartbeat_max_delay: f64,
    pub heartbeat_jitter_frac: f64,
    pub load_balancer_interval: f64,
}

/// Admission thresholds for the load-balancer loop (§5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadBalancingConfig {
    pub min_queue_threshold: usize,
    pub max_queue_threshold: usize,
    pub min_workers_before_sharing: usize,
    pub threshold_window: f64,
    pub threshold_min_tasks: usize,
}

/// Where, and how often, to fire-and-forget a performance report (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub supervisor_interval: f64,
    pub supervisor_info: SupervisorTarget,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupervisorTarget {
    pub ip: IpAddr,
    pub port: u16,
}

/// A master's full configuration file (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterConfig {
    pub id: ServerId,
    pub ip: IpAddr,
    pub port: u16,
    pub peers: Vec<PeerDescriptor>,
    pub timing: TimingConfig,
    pub load_balancing: LoadBalancingConfig,
    pub supervisor: SupervisorConfig,
}

impl MasterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<MasterConfig, FederationError> {
        let file = std::fs::File::open(path)?;
        let config = serde_json::from_reader(file)?;
        Ok(config)
    }
}

/// A worker's full configuration file (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub worker_id: Option<WorkerId>,
    pub home_master: PeerDescriptor,
    pub reconnect_delay: f64,
}

impl WorkerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<WorkerConfig, FederationError> {
        let file = std::fs::File::open(path)?;
        let config = serde_json::from_reader(file)?;
        Ok(config)
    }
}
