use std::{collections::HashMap, fmt};

use serde::Deserialize;

use crate::environment::Environment;

/// Deployment topology of the Puma server being observed.
///
/// The topology is fixed when the exporter starts and never changes for the life of the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Topology {
    /// A single Puma process serving requests directly.
    Single,

    /// A coordinating process supervising one or more worker processes.
    ///
    /// Each worker reports its own status, and exported values are summed across all workers.
    Clustered,
}

impl Topology {
    /// Derives the topology from Puma's configured worker count.
    ///
    /// Puma runs in cluster mode whenever at least one worker is configured.
    pub const fn from_workers(workers: u32) -> Self {
        if workers > 0 {
            Topology::Clustered
        } else {
            Topology::Single
        }
    }

    /// Derives the topology from the `WEB_CONCURRENCY` variable, which Puma uses as its default worker count.
    ///
    /// A missing or unparseable value is treated as zero workers.
    pub fn from_env(env: &dyn Environment) -> Self {
        let workers =
            env.var("WEB_CONCURRENCY").and_then(|value| value.trim().parse().ok()).unwrap_or(0);
        Self::from_workers(workers)
    }

    /// Returns `true` if this is the clustered topology.
    pub const fn is_clustered(self) -> bool {
        matches!(self, Topology::Clustered)
    }
}

/// A statistic that is reduced across workers in clustered mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatKey {
    /// Number of threads currently running.
    Running,

    /// Number of connections waiting for a thread.
    Backlog,

    /// Number of requests the thread pool can still take on.
    PoolCapacity,

    /// Maximum number of threads.
    MaxThreads,
}

impl StatKey {
    /// All keys, in export order.
    pub const ALL: [StatKey; 4] =
        [StatKey::Running, StatKey::Backlog, StatKey::PoolCapacity, StatKey::MaxThreads];

    /// Returns the key as it appears in Puma's stats document.
    pub const fn as_str(self) -> &'static str {
        match self {
            StatKey::Running => "running",
            StatKey::Backlog => "backlog",
            StatKey::PoolCapacity => "pool_capacity",
            StatKey::MaxThreads => "max_threads",
        }
    }
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status most recently reported by a single worker.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WorkerStatus {
    #[serde(default)]
    last_status: HashMap<String, i64>,
}

impl WorkerStatus {
    /// Creates a worker status from its last reported values.
    pub fn new<I, K>(last_status: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self { last_status: last_status.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }

    /// Returns the last reported value for `key`, if any.
    pub fn get(&self, key: StatKey) -> Option<i64> {
        self.last_status.get(key.as_str()).copied()
    }
}

fn default_worker_count() -> i64 {
    1
}

/// A point-in-time view of Puma's internal statistics.
///
/// Single-process servers report `running`, `backlog`, `pool_capacity` and `max_threads` directly, while clustered
/// servers report them per worker under `worker_status`. Any other fields in the document are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct StatsSnapshot {
    #[serde(default = "default_worker_count")]
    workers: i64,
    #[serde(default = "default_worker_count")]
    booted_workers: i64,
    running: Option<i64>,
    backlog: Option<i64>,
    pool_capacity: Option<i64>,
    max_threads: Option<i64>,
    #[serde(default)]
    worker_status: Vec<WorkerStatus>,
}

impl StatsSnapshot {
    /// Decodes a snapshot from the JSON document produced by Puma.
    ///
    /// # Errors
    ///
    /// If the document is not valid JSON, or a known field has the wrong shape, an error is returned.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Creates a clustered snapshot from the given worker statuses.
    pub fn clustered(workers: i64, booted_workers: i64, worker_status: Vec<WorkerStatus>) -> Self {
        Self { workers, booted_workers, worker_status, ..Self::default() }
    }

    /// Number of configured workers, defaulting to 1.
    pub fn workers(&self) -> i64 {
        self.workers
    }

    /// Number of booted workers, defaulting to 1.
    pub fn booted_workers(&self) -> i64 {
        self.booted_workers
    }

    /// Status reported by each worker, in worker order.
    pub fn worker_status(&self) -> &[WorkerStatus] {
        &self.worker_status
    }

    /// Returns the value reported directly on the snapshot for `key`, if any.
    pub fn get(&self, key: StatKey) -> Option<i64> {
        match key {
            StatKey::Running => self.running,
            StatKey::Backlog => self.backlog,
            StatKey::PoolCapacity => self.pool_capacity,
            StatKey::MaxThreads => self.max_threads,
        }
    }
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            booted_workers: default_worker_count(),
            running: None,
            backlog: None,
            pool_capacity: None,
            max_threads: None,
            worker_status: Vec::new(),
        }
    }
}

/// Reduces `key` in the snapshot to a single value according to the topology.
///
/// In single mode, the value reported directly on the snapshot is used. In clustered mode, the last reported value of
/// every worker is summed. Missing values count as zero.
pub fn aggregate(snapshot: &StatsSnapshot, topology: Topology, key: StatKey) -> i64 {
    match topology {
        Topology::Single => snapshot.get(key).unwrap_or(0),
        Topology::Clustered => {
            snapshot.worker_status().iter().map(|worker| worker.get(key).unwrap_or(0)).sum()
        }
    }
}
