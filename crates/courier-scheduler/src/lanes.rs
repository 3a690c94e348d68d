//! Queue lanes: named partitions with their own concurrency budget.
//!
//! One-shot emails go through `immediate`, which gets the larger budget so a
//! burst of slow scheduled webhooks never delays transactional mail.

use std::str::FromStr;

use courier_core::config::QueueConfig;
use courier_core::error::CourierError;

/// Scheduling lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// One-shot tasks: larger concurrency.
    Immediate,
    /// Scheduled (cron) tasks.
    Default,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Immediate, Lane::Default];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Immediate => "immediate",
            Lane::Default => "default",
        }
    }

    /// Max concurrent handler invocations for this lane.
    pub fn max_concurrent(&self, config: &QueueConfig) -> usize {
        let n = match self {
            Lane::Immediate => config.immediate_concurrency,
            Lane::Default => config.default_concurrency,
        };
        n.max(1)
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Lane::Immediate),
            "default" => Ok(Lane::Default),
            other => Err(CourierError::Queue(format!("unknown lane '{other}'"))),
        }
    }
}

/// Job counts for a single lane.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LaneStats {
    pub lane: String,
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
    pub archived: u64,
}
