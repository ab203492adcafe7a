//! Category-specific detail payloads
//!
//! Each category stores a differently shaped blob next to its score. The
//! payload is a tagged union so that categories evolve independently while
//! every stored row keeps a concrete schema.
//!
//! Probes may return a payload with their metrics; when they do not, the
//! engine stores the raw values as [`CategoryDetail::Generic`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Category;

/// State of one availability replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub replica: String,
    pub role: String,
    pub synchronization_state: String,
    pub healthy: bool,
    pub log_send_queue_kb: Option<f64>,
}

/// Free space of one disk volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeUsage {
    pub mount_point: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub free_percent: f64,
}

/// One entry of the top wait types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitStat {
    pub wait_type: String,
    pub wait_ms: u64,
    pub percent: f64,
}

/// A failed maintenance job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub job: String,
    pub failed_at: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum CategoryDetail {
    Availability {
        reachable: bool,
        response_ms: Option<u64>,
        uptime_secs: Option<u64>,
    },
    Backups {
        last_full: Option<DateTime<Utc>>,
        last_log: Option<DateTime<Utc>>,
        full_breached: bool,
        log_breached: bool,
    },
    Replication {
        replicas: Vec<ReplicaState>,
    },
    Cpu {
        average_percent: f64,
        peak_percent: f64,
    },
    Memory {
        used_percent: f64,
        page_life_expectancy_secs: Option<f64>,
    },
    Io {
        read_latency_ms: f64,
        write_latency_ms: f64,
    },
    Disk {
        volumes: Vec<VolumeUsage>,
    },
    Maintenance {
        failed_jobs: Vec<JobFailure>,
    },
    WaitStats {
        top_waits: Vec<WaitStat>,
    },
    Generic {
        values: BTreeMap<String, f64>,
    },
}

impl CategoryDetail {
    /// The category this payload belongs to, `None` for generic payloads
    pub fn category(&self) -> Option<Category> {
        match self {
            CategoryDetail::Availability { .. } => Some(Category::Availability),
            CategoryDetail::Backups { .. } => Some(Category::Backups),
            CategoryDetail::Replication { .. } => Some(Category::Replication),
            CategoryDetail::Cpu { .. } => Some(Category::Cpu),
            CategoryDetail::Memory { .. } => Some(Category::Memory),
            CategoryDetail::Io { .. } => Some(Category::Io),
            CategoryDetail::Disk { .. } => Some(Category::Disk),
            CategoryDetail::Maintenance { .. } => Some(Category::Maintenance),
            CategoryDetail::WaitStats { .. } => Some(Category::WaitStats),
            CategoryDetail::Generic { .. } => None,
        }
    }

    /// Whether the payload can be stored under `category`
    pub fn fits(&self, category: Category) -> bool {
        self.category().is_none_or(|own| own == category)
    }
}
