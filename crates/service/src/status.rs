use std::env;
use std::time::Duration;

use core_types::EmbeddingKind;
use embedding_store::StoreStats;
use ipc::{MetricsSnapshot, StatusResponse};

/// Build a StatusResponse from the loaded store shape and runtime counters.
pub fn make_status_response(
    id: uuid::Uuid,
    mode: EmbeddingKind,
    stats: StoreStats,
    uptime: Duration,
    metrics: Option<MetricsSnapshot>,
) -> StatusResponse {
    StatusResponse {
        id,
        mode,
        entities: stats.entities as u64,
        entity_dim: stats.entity_dim as u32,
        relations: stats.relations as u64,
        relation_dim: stats.relation_dim as u32,
        uptime_secs: uptime.as_secs(),
        served_by: Some(host_label()),
        metrics: Some(metrics.unwrap_or_default()),
    }
}

fn host_label() -> String {
    env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "kgsearchd".into())
}
