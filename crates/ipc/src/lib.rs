//! IPC protocol models for kgsearch.
//!
//! Requests and responses are serialized with bincode and carried over a
//! length-prefixed TCP framing (see [`framing`]). Every request carries a
//! caller-chosen id which the server echoes back, including on errors.

use std::fmt;

use core_types::{EmbeddingKind, Neighbour};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod client;
pub mod framing;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighboursRequest {
    pub id: Uuid,
    pub entities: Vec<String>,
    pub k: u32,
}

/// Neighbours of one query, self-match already removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNeighbours {
    pub entity: String,
    pub neighbours: Vec<Neighbour>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighboursResponse {
    pub id: Uuid,
    /// One entry per distinct query, in order of first occurrence.
    pub results: Vec<EntityNeighbours>,
    pub took_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceRequest {
    pub id: Uuid,
    pub a: String,
    pub b: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceResponse {
    pub id: Uuid,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorsRequest {
    pub id: Uuid,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVector {
    pub entity: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorsResponse {
    pub id: Uuid,
    pub vectors: Vec<EntityVector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
    pub mean_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub mode: EmbeddingKind,
    pub entities: u64,
    pub entity_dim: u32,
    pub relations: u64,
    pub relation_dim: u32,
    pub uptime_secs: u64,
    pub served_by: Option<String>,
    pub metrics: Option<MetricsSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRequest {
    pub id: Uuid,
}

/// Prometheus text exposition of the service registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub id: Uuid,
    pub text: String,
}

/// Error category returned to callers; maps onto HTTP-like statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::BadRequest => "bad request",
            ErrorKind::Conflict => "internal conflict",
            ErrorKind::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Neighbours(NeighboursRequest),
    Distance(DistanceRequest),
    Vectors(VectorsRequest),
    Status(StatusRequest),
    Metrics(MetricsRequest),
}

impl Request {
    pub fn id(&self) -> Uuid {
        match self {
            Request::Neighbours(r) => r.id,
            Request::Distance(r) => r.id,
            Request::Vectors(r) => r.id,
            Request::Status(r) => r.id,
            Request::Metrics(r) => r.id,
        }
    }

    /// Stable label used for metrics and logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Request::Neighbours(_) => "neighbours",
            Request::Distance(_) => "distance",
            Request::Vectors(_) => "vectors",
            Request::Status(_) => "status",
            Request::Metrics(_) => "metrics",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Neighbours(NeighboursResponse),
    Distance(DistanceResponse),
    Vectors(VectorsResponse),
    Status(StatusResponse),
    Metrics(MetricsResponse),
    Error(ErrorResponse),
}

impl Response {
    pub fn id(&self) -> Uuid {
        match self {
            Response::Neighbours(r) => r.id,
            Response::Distance(r) => r.id,
            Response::Vectors(r) => r.id,
            Response::Status(r) => r.id,
            Response::Metrics(r) => r.id,
            Response::Error(r) => r.id,
        }
    }

    pub fn error(id: Uuid, kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            id,
            kind,
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bincode_roundtrip_neighbours() {
        let resp = Response::Neighbours(NeighboursResponse {
            id: Uuid::new_v4(),
            results: vec![EntityNeighbours {
                entity: "Q42".into(),
                neighbours: vec![Neighbour::new("Q5", 0.25), Neighbour::new("Q1", 1.5)],
            }],
            took_ms: 3,
        });

        let bytes = bincode::serialize(&resp).expect("serialize");
        let back: Response = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(back, resp);
    }

    #[test]
    fn request_id_and_kind() {
        let id = Uuid::new_v4();
        let req = Request::Distance(DistanceRequest {
            id,
            a: "a".into(),
            b: "b".into(),
        });
        assert_eq!(req.id(), id);
        assert_eq!(req.kind(), "distance");
    }

    #[test]
    fn error_response_displays_kind() {
        let resp = Response::error(Uuid::nil(), ErrorKind::Conflict, "nearest of a is b");
        let Response::Error(err) = resp else {
            panic!("expected error response");
        };
        assert_eq!(err.to_string(), "internal conflict: nearest of a is b");
    }

    #[test]
    fn status_response_roundtrip_keeps_mode() {
        let status = StatusResponse {
            id: Uuid::new_v4(),
            mode: EmbeddingKind::Relations,
            entities: 4,
            entity_dim: 2,
            relations: 3,
            relation_dim: 3,
            uptime_secs: 9,
            served_by: Some("host".into()),
            metrics: Some(MetricsSnapshot::default()),
        };
        let bytes = bincode::serialize(&Response::Status(status.clone())).unwrap();
        let back: Response = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, Response::Status(status));
    }
}
