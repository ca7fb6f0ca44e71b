use std::sync::Arc;
use std::time::Instant;

use core_types::Neighbour;
use core_types::config::SearchConfig;
use embedding_store::{EmbeddingError, EmbeddingStore, ErrorClass, Result};
use indexmap::IndexMap;
use ipc::{
    DistanceResponse, EntityNeighbours, EntityVector, ErrorKind, NeighboursResponse, Request,
    Response, VectorsResponse,
};
use semantic_index::NearestNeighbourIndex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::metrics::ServiceMetrics;
use crate::status::make_status_response;

/// Trait for executing requests coming in over IPC.
pub trait SearchHandler: Send + Sync {
    fn handle(&self, req: Request) -> Response;
}

/// Serves neighbour, distance, and vector lookups from one loaded index.
///
/// Every operation targets the table the index was built over.
#[derive(Debug)]
pub struct EmbeddingSearchHandler {
    index: Arc<NearestNeighbourIndex>,
    search: SearchConfig,
    metrics: Option<Arc<ServiceMetrics>>,
    started: Instant,
}

impl EmbeddingSearchHandler {
    pub fn new(index: Arc<NearestNeighbourIndex>, search: SearchConfig) -> Self {
        Self {
            index,
            search,
            metrics: None,
            started: Instant::now(),
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<ServiceMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn index(&self) -> &Arc<NearestNeighbourIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        self.index.store()
    }

    pub fn metrics(&self) -> Option<&Arc<ServiceMetrics>> {
        self.metrics.as_ref()
    }

    /// `k` neighbours per distinct query, excluding the query itself.
    ///
    /// The index is asked for `k + 1` hits and the first must be the query;
    /// anything else is reported as [`EmbeddingError::NeighbourIntegrity`].
    pub fn neighbours<S: AsRef<str>>(
        &self,
        entities: &[S],
        k: usize,
    ) -> Result<IndexMap<String, Vec<Neighbour>>> {
        if entities.is_empty() {
            return Err(EmbeddingError::InvalidArgument(
                "at least one identifier is required".into(),
            ));
        }
        if k == 0 {
            return Err(EmbeddingError::InvalidArgument("k must be at least 1".into()));
        }
        if k > self.search.max_k {
            return Err(EmbeddingError::InvalidArgument(format!(
                "k = {k} exceeds the configured maximum {}",
                self.search.max_k
            )));
        }
        if k >= self.index.len() {
            return Err(EmbeddingError::InvalidArgument(format!(
                "k = {k} leaves no neighbours besides the query among {} {}",
                self.index.len(),
                self.index.mode()
            )));
        }

        let results = self.index.search(entities, k + 1)?;
        let mut out = IndexMap::with_capacity(entities.len());
        for (query, (ids, distances)) in entities.iter().zip(results.iter()) {
            let query = query.as_ref();
            match ids.first() {
                Some(first) if first == query => {}
                found => {
                    let found = found.cloned().unwrap_or_default();
                    error!(query, found = %found, "nearest neighbour is not the query itself");
                    return Err(EmbeddingError::NeighbourIntegrity {
                        query: query.to_string(),
                        found,
                    });
                }
            }
            if out.contains_key(query) {
                continue;
            }
            let neighbours = ids[1..]
                .iter()
                .zip(&distances[1..])
                .map(|(id, &distance)| Neighbour::new(id.as_str(), distance))
                .collect();
            out.insert(query.to_string(), neighbours);
        }
        Ok(out)
    }

    /// Entity distance, whichever table the index covers.
    pub fn distance(&self, a: &str, b: &str) -> Result<f32> {
        self.store().pairwise_entity_distance(a, b)
    }

    /// Vectors for each identifier, in request order.
    pub fn vectors<S: AsRef<str>>(&self, entities: &[S]) -> Result<Vec<(String, Vec<f32>)>> {
        if entities.is_empty() {
            return Err(EmbeddingError::InvalidArgument(
                "at least one identifier is required".into(),
            ));
        }
        let matrix = self.store().vectors_for(self.index.mode(), entities)?;
        Ok(entities
            .iter()
            .zip(matrix.iter_rows())
            .map(|(id, v)| (id.as_ref().to_string(), v.to_vec()))
            .collect())
    }

    pub fn status(&self, id: Uuid) -> ipc::StatusResponse {
        make_status_response(
            id,
            self.index.mode(),
            self.store().stats(),
            self.started.elapsed(),
            self.metrics.as_ref().map(|m| m.snapshot()),
        )
    }

    fn respond(&self, req: Request) -> Response {
        let id = req.id();
        let result = match req {
            Request::Neighbours(r) => {
                let started = Instant::now();
                self.neighbours(&r.entities, r.k as usize).map(|map| {
                    Response::Neighbours(NeighboursResponse {
                        id,
                        results: map
                            .into_iter()
                            .map(|(entity, neighbours)| EntityNeighbours { entity, neighbours })
                            .collect(),
                        took_ms: started.elapsed().as_millis().min(u32::MAX as u128) as u32,
                    })
                })
            }
            Request::Distance(r) => self
                .distance(&r.a, &r.b)
                .map(|distance| Response::Distance(DistanceResponse { id, distance })),
            Request::Vectors(r) => self.vectors(&r.entities).map(|vectors| {
                Response::Vectors(VectorsResponse {
                    id,
                    vectors: vectors
                        .into_iter()
                        .map(|(entity, vector)| EntityVector { entity, vector })
                        .collect(),
                })
            }),
            Request::Status(r) => Ok(Response::Status(self.status(r.id))),
            Request::Metrics(r) => return self.metrics_response(r.id),
        };
        result.unwrap_or_else(|err| error_response(id, &err))
    }

    fn metrics_response(&self, id: Uuid) -> Response {
        let Some(metrics) = &self.metrics else {
            return Response::Metrics(ipc::MetricsResponse {
                id,
                text: String::new(),
            });
        };
        match metrics.scrape() {
            Ok(text) => Response::Metrics(ipc::MetricsResponse { id, text }),
            Err(err) => {
                error!(error = %err, "metrics scrape failed");
                Response::error(id, ErrorKind::Internal, err.to_string())
            }
        }
    }
}

impl SearchHandler for EmbeddingSearchHandler {
    fn handle(&self, req: Request) -> Response {
        let started = Instant::now();
        let kind = req.kind();
        let resp = self.respond(req);
        if let Some(metrics) = &self.metrics {
            metrics.record_request(kind, started.elapsed(), !matches!(resp, Response::Error(_)));
        }
        resp
    }
}

pub fn error_kind(err: &EmbeddingError) -> ErrorKind {
    match err.class() {
        ErrorClass::NotFound => ErrorKind::NotFound,
        ErrorClass::BadRequest => ErrorKind::BadRequest,
        ErrorClass::Conflict => ErrorKind::Conflict,
        ErrorClass::Internal => ErrorKind::Internal,
    }
}

fn error_response(id: Uuid, err: &EmbeddingError) -> Response {
    let kind = error_kind(err);
    match kind {
        ErrorKind::NotFound | ErrorKind::BadRequest => debug!(%id, error = %err, "request rejected"),
        ErrorKind::Conflict | ErrorKind::Internal => warn!(%id, error = %err, "request failed"),
    }
    Response::error(id, kind, err.to_string())
}

/// `{a:[0,0], b:[1,0], c:[0,1], d:[5,5]}` entities and three relations.
#[cfg(test)]
pub(crate) fn scenario_handler() -> EmbeddingSearchHandler {
    use embedding_store::{EmbeddingMatrix, IdentifierMap};

    let entities =
        EmbeddingMatrix::from_rows([[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0]]).unwrap();
    let entity_ids = IdentifierMap::from_ordered(["a", "b", "c", "d"], "entities").unwrap();
    let relations =
        EmbeddingMatrix::from_rows([[1.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
            .unwrap();
    let relation_ids = IdentifierMap::from_ordered(["r1", "r2", "r3"], "relations").unwrap();
    let store =
        Arc::new(EmbeddingStore::new(entities, entity_ids, relations, relation_ids).unwrap());
    let index = NearestNeighbourIndex::build(store, "entities").unwrap();
    EmbeddingSearchHandler::new(Arc::new(index), SearchConfig::default())
}
