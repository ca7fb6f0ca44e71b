use crate::framing::{self, MAX_MESSAGE_BYTES};
use crate::{
    DistanceRequest, DistanceResponse, MetricsRequest, MetricsResponse, NeighboursRequest,
    NeighboursResponse, Request, Response, StatusRequest, StatusResponse, VectorsRequest,
    VectorsResponse,
};
use anyhow::{Context, Result, anyhow, bail};
use tokio::net::TcpStream;
use tokio::time::{Duration, sleep};
use tracing::warn;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_TIMEOUT_MS: u64 = 750;
const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_MS: u64 = 50;

/// TCP IPC client for kgsearchd.
///
/// Each request opens a connection, writes one frame and reads one frame.
/// Transport failures and timeouts are retried with linear backoff; an
/// [`ErrorResponse`](crate::ErrorResponse) from the server is returned as-is
/// (downcastable from the `anyhow::Error`) and never retried.
#[derive(Debug, Clone)]
pub struct TcpClient {
    addr: String,
    request_timeout: Duration,
    retries: u32,
    backoff: Duration,
    max_message_bytes: usize,
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new(DEFAULT_ADDR)
    }
}

impl TcpClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: DEFAULT_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            max_message_bytes: MAX_MESSAGE_BYTES,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub async fn neighbours(&self, req: NeighboursRequest) -> Result<NeighboursResponse> {
        match self.call(Request::Neighbours(req)).await? {
            Response::Neighbours(resp) => Ok(resp),
            other => Err(unexpected("neighbours", other)),
        }
    }

    pub async fn distance(&self, req: DistanceRequest) -> Result<DistanceResponse> {
        match self.call(Request::Distance(req)).await? {
            Response::Distance(resp) => Ok(resp),
            other => Err(unexpected("distance", other)),
        }
    }

    pub async fn vectors(&self, req: VectorsRequest) -> Result<VectorsResponse> {
        match self.call(Request::Vectors(req)).await? {
            Response::Vectors(resp) => Ok(resp),
            other => Err(unexpected("vectors", other)),
        }
    }

    pub async fn status(&self, req: StatusRequest) -> Result<StatusResponse> {
        match self.call(Request::Status(req)).await? {
            Response::Status(resp) => Ok(resp),
            other => Err(unexpected("status", other)),
        }
    }

    pub async fn metrics(&self, req: MetricsRequest) -> Result<MetricsResponse> {
        match self.call(Request::Metrics(req)).await? {
            Response::Metrics(resp) => Ok(resp),
            other => Err(unexpected("metrics", other)),
        }
    }

    /// Send a request and return the raw response, error responses included.
    pub async fn call(&self, req: Request) -> Result<Response> {
        let id = req.id();
        let payload = bincode::serialize(&req)?;

        let mut attempt = 0;
        let mut last_err: Option<anyhow::Error> = None;

        while attempt <= self.retries {
            let fut = async {
                let mut conn = TcpStream::connect(&self.addr)
                    .await
                    .with_context(|| format!("connect to {}", self.addr))?;
                framing::write_frame(&mut conn, &payload, self.max_message_bytes).await?;
                let Some(buf) = framing::read_frame(&mut conn, self.max_message_bytes).await?
                else {
                    bail!("connection closed before response");
                };
                let resp: Response = bincode::deserialize(&buf)?;
                Ok(resp)
            };

            match tokio::time::timeout(self.request_timeout, fut).await {
                Ok(Ok(resp)) => {
                    if resp.id() != id && !resp.id().is_nil() {
                        bail!("response id {} does not match request {id}", resp.id());
                    }
                    return Ok(resp);
                }
                Ok(Err(e)) => {
                    warn!("tcp request attempt {} failed: {e:?}", attempt + 1);
                    last_err = Some(e);
                }
                Err(e) => {
                    warn!("tcp request attempt {} timed out: {e:?}", attempt + 1);
                    last_err = Some(e.into());
                }
            }

            attempt += 1;
            if attempt <= self.retries {
                sleep(self.backoff * attempt).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("request failed")))
    }
}

fn unexpected(expected: &str, resp: Response) -> anyhow::Error {
    match resp {
        Response::Error(err) => err.into(),
        other => anyhow!("expected {expected} response, got {other:?}"),
    }
}
