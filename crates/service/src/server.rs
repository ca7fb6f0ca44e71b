use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use ipc::{ErrorKind, Request, Response, framing};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::search_handler::SearchHandler;

/// A running listener; dropping it leaves the accept loop running.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. In-flight connections finish on their own.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Start a Tokio TCP server that spawns a task per connection.
pub async fn start_tcp_server(
    addr: SocketAddr,
    handler: Arc<dyn SearchHandler>,
    max_message_bytes: usize,
) -> Result<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        loop {
            let (conn, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("tcp accept failed: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    continue;
                }
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(conn, handler, max_message_bytes).await {
                    tracing::warn!(%peer, "connection error: {e:?}");
                }
            });
        }
    });

    Ok(ServerHandle { local_addr, task })
}

async fn handle_connection(
    mut conn: TcpStream,
    handler: Arc<dyn SearchHandler>,
    max_message_bytes: usize,
) -> Result<()> {
    while let Some(payload) = framing::read_frame(&mut conn, max_message_bytes).await? {
        let handler = Arc::clone(&handler);
        let response = tokio::task::spawn_blocking(move || {
            dispatch(handler.as_ref(), &payload, max_message_bytes)
        })
        .await?;
        framing::write_frame(&mut conn, &response, max_message_bytes).await?;
    }
    Ok(())
}

/// Decode one request payload, run it, and encode the response.
pub fn dispatch(handler: &dyn SearchHandler, payload: &[u8], max_message_bytes: usize) -> Vec<u8> {
    let response = match bincode::deserialize::<Request>(payload) {
        Ok(req) => handler.handle(req),
        Err(e) => {
            tracing::debug!("undecodable request: {e}");
            Response::error(Uuid::nil(), ErrorKind::BadRequest, format!("undecodable request: {e}"))
        }
    };

    match bincode::serialize(&response) {
        Ok(bytes) if bytes.len() <= max_message_bytes => bytes,
        Ok(bytes) => encode_error(
            response.id(),
            ErrorKind::BadRequest,
            format!(
                "response of {} bytes exceeds the {max_message_bytes} byte limit; request fewer items",
                bytes.len()
            ),
        ),
        Err(e) => encode_error(response.id(), ErrorKind::Internal, e.to_string()),
    }
}

fn encode_error(id: Uuid, kind: ErrorKind, message: String) -> Vec<u8> {
    bincode::serialize(&Response::error(id, kind, message)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_handler::scenario_handler;
    use ipc::client::TcpClient;
    use ipc::{DistanceRequest, NeighboursRequest, StatusRequest, VectorsRequest};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn garbage_payload_is_a_bad_request() {
        let handler = scenario_handler();
        let bytes = dispatch(&handler, &[0xff, 0xff, 0xff, 0xff, 0xff], 1024);
        let resp: Response = bincode::deserialize(&bytes).unwrap();
        match resp {
            Response::Error(e) => {
                assert!(e.id.is_nil());
                assert_eq!(e.kind, ErrorKind::BadRequest);
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_response_is_replaced_by_error() {
        let handler = scenario_handler();
        let id = Uuid::new_v4();
        let req = Request::Vectors(VectorsRequest {
            id,
            entities: vec!["a".into(); 200],
        });
        let bytes = dispatch(&handler, &bincode::serialize(&req).unwrap(), 1024);
        let resp: Response = bincode::deserialize(&bytes).unwrap();
        assert!(matches!(resp, Response::Error(e) if e.id == id && e.kind == ErrorKind::BadRequest));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serves_requests_over_tcp() {
        let handler: Arc<dyn SearchHandler> = Arc::new(scenario_handler());
        let server = start_tcp_server("127.0.0.1:0".parse().unwrap(), handler, 64 * 1024)
            .await
            .unwrap();
        let client = TcpClient::new(server.local_addr().to_string());

        let resp = client
            .neighbours(NeighboursRequest {
                id: Uuid::new_v4(),
                entities: vec!["a".into(), "d".into()],
                k: 1,
            })
            .await
            .unwrap();
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[0].entity, "a");
        assert_eq!(resp.results[0].neighbours[0].id, "b");
        assert_eq!(resp.results[1].entity, "d");
        assert_eq!(resp.results[1].neighbours[0].id, "b");

        let dist = client
            .distance(DistanceRequest {
                id: Uuid::new_v4(),
                a: "a".into(),
                b: "c".into(),
            })
            .await
            .unwrap();
        assert_eq!(dist.distance, 1.0);

        let status = client
            .status(StatusRequest { id: Uuid::new_v4() })
            .await
            .unwrap();
        assert_eq!(status.entities, 4);
        assert_eq!(status.relations, 3);

        let err = client
            .neighbours(NeighboursRequest {
                id: Uuid::new_v4(),
                entities: vec!["missing".into()],
                k: 1,
            })
            .await
            .unwrap_err();
        let remote = err.downcast_ref::<ipc::ErrorResponse>().unwrap();
        assert_eq!(remote.kind, ErrorKind::NotFound);

        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn several_frames_on_one_connection() {
        let handler: Arc<dyn SearchHandler> = Arc::new(scenario_handler());
        let server = start_tcp_server("127.0.0.1:0".parse().unwrap(), handler, 64 * 1024)
            .await
            .unwrap();
        let mut conn = TcpStream::connect(server.local_addr()).await.unwrap();

        for id in [Uuid::new_v4(), Uuid::new_v4()] {
            let req = bincode::serialize(&Request::Status(StatusRequest { id })).unwrap();
            conn.write_all(&framing::encode_frame(&req).unwrap())
                .await
                .unwrap();
            let mut prefix = [0u8; 4];
            conn.read_exact(&mut prefix).await.unwrap();
            let mut buf = vec![0u8; u32::from_le_bytes(prefix) as usize];
            conn.read_exact(&mut buf).await.unwrap();
            let resp: Response = bincode::deserialize(&buf).unwrap();
            assert_eq!(resp.id(), id);
        }
        server.shutdown();
    }
}
