//! Build the store, index, and handler from config, then serve.

use std::sync::Arc;

use anyhow::{Context, Result};
use core_types::config::AppConfig;
use embedding_store::{ArtifactPaths, EmbeddingStore};
use semantic_index::NearestNeighbourIndex;
use tokio::sync::mpsc;
use tracing::info;

use crate::metrics::init_metrics_from_config;
use crate::search_handler::{EmbeddingSearchHandler, SearchHandler};
use crate::server::start_tcp_server;

/// Load artifacts and build the index named by `cfg.index.mode`.
///
/// Blocking: reads all four artifacts and must run before serving starts.
pub fn load_index(cfg: &AppConfig) -> Result<Arc<NearestNeighbourIndex>> {
    let paths = ArtifactPaths::from_config(&cfg.artifacts);
    let store = EmbeddingStore::from_artifacts(&paths).with_context(|| {
        format!(
            "load embeddings from {} and mappings from {}",
            cfg.artifacts.embeddings_dir, cfg.artifacts.mappings_dir
        )
    })?;
    let index = NearestNeighbourIndex::build(Arc::new(store), &cfg.index.mode)
        .context("build nearest-neighbour index")?;
    Ok(Arc::new(index))
}

/// Load everything and wire a handler with metrics per config.
pub fn build_handler(cfg: &AppConfig) -> Result<Arc<EmbeddingSearchHandler>> {
    let index = load_index(cfg)?;
    let metrics = init_metrics_from_config(&cfg.metrics)?;
    Ok(Arc::new(
        EmbeddingSearchHandler::new(index, cfg.search.clone()).with_metrics(metrics),
    ))
}

/// Serve `handler` on the configured address until `shutdown` fires or closes.
pub async fn run_app(
    cfg: &AppConfig,
    handler: Arc<dyn SearchHandler>,
    mut shutdown: mpsc::Receiver<()>,
) -> Result<()> {
    let server = start_tcp_server(cfg.listen_addr()?, handler, cfg.server.max_message_bytes)
        .await
        .context("start tcp server")?;
    info!(addr = %server.local_addr(), "kgsearchd listening");

    let _ = shutdown.recv().await;
    info!("shutdown requested");
    server.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedding_store::{EmbeddingMatrix, npy};
    use ipc::StatusRequest;
    use ipc::client::TcpClient;
    use std::fs;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn write_artifacts(dir: &std::path::Path) -> AppConfig {
        let entities =
            EmbeddingMatrix::from_rows([[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0]])
                .unwrap();
        let relations = EmbeddingMatrix::from_rows([[1.0f32, 0.0], [0.0, 1.0]]).unwrap();
        npy::save_f32(&dir.join("entity.npy"), &entities).unwrap();
        npy::save_f32(&dir.join("relation.npy"), &relations).unwrap();
        fs::write(dir.join("entities.tsv"), "0\ta\n1\tb\n2\tc\n3\td\n").unwrap();
        fs::write(dir.join("relations.tsv"), "0\tP31\r\n1\tP279\r\n").unwrap();

        let mut cfg = AppConfig::default();
        let dir = dir.to_string_lossy().to_string();
        cfg.artifacts.embeddings_dir.clone_from(&dir);
        cfg.artifacts.mappings_dir = dir;
        cfg.server.listen_addr = "127.0.0.1:0".into();
        cfg
    }

    #[test]
    fn loads_index_in_configured_mode() {
        let dir = tempdir().unwrap();
        let mut cfg = write_artifacts(dir.path());
        let index = load_index(&cfg).unwrap();
        assert_eq!(index.len(), 4);

        cfg.index.mode = "relations".into();
        let index = load_index(&cfg).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.search(&["P279"], 1).unwrap().ids, vec![vec!["P279"]]);

        cfg.index.mode = "edges".into();
        assert!(load_index(&cfg).is_err());
    }

    #[test]
    fn missing_artifacts_fail_startup() {
        let dir = tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.artifacts.embeddings_dir = dir.path().to_string_lossy().to_string();
        cfg.artifacts.mappings_dir = cfg.artifacts.embeddings_dir.clone();
        assert!(build_handler(&cfg).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_app_stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let cfg = write_artifacts(dir.path());
        let handler: Arc<dyn SearchHandler> = build_handler(&cfg).unwrap();
        let server = start_tcp_server(cfg.listen_addr().unwrap(), handler.clone(), 64 * 1024)
            .await
            .unwrap();
        let status = TcpClient::new(server.local_addr().to_string())
            .status(StatusRequest { id: Uuid::new_v4() })
            .await
            .unwrap();
        assert_eq!(status.entities, 4);
        server.shutdown();

        let (tx, rx) = mpsc::channel(1);
        let app = tokio::spawn({
            let cfg = cfg.clone();
            async move { run_app(&cfg, handler, rx).await }
        });
        tx.send(()).await.unwrap();
        app.await.unwrap().unwrap();
    }
}
