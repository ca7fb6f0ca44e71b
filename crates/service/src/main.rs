//! Entry point for kgsearchd.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use core_types::config::load_or_create_config;
use service::{SearchHandler, bootstrap, init_tracing_with_config};
use std::sync::Arc;
use tokio::sync::mpsc;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Knowledge-graph embedding lookup and nearest-neighbour service.
#[derive(Parser, Debug)]
#[command(name = "kgsearchd", version, about)]
struct Args {
    /// Config file (defaults to $KGSEARCH_CONFIG or config/kgsearch.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, overriding server.listen_addr.
    #[arg(long)]
    listen: Option<String>,
    /// Table to index: entities or relations.
    #[arg(long)]
    mode: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = load_or_create_config(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        cfg.server.listen_addr = listen;
    }
    if let Some(mode) = args.mode {
        cfg.index.mode = mode;
    }
    cfg.validate()?;
    let _guard = init_tracing_with_config(&cfg.logging)?;

    let handler: Arc<dyn SearchHandler> = bootstrap::build_handler(&cfg)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(async {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("ctrl-c handler failed, serving until killed: {e}");
                std::future::pending::<()>().await;
            }
            let _ = shutdown_tx.send(()).await;
        });
        bootstrap::run_app(&cfg, handler, shutdown_rx).await
    })
}
