//! Shared helpers for the kgsearch CLI: config resolution, the local/remote
//! backend, and human-readable rendering of responses.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use core_types::config::{AppConfig, load_or_create_config, resolve_config_path};
use ipc::client::TcpClient;
use ipc::{Request, Response};
use service::{EmbeddingSearchHandler, SearchHandler};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Load the config if one exists; otherwise use defaults plus env overrides.
/// Unlike the daemon, the CLI never writes a default config file, and an
/// explicit `--config` path must already exist.
pub fn load_cli_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit.filter(|p| !p.exists()) {
        bail!("config file {} does not exist", path.display());
    }
    if explicit.is_some() || resolve_config_path(None).exists() {
        return load_or_create_config(explicit);
    }
    let mut cfg = AppConfig::default();
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

/// Where requests are answered: an in-process handler or a running kgsearchd.
pub enum Backend {
    Local(Arc<EmbeddingSearchHandler>),
    Remote(TcpClient),
}

impl Backend {
    pub fn local(cfg: &AppConfig) -> Result<Self> {
        let handler = service::bootstrap::build_handler(cfg).context("load artifacts locally")?;
        Ok(Backend::Local(handler))
    }

    pub fn remote(addr: impl Into<String>) -> Self {
        Backend::Remote(TcpClient::new(addr))
    }

    /// Run one request. Error responses are returned as `Ok(Response::Error)`.
    pub async fn execute(&self, req: Request) -> Result<Response> {
        match self {
            Backend::Local(handler) => Ok(handler.handle(req)),
            Backend::Remote(client) => client
                .call(req)
                .await
                .with_context(|| format!("request to kgsearchd at {}", client.addr())),
        }
    }
}

/// Human-readable rendering of a successful response.
pub fn render_human(resp: &Response) -> String {
    let mut out = String::new();
    match resp {
        Response::Neighbours(r) => {
            for group in &r.results {
                let _ = writeln!(out, "{}", style(&group.entity).bold().cyan());
                for (rank, n) in group.neighbours.iter().enumerate() {
                    let _ = writeln!(
                        out,
                        "  {:>3}. {:<24} {}",
                        rank + 1,
                        n.id,
                        style(format!("{:.4}", n.distance)).dim()
                    );
                }
            }
        }
        Response::Distance(r) => {
            let _ = writeln!(out, "{:.6}", r.distance);
        }
        Response::Vectors(r) => {
            for v in &r.vectors {
                let values: Vec<String> = v.vector.iter().map(|x| format!("{x:.6}")).collect();
                let _ = writeln!(
                    out,
                    "{} {} [{}]",
                    style(&v.entity).bold().cyan(),
                    style(format!("(dim {})", v.vector.len())).dim(),
                    values.join(", ")
                );
            }
        }
        Response::Status(s) => {
            let _ = writeln!(out, "{}", style("kgsearchd status").bold());
            let _ = writeln!(out, "  mode:       {}", s.mode);
            let _ = writeln!(out, "  entities:   {} x {}", s.entities, s.entity_dim);
            let _ = writeln!(out, "  relations:  {} x {}", s.relations, s.relation_dim);
            let _ = writeln!(out, "  uptime:     {}s", s.uptime_secs);
            if let Some(host) = &s.served_by {
                let _ = writeln!(out, "  served by:  {host}");
            }
            if let Some(m) = &s.metrics {
                let _ = writeln!(
                    out,
                    "  requests:   {} ({} errors)",
                    m.requests_total, m.errors_total
                );
                if let Some(ms) = m.mean_latency_ms {
                    let _ = writeln!(out, "  latency:    {ms:.3} ms mean");
                }
            }
        }
        Response::Metrics(m) => out.push_str(&m.text),
        Response::Error(e) => {
            let _ = writeln!(out, "{} {e}", style("error:").red().bold());
        }
    }
    out
}
