use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use cli::{Backend, load_cli_config, render_human};
use console::style;
use indicatif::ProgressBar;
use ipc::{
    DistanceRequest, MetricsRequest, NeighboursRequest, Request, Response, StatusRequest,
    VectorsRequest,
};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

/// Lookup and diagnostics client for kgsearch embeddings.
#[derive(Parser, Debug)]
#[command(name = "kgsearch-cli", version = cli::VERSION, about)]
struct Cli {
    /// Config file (defaults to $KGSEARCH_CONFIG or config/kgsearch.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Talk to a running kgsearchd instead of loading artifacts locally.
    #[arg(long, global = true, env = "KGSEARCH_REMOTE", value_name = "ADDR")]
    remote: Option<String>,
    /// Print responses as JSON.
    #[arg(long, global = true)]
    json: bool,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Nearest neighbours of each identifier, excluding itself.
    Neighbours {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Neighbours per identifier (defaults to search.default_k).
        #[arg(short)]
        k: Option<u32>,
    },
    /// Euclidean distance between two identifiers.
    Distance { a: String, b: String },
    /// Embedding vectors of the given identifiers.
    Vector {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Store shape, index mode, and request counters.
    Status,
    /// Prometheus metrics text.
    Metrics,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cfg = load_cli_config(cli.config.as_deref())?;
    let backend = match &cli.remote {
        Some(addr) => Backend::remote(addr.clone()),
        None => {
            let started = Instant::now();
            let pb = ProgressBar::new_spinner();
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message(format!(
                "Loading embeddings from {}...",
                cfg.artifacts.embeddings_dir
            ));
            let backend = Backend::local(&cfg);
            match &backend {
                Ok(_) => pb.finish_with_message(format!("Loaded in {:.2?}", started.elapsed())),
                Err(_) => pb.finish_and_clear(),
            }
            backend?
        }
    };

    let id = Uuid::new_v4();
    let req = match cli.command {
        Commands::Neighbours { ids, k } => Request::Neighbours(NeighboursRequest {
            id,
            entities: ids,
            k: k.unwrap_or(cfg.search.default_k as u32),
        }),
        Commands::Distance { a, b } => Request::Distance(DistanceRequest { id, a, b }),
        Commands::Vector { ids } => Request::Vectors(VectorsRequest { id, entities: ids }),
        Commands::Status => Request::Status(StatusRequest { id }),
        Commands::Metrics => Request::Metrics(MetricsRequest { id }),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let resp = runtime.block_on(backend.execute(req))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
    } else {
        print!("{}", render_human(&resp));
    }

    if let Response::Error(err) = resp {
        if !cli.json {
            eprintln!("{}", style(format!("request {} failed", err.id)).dim());
        }
        return Err(anyhow!(err));
    }
    Ok(())
}
