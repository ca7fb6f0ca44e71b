//! kgsearchd support library: tracing bootstrap, metrics, the request
//! handler, and the TCP server.

pub mod bootstrap;
mod logging;
pub mod metrics;
pub mod search_handler;
pub mod server;
pub mod status;

pub use logging::{init_tracing, init_tracing_with_config};
pub use metrics::{ServiceMetrics, init_metrics_from_config};
pub use search_handler::{EmbeddingSearchHandler, SearchHandler};
pub use server::{ServerHandle, start_tcp_server};
