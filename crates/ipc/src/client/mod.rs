mod tcp_client;

pub use tcp_client::{DEFAULT_ADDR, TcpClient};
