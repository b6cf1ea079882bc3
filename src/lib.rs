pub mod body;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod monitoring;
pub mod outbound;
pub mod redirect;
pub mod rewrite;
pub mod server;
pub mod tls;

pub use config::{Config, TlsMode};
pub use error::ProxyError;
pub use executor::ProxyExecutor;
pub use server::ProxyServer;
