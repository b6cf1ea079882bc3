use anyhow::{Context, anyhow};
use clap::Parser;
use log::{error, info};
use proximity::config::{Config, LoggingConfig};
use proximity::diagnostics::{DiagnosticRecorder, Verbosity};
use proximity::executor::ProxyExecutor;
use proximity::logging;
use proximity::metrics::{MetricsReporter, MetricsSink, ProxyMetrics};
use proximity::monitoring::MonitoringServer;
use proximity::rewrite::RequestRewriter;
use proximity::server::ProxyServer;
use proximity::tls::TlsTransportFactory;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "HTTP(S) proxy that forwards every request to a single upstream"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address [default: 0.0.0.0:9999]")]
    listen: Option<SocketAddr>,

    #[clap(short, long, value_name = "URL", help = "Upstream URL [default: http://localhost:80]")]
    remote: Option<String>,

    #[clap(
        long,
        value_name = "FILE",
        help = "Client certificate for upstream TLS [default: cert.pem]"
    )]
    cert: Option<PathBuf>,

    #[clap(
        long,
        value_name = "FILE",
        help = "Private key for the client certificate [default: key.pem]"
    )]
    key: Option<PathBuf>,

    #[clap(long, help = "Skip upstream certificate verification")]
    no_verify: bool,

    #[clap(
        short,
        long,
        value_name = "LEVEL",
        help = "Diagnostics: 1 params, 2 headers, 3 bodies [default: 0]"
    )]
    verbosity: Option<u8>,

    #[clap(
        short,
        long,
        value_name = "SECONDS",
        help = "Interval between metrics reports [default: 60]"
    )]
    metrics_interval: Option<u64>,

    #[clap(long, value_name = "SECONDS", help = "Upstream request timeout [default: 30]")]
    timeout: Option<u64>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,

    #[clap(long, value_name = "ADDR", help = "Serve /metrics and /health on this address")]
    monitoring_addr: Option<SocketAddr>,

    #[clap(long, value_name = "LEVEL", help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<String>,

    #[clap(long, value_name = "FORMAT", help = "Log format: text or json")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        Config::default()
            .to_file(config_file)
            .map_err(|e| anyhow!("Failed to write {}: {}", config_file, e))?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let config = load_config(&args)?;
    logging::init(config.logging.as_ref().unwrap_or(&LoggingConfig::default()))
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    config.validate()?;

    let metrics = Arc::new(ProxyMetrics::new()?);
    let sink: Arc<dyn MetricsSink> = metrics.clone();

    let upstream = config.upstream()?;
    let transport = TlsTransportFactory::build(&config.tls_mode(), config.timeout())
        .context("Failed to build the upstream transport")?;
    let executor = ProxyExecutor::new(
        transport,
        RequestRewriter::from_url(&upstream)?,
        DiagnosticRecorder::with_log_sink(Verbosity::new(config.verbosity)),
        sink.clone(),
        config.timeout(),
    );

    let server = ProxyServer::bind(config.listen_addr, Arc::new(executor))
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen_addr))?;

    MetricsReporter::new(sink, config.metrics_interval()).spawn();

    if let Some(addr) = config.monitoring_addr {
        let monitoring = MonitoringServer::bind(addr, metrics.clone())
            .await
            .with_context(|| format!("Failed to start monitoring on {}", addr))?;
        tokio::spawn(async move {
            if let Err(e) = monitoring.run().await {
                error!("Monitoring server error: {}", e);
            }
        });
    }

    info!("Proxying from {} to {}", config.listen_addr, config.upstream_url);

    tokio::select! {
        result = server.serve() => {
            result.context("Proxy server stopped")?;
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

/// File values first, then any flag given on the command line.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(config_file) => {
            if !Path::new(config_file).exists() {
                return Err(anyhow!("Configuration file not found: {}", config_file));
            }
            Config::from_file(config_file)
                .map_err(|e| anyhow!("Failed to load {}: {}", config_file, e))?
        }
        None => Config::default(),
    };

    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(remote) = &args.remote {
        config.upstream_url = remote.clone();
    }
    if let Some(cert) = &args.cert {
        config.cert_file = cert.clone();
    }
    if let Some(key) = &args.key {
        config.key_file = key.clone();
    }
    if args.no_verify {
        config.skip_verify = true;
    }
    if let Some(verbosity) = args.verbosity {
        config.verbosity = verbosity;
    }
    if let Some(interval) = args.metrics_interval {
        config.metrics_interval_secs = interval;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(addr) = args.monitoring_addr {
        config.monitoring_addr = Some(addr);
    }

    if args.log_level.is_some() || args.log_format.is_some() {
        let log_config = config.logging.get_or_insert_with(LoggingConfig::default);
        if let Some(level) = &args.log_level {
            log_config.level = Some(logging::parse_log_level(level).map_err(|e| anyhow!("{}", e))?);
        }
        if let Some(format) = &args.log_format {
            let format = logging::parse_log_format(format).map_err(|e| anyhow!("{}", e))?;
            log_config.format = Some(format);
        }
    }

    Ok(config)
}
