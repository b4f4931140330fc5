use s3_rest_gateway::{
    backend::ObjectBackend,
    config::{BackendKind, Config},
    http_gateway::HttpGateway,
    logging::LoggerManager,
    memory_backend::MemoryBackend,
    s3_backend::S3Backend,
    shutdown::ShutdownCoordinator,
    Result,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging settings come from the configuration, so parse errors can only
    // go to stderr
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let logger = LoggerManager::new(config.logging.clone());
    logger.initialize()?;

    info!("Starting S3 REST gateway v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }
    config.log_summary();

    let backend: Arc<dyn ObjectBackend> = match config.server.backend {
        BackendKind::S3 => Arc::new(S3Backend::new(&config.s3)?),
        BackendKind::Memory => {
            warn!("Using in-memory backend; objects are lost on exit");
            Arc::new(MemoryBackend::new())
        }
    };

    let bind_ip: IpAddr = config.server.bind_address.parse().map_err(|e| {
        s3_rest_gateway::GatewayError::ConfigError(format!(
            "Invalid bind address '{}': {}",
            config.server.bind_address, e
        ))
    })?;
    let listen_addr = SocketAddr::new(bind_ip, config.server.port);

    let shutdown_coordinator = Arc::new(ShutdownCoordinator::new());
    let gateway = Arc::new(HttpGateway::new(&config, backend));
    let shutdown_signal = shutdown_coordinator.subscribe();

    let listener_coordinator = Arc::clone(&shutdown_coordinator);
    tokio::spawn(async move {
        if let Err(e) = listener_coordinator.listen_for_shutdown().await {
            error!("Shutdown listener failed: {}", e);
        }
    });

    info!("Startup complete");

    gateway.start(listen_addr, shutdown_signal).await?;

    info!("S3 REST gateway shutdown complete");
    Ok(())
}
