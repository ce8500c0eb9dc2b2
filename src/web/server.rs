//! Status server using Axum.

use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::router::create_app_router;
use crate::core::serializer::UserSerializer;
use crate::error::Error;

/// Web server configuration.
pub struct WebServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            port: crate::config::DEFAULT_PORT,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Run the web server until `shutdown` resolves.
pub async fn run_server<F>(
    config: WebServerConfig,
    serializer: UserSerializer,
    shutdown: F,
) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_app_router(serializer)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Web(format!("Invalid address: {}", e)))?;

    tracing::info!("Starting status server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Status server stopped");
    Ok(())
}

/// Run the web server on `port` with default host.
pub async fn run_web_server<F>(port: u16, serializer: UserSerializer, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = WebServerConfig {
        port,
        ..Default::default()
    };

    run_server(config, serializer, shutdown).await
}
