use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::errors::ApiError;
use super::handlers::get_health;
use super::handlers::get_index;
use super::handlers::get_metrics;
use super::handlers::MetricsPath;
use crate::metrics::Exporter;

/// HTTP server exposing the scrape endpoint
pub struct ApiServer {
    exporter: Exporter,
    listen_addr: String,
    metrics_path: String,
}

impl ApiServer {
    pub fn new(exporter: Exporter, listen_addr: String, metrics_path: String) -> Self {
        Self {
            exporter,
            listen_addr,
            metrics_path,
        }
    }

    /// Routes served by [`ApiServer::run`].
    pub fn routes(&self) -> impl Endpoint + 'static {
        Route::new()
            .at("/", get(get_index))
            .at("/health", get(get_health))
            .at(&self.metrics_path, get(get_metrics))
            .data(self.exporter.clone())
            .data(MetricsPath(self.metrics_path.clone()))
            .with(Tracing)
    }

    /// Serve until `token` is cancelled
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, token: CancellationToken) -> Result<(), Report<ApiError>> {
        info!(
            metrics_path = %self.metrics_path,
            "Starting HTTP API server on {}", self.listen_addr
        );

        let app = self.routes();
        let listener = TcpListener::bind(&self.listen_addr);
        let server = Server::new(listener);

        tokio::select! {
            result = server.run(app) => {
                match result {
                    Ok(()) => {
                        info!("API server stopped normally");
                        Ok(())
                    }
                    Err(e) => {
                        error!("API server failed: {e}");
                        Err(Report::new(ApiError::ServerError {
                            message: format!("Server failed: {e}"),
                        }))
                    }
                }
            }
            _ = token.cancelled() => {
                info!("API server shutdown requested");
                Ok(())
            }
        }
    }
}
