use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Html;
use poem::IntoResponse;
use poem::Response;
use prometheus::TEXT_FORMAT;
use tracing::error;

use crate::metrics::Exporter;

/// Path the metrics are served under, shared with the landing page.
#[derive(Debug, Clone)]
pub struct MetricsPath(pub String);

/// Query the scheduler and return the Prometheus text exposition
#[handler]
pub async fn get_metrics(exporter: Data<&Exporter>) -> Response {
    match exporter.scrape().await {
        Ok(body) => body
            .with_content_type(TEXT_FORMAT)
            .into_response(),
        Err(report) => {
            error!("Scrape failed: {report:?}");
            format!("{report}")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}

/// Liveness probe
#[handler]
pub fn get_health() -> &'static str {
    "ok"
}

/// Landing page linking to the metrics path
#[handler]
pub fn get_index(metrics_path: Data<&MetricsPath>) -> Html<String> {
    let MetricsPath(path) = metrics_path.0;
    Html(format!(
        "<html>\n\
         <head><title>Slurm GPU Exporter</title></head>\n\
         <body>\n\
         <h1>Slurm GPU Exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n"
    ))
}
