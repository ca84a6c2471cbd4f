pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::GatewayConfig;
use crate::services::blob_store::BlobStore;
use crate::services::executor::TaskExecutor;
use crate::services::lookup_table::LookupTable;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::storage::upload_file,
        api::handlers::storage::download_file,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::storage::UploadForm,
            api::handlers::storage::UploadResponse,
            api::handlers::storage::DownloadRequest,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "storage", description = "Content-addressed upload and download"),
        (name = "system", description = "Operational endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub executor: TaskExecutor,
    pub lookup_table: Arc<dyn LookupTable>,
    pub blob_store: Arc<dyn BlobStore>,
    pub config: Arc<GatewayConfig>,
}

pub fn create_app(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/storage",
            put(api::handlers::storage::upload_file).get(api::handlers::storage::download_file),
        )
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_file_size(),
        ))
        .layer(trace_layer)
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
