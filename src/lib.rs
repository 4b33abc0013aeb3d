pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::ReceiverConfig;
use crate::services::assembler::Assembler;
use crate::services::chunk_store::ChunkStore;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::receive::receive_chunk,
        api::handlers::assemble::assemble_file,
        api::handlers::uploads::list_uploads,
        api::handlers::uploads::get_upload,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            models::UploadStatus,
            models::AssemblyReport,
            models::AssemblyOutcome,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "chunks", description = "Chunk reception and assembly endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ChunkStore>,
    pub assembler: Arc<Assembler>,
    pub config: ReceiverConfig,
}

impl AppState {
    pub fn new(config: ReceiverConfig) -> Self {
        let store = Arc::new(ChunkStore::new(&config));
        let assembler = Arc::new(Assembler::new(store.clone(), &config.output_root));
        Self {
            store,
            assembler,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/receive",
            post(api::handlers::receive::receive_chunk)
                .layer(DefaultBodyLimit::max(state.config.max_chunk_size)),
        )
        .route("/assemble", post(api::handlers::assemble::assemble_file))
        .route("/uploads", get(api::handlers::uploads::list_uploads))
        .route(
            "/uploads/:file_name",
            get(api::handlers::uploads::get_upload),
        )
        .layer(from_fn(
            api::middleware::request_id::request_id_middleware,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
