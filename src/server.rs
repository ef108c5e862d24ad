use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::error::RelayResult;
use crate::types::GenerationRequest;
use crate::upstream::BedrockClient;
use crate::{catalog, logger, relay};

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> RelayResult<Response> {
    let client = BedrockClient::from_settings(&state.settings)?;
    let generation = Dispatcher::new(client).generate(&request).await?;
    Ok(relay::respond(request.stream, generation).await)
}

async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let models = match BedrockClient::from_settings(&state.settings) {
        Ok(client) => catalog::list_models(&client).await,
        Err(e) => {
            logger::warn(
                "server",
                &format!("Cannot query model listing, using built-in set: {}", e),
            );
            catalog::builtin_models()
        }
    };
    Json(json!({ "models": models }))
}

pub fn app(settings: Settings) -> Router {
    let cors = CorsLayer::permissive();
    let state = AppState {
        settings: Arc::new(settings),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/models", get(list_models))
        .with_state(state)
        .layer(cors)
}

/// Initialize logging and serve until the listener fails.
pub async fn serve(settings: Settings) -> std::io::Result<()> {
    let db_path = settings.log_db_path();
    if let Err(e) = logger::init(&db_path) {
        eprintln!("Logging to stderr only: {}", e);
    }

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    let addr = listener.local_addr()?;
    logger::info("server", &format!("Bedrock relay listening on http://{}", addr));
    if !settings.has_credentials() {
        logger::warn(
            "server",
            "No Bedrock credentials configured, generation requests will fail",
        );
    }

    axum::serve(listener, app(settings).into_make_service()).await
}
