use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use server_api::{create_item, delete_item, list_items, update_item, ApiContext};
use shared::{
    domain::{Item, ItemId},
    error::{ApiError, ErrorCode},
    protocol::{items_route, ItemChanges, NewItem},
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

type HttpError = (StatusCode, Json<ApiError>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; check the parent directory and its permissions"
        );
        error
    })?;
    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(items_route(), get(http_list_items).post(http_create_item))
        .route(
            "/items/:item_id",
            patch(http_update_item).delete(http_delete_item),
        )
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            error!(error = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_list_items(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Item>>, HttpError> {
    let items = list_items(&state.api).await.map_err(http_error)?;
    Ok(Json(items))
}

async fn http_create_item(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewItem>, JsonRejection>,
) -> Result<(StatusCode, Json<Item>), HttpError> {
    let Json(new_item) = body.map_err(rejected_body)?;
    let item = create_item(&state.api, new_item)
        .await
        .map_err(http_error)?;
    info!(id = %item.id, "item created");
    Ok((StatusCode::CREATED, Json(item)))
}

async fn http_update_item(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<String>,
    body: Result<Json<ItemChanges>, JsonRejection>,
) -> Result<Json<Item>, HttpError> {
    let Json(changes) = body.map_err(rejected_body)?;
    let item = update_item(&state.api, &ItemId::new(item_id), changes)
        .await
        .map_err(http_error)?;
    info!(id = %item.id, "item updated");
    Ok(Json(item))
}

async fn http_delete_item(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<String>,
) -> Result<StatusCode, HttpError> {
    let item_id = ItemId::new(item_id);
    delete_item(&state.api, &item_id)
        .await
        .map_err(http_error)?;
    info!(id = %item_id, "item deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn http_error(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

fn rejected_body(rejection: JsonRejection) -> HttpError {
    let status = match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(ApiError::new(ErrorCode::Validation, rejection.body_text())),
    )
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
