//! Deployment CRUD endpoints.
//!
//! Create and update publish the resulting record. Delete publishes the
//! removed record with status `deleted`; deleting an absent ID succeeds
//! without publishing anything.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::error::RecordError;
use crate::model::{Deployment, DeploymentInput};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/deployments", get(list).post(create))
        .route(
            "/deployments/:id",
            get(fetch).put(update).delete(remove),
        )
}

fn parse_id(raw: &str) -> Result<i64, RecordError> {
    raw.parse()
        .map_err(|_| RecordError::InvalidId(raw.to_string()))
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<Deployment>>, RecordError> {
    Ok(Json(state.store.list()?))
}

async fn create(
    State(state): State<AppState>,
    body: Result<Json<DeploymentInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Deployment>), RecordError> {
    let Json(input) = body?;
    let deployment = state.store.create(input)?;

    tracing::info!(id = deployment.id, name = %deployment.name, version = %deployment.version, "deployment created");
    state.publisher.publish(&deployment);
    Ok((StatusCode::CREATED, Json(deployment)))
}

async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>, RecordError> {
    let id = parse_id(&id)?;
    state
        .store
        .get(id)?
        .map(Json)
        .ok_or(RecordError::NotFound(id))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<DeploymentInput>, JsonRejection>,
) -> Result<Json<Deployment>, RecordError> {
    let id = parse_id(&id)?;
    let Json(input) = body?;
    let deployment = state.store.update(id, input)?.ok_or(RecordError::NotFound(id))?;

    tracing::info!(id, status = %deployment.status, "deployment updated");
    state.publisher.publish(&deployment);
    Ok(Json(deployment))
}

async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, RecordError> {
    let id = parse_id(&id)?;
    if let Some(removed) = state.store.delete(id)? {
        tracing::info!(id, "deployment deleted");
        state.publisher.publish(&removed.into_deleted());
    }
    Ok(StatusCode::NO_CONTENT)
}
