//! The control-plane REST adapter: a thin CRUD layer over
//! `mockit_core::registry::Registry` and the `DispatcherMap` this crate
//! populates at bind time (create/list/get/delete an instance; set/get/clear
//! its expectations). Bodies sent as `application/jsonmc` are run through the
//! JsonMC parser before validation; every other content type is treated as
//! plain `application/json`.

use crate::{error_response, DispatcherMap};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use mockit_core::config::{Expectation, InstanceSpec, ServerInfo};
use mockit_core::registry::Registry;
use mockit_core::{jsonmc, Error};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Shared state handed to every management-API handler.
#[derive(Clone)]
pub struct ManagementState {
    /// The instance lifecycle manager.
    pub registry: Arc<Registry>,
    /// Live dispatchers, keyed by instance id, for expectation CRUD.
    pub dispatchers: DispatcherMap,
}

/// Build the `/api/servers...` control-plane router.
pub fn router(state: ManagementState) -> Router {
    Router::new()
        .route("/api/servers", post(create_server).get(list_servers))
        .route("/api/servers/{id}", get(get_server).delete(delete_server))
        .route("/api/servers/{id}/exists", get(server_exists))
        .route(
            "/api/servers/{id}/expectations",
            post(set_expectations).get(get_expectations).delete(clear_expectations),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

const JSONMC_CONTENT_TYPE: &str = "application/jsonmc";

/// Deserialize a request body as `application/jsonmc` (JsonMC, then JSON) or
/// plain `application/json`, based on the request's `Content-Type` header.
fn decode_body<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, Error> {
    let is_jsonmc = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(JSONMC_CONTENT_TYPE));

    if is_jsonmc {
        let text = std::str::from_utf8(body).map_err(|e| Error::jsonmc(e.to_string()))?;
        jsonmc::parse_into(text)
    } else {
        serde_json::from_slice(body).map_err(Error::from)
    }
}

fn dispatcher_or_404(dispatchers: &DispatcherMap, id: &str) -> Result<Arc<mockit_core::Dispatcher>, Error> {
    dispatchers
        .read()
        .expect("dispatcher map poisoned")
        .get(id)
        .cloned()
        .ok_or_else(|| Error::not_found(id.to_string()))
}

async fn create_server(State(state): State<ManagementState>, headers: HeaderMap, body: Bytes) -> Response {
    let spec: InstanceSpec = match decode_body(&headers, &body) {
        Ok(spec) => spec,
        Err(e) => return error_response(&e),
    };
    match state.registry.create(spec).await {
        Ok(info) => (StatusCode::CREATED, Json(info)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn list_servers(State(state): State<ManagementState>) -> Json<Vec<ServerInfo>> {
    Json(state.registry.list().await)
}

async fn get_server(State(state): State<ManagementState>, Path(id): Path<String>) -> Response {
    match state.registry.get(&id).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn delete_server(State(state): State<ManagementState>, Path(id): Path<String>) -> Response {
    match state.registry.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn server_exists(State(state): State<ManagementState>, Path(id): Path<String>) -> Json<bool> {
    Json(state.registry.exists(&id).await)
}

async fn set_expectations(
    State(state): State<ManagementState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let expectations: Vec<Expectation> = match decode_body(&headers, &body) {
        Ok(e) => e,
        Err(e) => return error_response(&e),
    };

    let dispatcher = match dispatcher_or_404(&state.dispatchers, &id) {
        Ok(d) => d,
        Err(e) => return error_response(&e),
    };
    let count = expectations.len();
    dispatcher.set_expectations(expectations).await;

    match state.registry.set_expectation_count(&id, count).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_expectations(State(state): State<ManagementState>, Path(id): Path<String>) -> Response {
    match dispatcher_or_404(&state.dispatchers, &id) {
        Ok(dispatcher) => Json(dispatcher.expectations().await.as_ref().clone()).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn clear_expectations(State(state): State<ManagementState>, Path(id): Path<String>) -> Response {
    let dispatcher = match dispatcher_or_404(&state.dispatchers, &id) {
        Ok(d) => d,
        Err(e) => return error_response(&e),
    };
    dispatcher.set_expectations(Vec::new()).await;
    match state.registry.set_expectation_count(&id, 0).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}
