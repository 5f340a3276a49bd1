//! HTTP API: routing, authentication and revision checks.
//!
//! | request             | body                | response                      |
//! |---------------------|---------------------|-------------------------------|
//! | `GET /list`         | none                | `{ "list": [..], "revision" }` |
//! | `POST /list`        | `{ "element": .. }` | `{ "element": .., "revision" }` |
//! | `PUT /list/{id}`    | `{ "element": .. }` | `{ "element": .., "revision" }` |
//! | `DELETE /list/{id}` | none                | `{ "element": .., "revision" }` |
//! | `PATCH /list`       | `{ "list": [..] }`  | `{ "list": [..], "revision" }` |
//!
//! POST, PUT and DELETE must carry the current revision in
//! `X-Last-Known-Revision`; anything else is answered with
//! `400 unsynchronized data`. GET and PATCH never check it.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use serde::de::DeserializeOwned;
use taskdeck_proto::wire::{ElementEnvelope, ListEnvelope, REVISION_HEADER};

use crate::store::{ListError, ListStore};

/// Shared server state.
#[derive(Debug, Default)]
pub struct ApiState {
    /// The authoritative list.
    pub store: ListStore,
    /// Expected bearer token. `None` accepts any caller.
    token: Option<String>,
}

impl ApiState {
    /// Creates state with an empty list.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            store: ListStore::new(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.token else {
            return Ok(());
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented == Some(expected.as_str()) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

/// Request failures, each mapped to a status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or wrong bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// The request could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The list rejected the mutation.
    #[error(transparent)]
    List(#[from] ListError),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::List(ListError::Unsynchronized { .. } | ListError::Duplicate(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::List(ListError::NotFound(_)) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        (status, self.to_string()).into_response()
    }
}

/// Builds the API router over `state`.
pub fn router(state: Arc<ApiState>) -> axum::Router {
    axum::Router::new()
        .route("/list", get(list).post(create).patch(replace))
        .route("/list/{id}", put(update).delete(delete))
        .with_state(state)
}

/// Starts the server with an empty list and no token.
///
/// Returns the bound address and a [`tokio::task::JoinHandle`] for the
/// server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ApiState::default())).await
}

/// Starts the server with a pre-configured [`ApiState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ApiState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "list server error");
        }
    });

    Ok((bound_addr, handle))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<ListEnvelope>, ApiError> {
    state.authorize(&headers)?;
    let (list, revision) = state.store.list();
    Ok(Json(ListEnvelope {
        list,
        revision: Some(revision),
    }))
}

async fn create(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ElementEnvelope>, ApiError> {
    state.authorize(&headers)?;
    let known = known_revision(&headers)?;
    let request: ElementEnvelope = parse(&body)?;
    let (element, revision) = state.store.create(request.element, known)?;
    Ok(Json(ElementEnvelope {
        element,
        revision: Some(revision),
    }))
}

async fn update(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ElementEnvelope>, ApiError> {
    state.authorize(&headers)?;
    let known = known_revision(&headers)?;
    let request: ElementEnvelope = parse(&body)?;
    if request.element.id != id {
        return Err(ApiError::BadRequest(format!(
            "element id {} does not match path id {id}",
            request.element.id
        )));
    }
    let (element, revision) = state.store.update(&id, request.element, known)?;
    Ok(Json(ElementEnvelope {
        element,
        revision: Some(revision),
    }))
}

async fn delete(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ElementEnvelope>, ApiError> {
    state.authorize(&headers)?;
    let known = known_revision(&headers)?;
    let (element, revision) = state.store.delete(&id, known)?;
    Ok(Json(ElementEnvelope {
        element,
        revision: Some(revision),
    }))
}

async fn replace(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ListEnvelope>, ApiError> {
    state.authorize(&headers)?;
    let request: ListEnvelope = parse(&body)?;
    let (list, revision) = state.store.replace(request.list);
    tracing::info!(count = list.len(), revision, "list replaced by client");
    Ok(Json(ListEnvelope {
        list,
        revision: Some(revision),
    }))
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn known_revision(headers: &HeaderMap) -> Result<Option<u64>, ApiError> {
    headers
        .get(REVISION_HEADER)
        .map(|v| {
            v.to_str()
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| ApiError::BadRequest(format!("invalid {REVISION_HEADER} header")))
        })
        .transpose()
}
