//! HTTP API for the taskmate cloud server

use axum::{
    Extension, Json, Router,
    extract::{Path, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::db::{Caller, ServerDb};
use crate::account::{generate_token, hash_secret, verify_secret};
use crate::cloud::{Document, Fields, MAX_BATCH_WRITES, is_collection_path, is_document_path};
use crate::models::{BatchDeleteRequest, Credentials, ReauthRequest};
use crate::session::AuthUser;

const MIN_PASSWORD_LEN: usize = 6;

/// Application state shared across handlers
pub struct AppState {
    pub db: ServerDb,
}

impl AppState {
    pub fn new(db: ServerDb) -> Arc<Self> {
        Arc::new(Self { db })
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/auth/reauthenticate", post(reauthenticate))
        .route("/v1/auth/account", axum::routing::delete(delete_account))
        .route(
            "/v1/documents/{*path}",
            get(get_document)
                .patch(merge_document)
                .delete(delete_document),
        )
        .route("/v1/collections/{*path}", get(list_documents))
        .route("/v1/batch/delete", post(batch_delete))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/v1/auth/signup", post(sign_up))
        .route("/v1/auth/login", post(login))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint (no auth required)
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "taskmate",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Auth middleware - resolves the Bearer token to a [`Caller`]
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return ApiError::Unauthorized("Missing or invalid Authorization header").into_response();
    };

    match state.db.session_user(token) {
        Ok(Some(caller)) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Ok(None) => ApiError::Unauthorized("Invalid session token").into_response(),
        Err(err) => ApiError::Internal(err).into_response(),
    }
}

fn validate_credentials(credentials: &Credentials) -> Result<(), ApiError> {
    if !credentials.email.contains('@') {
        return Err(ApiError::BadRequest("Invalid email address".into()));
    }
    if credentials.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn open_session(state: &AppState, uid: String, email: String) -> Result<AuthUser, ApiError> {
    let token = generate_token();
    state.db.create_session(&uid, &token)?;
    Ok(AuthUser { uid, email, token })
}

async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<AuthUser>), ApiError> {
    validate_credentials(&credentials)?;

    let password_hash = hash_secret(&credentials.password)?;
    let Some(uid) = state.db.create_user(&credentials.email, &password_hash)? else {
        return Err(ApiError::Conflict(format!(
            "An account already exists for {}",
            credentials.email
        )));
    };

    tracing::info!(uid = %uid, "Account created");
    let session = open_session(&state, uid, credentials.email)?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<AuthUser>, ApiError> {
    let Some((uid, hash)) = state.db.find_user(&credentials.email)? else {
        return Err(ApiError::Unauthorized("Invalid email or password"));
    };
    if !verify_secret(&credentials.password, &hash) {
        return Err(ApiError::Unauthorized("Invalid email or password"));
    }

    tracing::info!(uid = %uid, "Login");
    Ok(Json(open_session(&state, uid, credentials.email)?))
}

async fn reauthenticate(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<ReauthRequest>,
) -> Result<StatusCode, ApiError> {
    let hash = state
        .db
        .password_hash(&caller.uid)?
        .ok_or(ApiError::Unauthorized("Unknown account"))?;

    if verify_secret(&request.password, &hash) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::Unauthorized("Re-authentication failed"))
    }
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete_user(&caller.uid)? {
        return Err(ApiError::NotFound);
    }
    tracing::info!(uid = %caller.uid, "Account deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Clone, Copy)]
enum PathKind {
    Document,
    Collection,
}

/// Paths must be well formed and live under `users/{caller uid}`.
fn authorize(caller: &Caller, path: &str, kind: PathKind) -> Result<String, ApiError> {
    let path = path.trim_matches('/');

    let well_formed = match kind {
        PathKind::Document => is_document_path(path),
        PathKind::Collection => is_collection_path(path),
    };
    if !well_formed {
        return Err(ApiError::BadRequest(format!("Malformed path `{path}`")));
    }

    let root = format!("users/{}", caller.uid);
    if path != root && !path.starts_with(&format!("{root}/")) {
        tracing::warn!(uid = %caller.uid, path, "Cross-user access denied");
        return Err(ApiError::Forbidden);
    }

    Ok(path.to_string())
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(path): Path<String>,
) -> Result<Json<Fields>, ApiError> {
    let path = authorize(&caller, &path, PathKind::Document)?;
    state
        .db
        .get_document(&path)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn merge_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(path): Path<String>,
    Json(fields): Json<Fields>,
) -> Result<StatusCode, ApiError> {
    let path = authorize(&caller, &path, PathKind::Document)?;
    state.db.merge_document(&path, fields)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(path): Path<String>,
) -> Result<StatusCode, ApiError> {
    let path = authorize(&caller, &path, PathKind::Document)?;
    state.db.delete_document(&path)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_documents(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(path): Path<String>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let path = authorize(&caller, &path, PathKind::Collection)?;
    Ok(Json(state.db.list_documents(&path)?))
}

async fn batch_delete(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<BatchDeleteRequest>,
) -> Result<StatusCode, ApiError> {
    if request.paths.len() > MAX_BATCH_WRITES {
        return Err(ApiError::BadRequest(format!(
            "Batch of {} writes exceeds the limit of {MAX_BATCH_WRITES}",
            request.paths.len()
        )));
    }

    let paths = request
        .paths
        .iter()
        .map(|path| authorize(&caller, path, PathKind::Document))
        .collect::<Result<Vec<_>, _>>()?;

    let removed = state.db.delete_documents(&paths)?;
    tracing::info!(uid = %caller.uid, requested = paths.len(), removed, "Batch delete");
    Ok(StatusCode::NO_CONTENT)
}

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(&'static str),
    Forbidden,
    NotFound,
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message.to_string()),
            Self::Forbidden => (StatusCode::FORBIDDEN, "Access denied".to_string()),
            Self::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            Self::Conflict(message) => (StatusCode::CONFLICT, message),
            Self::Internal(err) => {
                tracing::error!(error = %err, "API error");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
