use axum::{
    Extension, Json, Router,
    extract::{Multipart, Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::aggregate::{self, AggregateBucket};
use crate::codec::Codec;
use crate::documents::{DocumentStore, DocumentView, StoreError};
use crate::parse::Row;
use crate::rooms::RoomRegistry;
use crate::session;

pub struct AppState {
    pub store: DocumentStore,
    pub registry: Arc<RoomRegistry>,
}

/// Caller identity, supplied by the fronting proxy
///
/// Authentication itself happens upstream; this layer trusts the
/// `x-user-id` header (and `x-admin` for elevated callers) the same way the
/// rest of the product does.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: String,
    pub admin: bool,
}

impl Identity {
    pub fn from_headers(headers: &HeaderMap) -> Option<Identity> {
        let user = headers.get("x-user-id")?.to_str().ok()?.trim().to_string();
        if user.is_empty() {
            return None;
        }
        let admin = headers
            .get("x-admin")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Some(Identity { user, admin })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => ApiError::Validation(msg),
            StoreError::Parse(e) => ApiError::Validation(e.to_string()),
            StoreError::NotFound => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Internal(msg) => {
                log::error!("internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct UploadResponse {
    id: String,
    columns: Vec<String>,
    preview: Vec<Row>,
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct CascadeResponse {
    removed: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    file_type_agg: Vec<AggregateBucket>,
    week_agg: Vec<AggregateBucket>,
    project_agg: Vec<AggregateBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agg: Option<Vec<AggregateBucket>>,
}

pub async fn run(addr: &str, data_dir: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::open(data_dir, Codec::from_env())?;
    let state = Arc::new(AppState {
        store,
        registry: Arc::new(RoomRegistry::new()),
    });

    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    log::info!("listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/upload", post(upload))
        .route("/documents/recent", get(recent_documents))
        .route("/documents/:id", get(get_document).delete(delete_document))
        .route(
            "/projects/:project/documents",
            get(project_documents).delete(delete_project_documents),
        )
        .route("/stats", get(stats))
        .route_layer(middleware::from_fn(require_identity));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(session::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Identity middleware
///
/// Rejects requests without a caller identity and makes the identity
/// available to handlers through request extensions.
pub async fn require_identity(mut request: Request, next: Next) -> Response {
    let Some(identity) = Identity::from_headers(request.headers()) else {
        return (StatusCode::UNAUTHORIZED, "missing x-user-id header").into_response();
    };
    request.extensions_mut().insert(identity);
    next.run(request).await
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut filename = String::new();
    let mut data = Vec::new();
    let mut project = None;

    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        let field_name = field.name().unwrap_or("").to_string();

        if field_name == "file" {
            filename = field.file_name().unwrap_or("upload").to_string();
            data = field.bytes().await.unwrap_or_default().to_vec();
        } else if field_name == "project" {
            project = field.text().await.ok().filter(|p| !p.is_empty());
        }
    }

    if data.is_empty() {
        return Err(ApiError::Validation("no file data received".to_string()));
    }

    let view = state.store.ingest(&filename, &data, &identity.user, project)?;
    log::info!("user {} uploaded {} ({})", identity.user, view.filename, view.id);

    Ok(Json(UploadResponse {
        id: view.id,
        columns: view.columns,
        preview: view.preview,
    }))
}

async fn recent_documents(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<DocumentView>>, ApiError> {
    let limit = query.limit.unwrap_or(5);
    Ok(Json(state.store.list_recent(&identity.user, limit)?))
}

async fn project_documents(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<Vec<DocumentView>>, ApiError> {
    Ok(Json(state.store.list_by_project(&project)?))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, ApiError> {
    Ok(Json(state.store.get(&id, &identity.user)?))
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&id, &identity.user)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_project_documents(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<CascadeResponse>, ApiError> {
    let removed = state.store.delete_by_project(&project)?;
    log::info!("cascade removed {removed} documents from project {project}");
    Ok(Json(CascadeResponse { removed }))
}

async fn stats(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<StatsResponse>, ApiError> {
    let scope = state.store.load_for_user(&identity.user)?;
    let user_agg = if identity.admin {
        Some(aggregate::by_user(&state.store.load_all()?))
    } else {
        None
    };

    Ok(Json(StatsResponse {
        file_type_agg: aggregate::by_file_type(&scope),
        week_agg: aggregate::by_week(&scope),
        project_agg: aggregate::by_project(&scope),
        user_agg,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).expect("header name"),
                value.parse().expect("header value"),
            );
        }
        map
    }

    #[test]
    fn identity_requires_a_user_header() {
        assert!(Identity::from_headers(&headers(&[])).is_none());
        assert!(Identity::from_headers(&headers(&[("x-user-id", "  ")])).is_none());

        let identity =
            Identity::from_headers(&headers(&[("x-user-id", "alice")])).expect("identity");
        assert_eq!(identity.user, "alice");
        assert!(!identity.admin);
    }

    #[test]
    fn admin_flag_comes_from_the_admin_header() {
        let admin = Identity::from_headers(&headers(&[("x-user-id", "root"), ("x-admin", "true")]))
            .expect("identity");
        assert!(admin.admin);

        let not_admin =
            Identity::from_headers(&headers(&[("x-user-id", "root"), ("x-admin", "nope")]))
                .expect("identity");
        assert!(!not_admin.admin);
    }

    #[test]
    fn store_errors_map_to_api_errors() {
        assert!(matches!(
            ApiError::from(StoreError::NotFound),
            ApiError::NotFound
        ));
        assert!(matches!(
            ApiError::from(StoreError::Validation("empty".to_string())),
            ApiError::Validation(_)
        ));
    }
}
