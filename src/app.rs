use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Local;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::downloader;
use crate::error::TrackerError;
use crate::loader;
use crate::login::{handle_login, handle_logout, handle_signup, require_auth};
use crate::record::{NewRecord, RecordStatus};
use crate::tracker::Tracker;
use crate::user::User;

const GUIDE: &str = include_str!("./static/guide.md");

/// Directory served under `/static`, fixed at build time
const STATIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/src/static");

pub struct AppState {
    pub tracker: Tracker,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct ChassisRequest {
    chassis_no: String,
    #[serde(default)]
    confirm_override: bool,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: RecordStatus,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct DeletionRequest {
    reason: String,
}

#[derive(Deserialize)]
struct PermissionRequest {
    allowed: bool,
}

/// Translate a tracker error into a JSON error response
///
/// Internal failures are logged and reported without detail.
pub fn error_response(error: TrackerError) -> Response {
    let status = match &error {
        TrackerError::Validation(_) | TrackerError::Import(_) => StatusCode::BAD_REQUEST,
        TrackerError::Conflict(_) => StatusCode::CONFLICT,
        TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
        TrackerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        TrackerError::PendingApproval | TrackerError::Forbidden(_) => StatusCode::FORBIDDEN,
        TrackerError::Database(_) | TrackerError::Io(_) | TrackerError::Export(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        log::error!("request failed: {}", error);
        "internal error".to_string()
    } else {
        error.to_string()
    };

    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "message": message,
        })),
    )
        .into_response()
}

fn json_or_error<T: serde::Serialize>(result: Result<T, TrackerError>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => error_response(e),
    }
}

fn attachment(content_type: &'static str, filename: String, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from(body),
    )
        .into_response()
}

/// Build the application router
///
/// Everything under `/api` requires a valid session cookie.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/records", get(list_records).post(create_record))
        .route("/records/work", get(list_workable_records))
        .route("/records/export.xlsx", get(export_xlsx))
        .route("/records/export.csv", get(export_csv))
        .route("/records/import", post(import_records))
        .route("/records/:id/chassis", post(assign_chassis))
        .route("/records/:id/status", post(update_status))
        .route("/records/:id/deletion-request", post(request_deletion))
        .route("/dashboard", get(dashboard))
        .route("/admin/users", get(list_users))
        .route("/admin/users/pending", get(list_pending_users))
        .route("/admin/users/:id/approve", post(approve_user))
        .route("/admin/users/:id", delete(delete_user))
        .route("/admin/users/:id/bulk-import", post(set_bulk_import))
        .route("/admin/deletion-requests", get(list_deletion_requests))
        .route("/admin/records/:id/delete", post(approve_deletion))
        .route("/admin/records/:id/keep", post(reject_deletion))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/login", post(handle_login))
        .route("/signup", post(handle_signup))
        .route("/logout", post(handle_logout))
        .route("/guide", get(download_guide))
        .nest("/api", api)
        .nest_service("/static", ServeDir::new(STATIC_DIR))
        .with_state(state)
}

/// Serve the application until the process is stopped
pub async fn run(bind: SocketAddr, tracker: Tracker) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(Arc::new(AppState { tracker }));

    let listener = TcpListener::bind(bind).await?;
    log::info!("listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn download_guide() -> Response {
    attachment(
        "text/markdown; charset=utf-8",
        "sample_tracker_guide.md".to_string(),
        GUIDE.as_bytes().to_vec(),
    )
}

async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(search): Query<SearchQuery>,
) -> Response {
    json_or_error(state.tracker.records(search.q.as_deref()))
}

async fn list_workable_records(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(search): Query<SearchQuery>,
) -> Response {
    json_or_error(state.tracker.workable_records(&user, search.q.as_deref()))
}

async fn create_record(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(new): Json<NewRecord>,
) -> Response {
    match state.tracker.create_record(&user, new) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn assign_chassis(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(request): Json<ChassisRequest>,
) -> Response {
    json_or_error(state.tracker.assign_chassis(
        &user,
        id,
        &request.chassis_no,
        request.confirm_override,
    ))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(request): Json<StatusRequest>,
) -> Response {
    json_or_error(
        state
            .tracker
            .update_status(&user, id, request.status, request.notes.as_deref()),
    )
}

async fn request_deletion(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(request): Json<DeletionRequest>,
) -> Response {
    json_or_error(state.tracker.request_deletion(&user, id, &request.reason))
}

async fn dashboard(State(state): State<Arc<AppState>>, Extension(user): Extension<User>) -> Response {
    json_or_error(state.tracker.dashboard(&user))
}

async fn export_xlsx(
    State(state): State<Arc<AppState>>,
    Query(search): Query<SearchQuery>,
) -> Response {
    let today = Local::now().date_naive();
    let exported = state
        .tracker
        .records(search.q.as_deref())
        .and_then(|records| downloader::to_xlsx(&records, today));

    match exported {
        Ok(bytes) => attachment(
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            format!("records_{}.xlsx", today.format("%Y-%m-%d")),
            bytes,
        ),
        Err(e) => error_response(e),
    }
}

async fn export_csv(
    State(state): State<Arc<AppState>>,
    Query(search): Query<SearchQuery>,
) -> Response {
    let today = Local::now().date_naive();
    match state.tracker.records(search.q.as_deref()) {
        Ok(records) => attachment(
            "text/csv; charset=utf-8",
            format!("records_{}.csv", today.format("%Y-%m-%d")),
            downloader::to_csv(&records, today).into_bytes(),
        ),
        Err(e) => error_response(e),
    }
}

/// Bulk import from a multipart form
///
/// Expects a `file` field (`.xlsx` or `.csv`) and an optional
/// `confirm_override` field set to `true` to accept near-duplicate rows.
async fn import_records(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    mut multipart: Multipart,
) -> Response {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut confirm_override = false;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(TrackerError::Import(e.to_string())),
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((filename, bytes.to_vec())),
                    Err(e) => return error_response(TrackerError::Import(e.to_string())),
                }
            }
            "confirm_override" => {
                confirm_override = matches!(field.text().await.as_deref(), Ok("true") | Ok("on"));
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = upload else {
        return error_response(TrackerError::Import("No file data received".to_string()));
    };

    let outcome = loader::from_upload(&filename, &bytes)
        .and_then(|rows| state.tracker.import_records(&user, rows, confirm_override));
    json_or_error(outcome)
}

async fn list_users(State(state): State<Arc<AppState>>, Extension(user): Extension<User>) -> Response {
    json_or_error(state.tracker.users(&user))
}

async fn list_pending_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Response {
    json_or_error(state.tracker.pending_users(&user))
}

async fn approve_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Response {
    json_or_error(state.tracker.approve_user(&user, id))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Response {
    match state.tracker.delete_user(&user, id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn set_bulk_import(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(request): Json<PermissionRequest>,
) -> Response {
    json_or_error(
        state
            .tracker
            .set_bulk_import_permission(&user, id, request.allowed),
    )
}

async fn list_deletion_requests(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Response {
    json_or_error(state.tracker.deletion_requests(&user))
}

async fn approve_deletion(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Response {
    json_or_error(state.tracker.approve_deletion(&user, id))
}

async fn reject_deletion(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Response {
    json_or_error(state.tracker.reject_deletion(&user, id))
}
