use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use bytes::Bytes;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::models::student::NewStudent;
use crate::pipeline::registry::{IdentityRegistry, RegistryExclusion};
use crate::{db, AppState};

const BOUNDARY: &str = "frame";
const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

fn error_json(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": msg.into() }))).into_response()
}

fn internal(e: impl std::fmt::Display) -> Response {
    tracing::error!("Request failed: {}", e);
    error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

/// Run `f` with a pooled connection on the blocking pool.
async fn with_conn<T, F>(state: &Arc<AppState>, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| anyhow::anyhow!("Pool error: {}", e))?;
        f(&conn)
    })
    .await
    .map_err(internal)?
    .map_err(internal)
}

async fn rebuild(state: &Arc<AppState>) -> Result<Arc<IdentityRegistry>, Response> {
    let st = state.clone();
    tokio::task::spawn_blocking(move || st.rebuild_registry())
        .await
        .map_err(internal)?
        .map_err(internal)
}

#[derive(Serialize)]
struct RegistrySummary {
    identities: usize,
    excluded: Vec<RegistryExclusion>,
}

impl From<&IdentityRegistry> for RegistrySummary {
    fn from(r: &IdentityRegistry) -> Self {
        Self { identities: r.len(), excluded: r.excluded().to_vec() }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "identities": state.registry.snapshot().len(),
        "viewers": state.frames.receiver_count(),
    }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

/// MJPEG stream of annotated frames, one part per pipeline iteration.
pub async fn video_feed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rx = state.frames.subscribe();
    let parts = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(jpeg) => return Some((Ok::<_, Infallible>(multipart_chunk(&jpeg)), rx)),
                Err(RecvError::Lagged(n)) => tracing::debug!("Viewer lagged, skipped {} frames", n),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    (
        [
            (header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
}

fn multipart_chunk(jpeg: &Bytes) -> Bytes {
    let head = format!("--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n", BOUNDARY, jpeg.len());
    let mut chunk = Vec::with_capacity(head.len() + jpeg.len() + 2);
    chunk.extend_from_slice(head.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    Bytes::from(chunk)
}

pub async fn list_students(State(state): State<Arc<AppState>>) -> Response {
    match with_conn(&state, |c| db::query::list_students(c)).await {
        Ok(students) => Json(students).into_response(),
        Err(resp) => resp,
    }
}

fn valid_student_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub async fn create_student(State(state): State<Arc<AppState>>, Json(req): Json<NewStudent>) -> Response {
    let student_id = req.student_id.trim().to_string();
    let name = req.name.trim().to_string();
    if !valid_student_id(&student_id) {
        return error_json(StatusCode::BAD_REQUEST, "student_id must be 1-64 letters, digits, '-' or '_'");
    }
    if name.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "name is required");
    }
    let ext = req.ext.as_deref().unwrap_or("jpg").trim_start_matches('.').to_ascii_lowercase();
    if !IMAGE_EXTS.contains(&ext.as_str()) {
        return error_json(StatusCode::BAD_REQUEST, format!("unsupported image extension {:?}", ext));
    }
    let bytes = match base64::engine::general_purpose::STANDARD.decode(req.image_base64.trim()) {
        Ok(b) => b,
        Err(e) => return error_json(StatusCode::BAD_REQUEST, format!("image_base64 is not valid base64: {}", e)),
    };
    if let Err(e) = image::load_from_memory(&bytes) {
        return error_json(StatusCode::BAD_REQUEST, format!("image could not be decoded: {}", e));
    }

    // Unique per upload so a rejected duplicate never clobbers the owner's image
    let file_name = format!("{}_{}.{}", student_id, chrono::Utc::now().format("%Y%m%d%H%M%S%f"), ext);
    let file_path = state.paths.images.join(&file_name);
    if let Err(e) = tokio::fs::write(&file_path, &bytes).await {
        return internal(format!("failed to write {:?}: {}", file_path, e));
    }

    let inserted = {
        let (sid, nm, fname) = (student_id.clone(), name.clone(), file_name.clone());
        with_conn(&state, move |c| db::writer::insert_student(c, &sid, &nm, &fname)).await
    };
    match inserted {
        Ok(Some(_)) => {}
        Ok(None) => {
            let _ = tokio::fs::remove_file(&file_path).await;
            return error_json(StatusCode::CONFLICT, format!("student {} already exists", student_id));
        }
        Err(resp) => {
            let _ = tokio::fs::remove_file(&file_path).await;
            return resp;
        }
    }
    info!(student_id = %student_id, "Student added: {}", name);

    let registry = match rebuild(&state).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let exclusion = registry.excluded().iter().find(|e| e.student_id == student_id).cloned();
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "student_id": student_id,
            "name": name,
            "image_path": file_name,
            "enrolled": exclusion.is_none(),
            "exclusion": exclusion,
            "registry": RegistrySummary::from(registry.as_ref()),
        })),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

pub async fn update_student(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Response {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "name is required");
    }
    let updated = {
        let (sid, nm) = (student_id.clone(), name.clone());
        with_conn(&state, move |c| db::writer::update_student_name(c, &sid, &nm)).await
    };
    match updated {
        Ok(true) => {}
        Ok(false) => return error_json(StatusCode::NOT_FOUND, format!("student {} not found", student_id)),
        Err(resp) => return resp,
    }
    match rebuild(&state).await {
        Ok(registry) => Json(serde_json::json!({
            "student_id": student_id,
            "name": name,
            "registry": RegistrySummary::from(registry.as_ref()),
        }))
        .into_response(),
        Err(resp) => resp,
    }
}

pub async fn delete_student(State(state): State<Arc<AppState>>, Path(student_id): Path<String>) -> Response {
    let deleted = {
        let sid = student_id.clone();
        with_conn(&state, move |c| db::writer::delete_student(c, &sid)).await
    };
    let image_path = match deleted {
        Ok(Some(p)) => p,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, format!("student {} not found", student_id)),
        Err(resp) => return resp,
    };
    match state.images.resolve(&image_path) {
        Ok(full) => {
            if let Err(e) = tokio::fs::remove_file(&full).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(student_id = %student_id, "Failed to remove reference image {:?}: {}", full, e);
                }
            }
        }
        Err(e) => warn!(student_id = %student_id, "{}", e),
    }
    info!(student_id = %student_id, "Student deleted");
    match rebuild(&state).await {
        Ok(registry) => Json(serde_json::json!({
            "deleted": student_id,
            "registry": RegistrySummary::from(registry.as_ref()),
        }))
        .into_response(),
        Err(resp) => resp,
    }
}

#[derive(Serialize)]
struct IdentityView<'a> {
    id: &'a str,
    display_name: &'a str,
}

pub async fn get_registry(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.registry.snapshot();
    let identities: Vec<IdentityView> = registry
        .identities()
        .iter()
        .map(|i| IdentityView { id: &i.id, display_name: &i.display_name })
        .collect();
    Json(serde_json::json!({
        "identities": identities,
        "excluded": registry.excluded(),
    }))
    .into_response()
}

pub async fn rebuild_registry(State(state): State<Arc<AppState>>) -> Response {
    match rebuild(&state).await {
        Ok(registry) => Json(RegistrySummary::from(registry.as_ref())).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Deserialize)]
pub struct AttendanceQuery {
    pub date: Option<String>,
}

pub async fn list_attendance(State(state): State<Arc<AppState>>, Query(q): Query<AttendanceQuery>) -> Response {
    let date = match q.date.as_deref().filter(|d| !d.is_empty()) {
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => return error_json(StatusCode::BAD_REQUEST, format!("date must be YYYY-MM-DD, got {:?}", raw)),
        },
        None => None,
    };
    match with_conn(&state, move |c| db::query::list_attendance(c, date)).await {
        Ok(rows) => Json(rows).into_response(),
        Err(resp) => resp,
    }
}

pub async fn delete_attendance(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match with_conn(&state, move |c| db::writer::delete_attendance(c, id)).await {
        Ok(Some(student_id)) => {
            // Let the student be recorded again today
            state.dedup.forget(&student_id);
            info!(student_id = %student_id, "Attendance record {} deleted", id);
            Json(serde_json::json!({ "deleted": id, "student_id": student_id })).into_response()
        }
        Ok(None) => error_json(StatusCode::NOT_FOUND, format!("attendance record {} not found", id)),
        Err(resp) => resp,
    }
}
