use axum::http::Method;
use axum::{routing::{delete, get, post}, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::handlers;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/video_feed", get(handlers::video_feed))
        .route("/students", get(handlers::list_students).post(handlers::create_student))
        .route("/students/:student_id", delete(handlers::delete_student).patch(handlers::update_student))
        .route("/registry", get(handlers::get_registry))
        .route("/registry/rebuild", post(handlers::rebuild_registry))
        .route("/attendance", get(handlers::list_attendance))
        .route("/attendance/:id", delete(handlers::delete_attendance))
        .layer(cors)
        .with_state(state)
}
