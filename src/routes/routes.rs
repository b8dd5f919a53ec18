//! Defines every route the service exposes.
//!
//! ## Structure
//! - **Pages**
//!   - `GET  /`         recent uploads, kept live over `/api/feed`
//!   - `GET  /upload`   upload form (drag & drop, progress)
//!   - `POST /upload`   multipart form fallback
//!   - `GET  /i/{id}`   image detail page
//!
//! - **API**
//!   - `PUT  /api/images?filename=…` raw body upload
//!   - `GET  /api/images`            newest records as JSON
//!   - `GET  /api/images/{id}`       one record
//!   - `GET  /api/feed`              live snapshots as Server-Sent Events
//!
//! - **Objects**
//!   - `GET  /objects/{*path}` stored bytes behind a download URL

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{feed_events, get_image, get_object, list_recent, upload_image},
        page_handlers::{detail_page, home_page, upload_form, upload_page},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build the router. State is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // pages
        .route("/", get(home_page))
        .route("/upload", get(upload_page).post(upload_form))
        .route("/i/{id}", get(detail_page))
        // api
        .route("/api/images", put(upload_image).get(list_recent))
        .route("/api/images/{id}", get(get_image))
        .route("/api/feed", get(feed_events))
        // stored bytes
        .route("/objects/{*path}", get(get_object))
}
