//! JSON and streaming handlers: uploads, record lookups, the live feed and
//! the object bytes behind every download URL.

use crate::{
    errors::AppError,
    models::upload::{ByteStream, IncomingFile},
    services::{
        detail_view::{DetailState, DetailView},
        recent_feed::{FeedState, RecentFeed, RECENT_LIMIT},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use std::io::{self, ErrorKind};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

/// Logs each new upload percentage once.
pub(crate) fn progress_logger(label: String) -> impl FnMut(u8) + Send {
    let mut last = None;
    move |percent| {
        if last != Some(percent) {
            debug!("{}: {}%", label, percent);
            last = Some(percent);
        }
    }
}

/// Body stream that fails once more than `max` bytes have arrived.
fn limited_body(body: Body, max: usize) -> ByteStream<'static> {
    let mut seen = 0usize;
    body.into_data_stream()
        .map(move |chunk| {
            let chunk = chunk.map_err(io::Error::other)?;
            seen += chunk.len();
            if seen > max {
                return Err(io::Error::new(
                    ErrorKind::FileTooLarge,
                    format!("upload exceeds the {} byte limit", max),
                ));
            }
            Ok(chunk)
        })
        .boxed()
}

/// `PUT /api/images?filename=…`: raw body upload.
///
/// Without a filename there is no file, and nothing happens (204).
pub async fn upload_image(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let size_hint = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if size_hint.is_some_and(|len| len > state.max_upload_bytes as u64) {
        return Err(AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("upload exceeds the {} byte limit", state.max_upload_bytes),
        ));
    }

    let file = query
        .filename
        .filter(|name| !name.is_empty())
        .map(|filename| IncomingFile {
            filename,
            content_type,
            size_hint,
            body: limited_body(body, state.max_upload_bytes),
        });

    let label = file
        .as_ref()
        .map(|f| f.filename.clone())
        .unwrap_or_default();
    match state.uploads.upload(file, progress_logger(label)).await? {
        Some(result) => Ok((StatusCode::CREATED, Json(result)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// `GET /api/images`: newest records, newest first.
pub async fn list_recent(State(state): State<AppState>) -> Result<Response, AppError> {
    let records = state.metadata.recent_images(RECENT_LIMIT).await?;
    Ok(Json(records).into_response())
}

/// `GET /api/images/{id}`
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let mut view = DetailView::open(state.metadata.clone(), id.clone());
    match view.resolved().await {
        DetailState::Found(record) => Ok(Json(record).into_response()),
        DetailState::NotFound => Err(AppError::not_found(format!("image `{}` not found", id))),
        DetailState::Failed(message) => {
            Err(AppError::new(StatusCode::SERVICE_UNAVAILABLE, message))
        }
        DetailState::Loading => Err(AppError::internal("lookup did not complete")),
    }
}

/// `GET /api/feed`: Server-Sent Events, one `snapshot` event per feed change.
///
/// The subscription lives exactly as long as the client connection.
pub async fn feed_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let feed = RecentFeed::open(state.metadata.clone(), RECENT_LIMIT);
    let initial = feed.state();

    let events = stream::unfold((feed, Some(initial)), |(mut feed, pending)| async move {
        let next = match pending {
            Some(state) => state,
            None => feed.changed().await?,
        };
        Some((snapshot_event(&next), (feed, None)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn snapshot_event(state: &FeedState) -> Result<Event, axum::Error> {
    Event::default().event("snapshot").json_data(state)
}

/// `GET /objects/{*path}`: the bytes behind a download URL.
///
/// The content type comes from the image record, not the extension.
pub async fn get_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let reader = state.objects.open(&path).await?;

    let id = path.split('.').next().unwrap_or(&path);
    let content_type = match state.metadata.get_image(id).await {
        Ok(Some(record)) => record.content_type,
        Ok(None) => "application/octet-stream".to_string(),
        Err(err) => {
            debug!("no content type for {}: {}", path, err);
            "application/octet-stream".to_string()
        }
    };

    let mut response = Response::new(Body::from_stream(reader.body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(reader.len));
    // A colliding id may overwrite the path, so the bytes are not immutable.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    // Uploaded bytes share the page origin; never let them run as a document.
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; sandbox"),
    );
    if !renders_inline(&content_type) {
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment"),
        );
    }
    Ok(response)
}

/// Raster images display inline; everything else (SVG included) downloads.
fn renders_inline(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("image/") && essence != "image/svg+xml"
}
