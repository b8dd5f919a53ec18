//! Browser pages: the recent feed, the upload form and the detail view.
//!
//! Pages are rendered server-side from the same feed/lookup services the API
//! uses. The landing page then keeps itself current over `/api/feed`.

use crate::{
    errors::AppError,
    handlers::image_handlers::progress_logger,
    models::{
        image::{ImageRecord, view_url},
        upload::{IncomingFile, UploadResult},
    },
    services::{
        detail_view::{DetailState, DetailView},
        recent_feed::{FeedState, RecentFeed, RECENT_LIMIT},
    },
    state::AppState,
};
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use futures::StreamExt;
use std::{io, time::Duration};

/// How long the landing page waits for the first feed snapshot before
/// rendering the loading state and leaving the rest to the live stream.
const FIRST_SNAPSHOT_WAIT: Duration = Duration::from_secs(2);

/// `GET /`
pub async fn home_page(State(state): State<AppState>) -> Html<String> {
    let mut feed = RecentFeed::open(state.metadata.clone(), RECENT_LIMIT);
    let snapshot = match tokio::time::timeout(FIRST_SNAPSHOT_WAIT, feed.settled()).await {
        Ok(snapshot) => snapshot,
        Err(_) => FeedState::Loading,
    };
    Html(render_home(&snapshot))
}

/// `GET /upload`
pub async fn upload_page() -> Html<String> {
    Html(render_upload(None, None))
}

/// `POST /upload`: multipart form fallback for browsers without script.
///
/// The first field named `file` is uploaded. An empty selection is ignored.
pub async fn upload_form(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            break;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let label = filename.clone();
        let file = IncomingFile {
            filename,
            content_type,
            size_hint: None,
            body: field.map(|chunk| chunk.map_err(io::Error::other)).boxed(),
        };

        return Ok(match state.uploads.upload(Some(file), progress_logger(label)).await {
            Ok(Some(result)) => Html(render_upload(Some(&result), None)).into_response(),
            Ok(None) => Redirect::to("/upload").into_response(),
            Err(err) => (
                StatusCode::BAD_GATEWAY,
                Html(render_upload(None, Some(&err.to_string()))),
            )
                .into_response(),
        });
    }
    Ok(Redirect::to("/upload").into_response())
}

/// `GET /i/{id}`
pub async fn detail_page(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let mut view = DetailView::open(state.metadata.clone(), id);
    match view.resolved().await {
        DetailState::Found(record) => Html(render_detail(&record)).into_response(),
        DetailState::NotFound => {
            (StatusCode::NOT_FOUND, Html(render_detail_error("Image not found"))).into_response()
        }
        DetailState::Failed(message) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Html(render_detail_error(&message)),
        )
            .into_response(),
        DetailState::Loading => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(render_detail_error("Failed to load image")),
        )
            .into_response(),
    }
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn layout(title: &str, body: &str, script: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">",
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">",
            "<title>{title}</title><style>{style}</style></head>",
            "<body><main>{body}</main>{script}</body></html>"
        ),
        title = html_escape(title),
        style = STYLE,
        body = body,
        script = script,
    )
}

const STYLE: &str = "body{font-family:system-ui,sans-serif;margin:0;background:#f9fafb;color:#111}\
main{max-width:64rem;margin:0 auto;padding:1.5rem}\
a{color:#2563eb}\
.bar{display:flex;align-items:center;justify-content:space-between;gap:.75rem;margin-bottom:1.5rem}\
.button{padding:.5rem 1rem;border-radius:.25rem;background:#2563eb;color:#fff;text-decoration:none;border:0}\
.muted{color:#4b5563}\
.error{background:#fef2f2;color:#b91c1c;padding:.75rem;border-radius:.25rem;margin-bottom:1rem}\
.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(12rem,1fr));gap:1rem}\
.card{border:1px solid #e5e7eb;border-radius:.25rem;overflow:hidden;background:#fff}\
.card img{width:100%;height:10rem;object-fit:cover;display:block}\
.card div{padding:.5rem;display:flex;justify-content:space-between;font-size:.875rem}\
.drop{display:flex;flex-direction:column;align-items:center;border:2px dashed #d1d5db;border-radius:.5rem;padding:2.5rem}\
.drop.active{border-color:#3b82f6;background:#eff6ff}\
.progress{height:.5rem;background:#e5e7eb;border-radius:.25rem;margin-top:1rem}\
.progress div{height:.5rem;background:#2563eb;border-radius:.25rem;width:0}\
.detail img{display:block;margin:0 auto;max-height:70vh;max-width:100%;object-fit:contain}";

fn render_card(record: &ImageRecord) -> String {
    let view = html_escape(&record.view_url());
    let direct = html_escape(&record.download_url);
    format!(
        concat!(
            "<div class=\"card\"><a href=\"{view}\"><img src=\"{direct}\" alt=\"{alt}\" loading=\"lazy\"></a>",
            "<div><a href=\"{view}\">View</a>",
            "<a href=\"{direct}\" target=\"_blank\" rel=\"noreferrer\">Direct</a></div></div>"
        ),
        view = view,
        direct = direct,
        alt = html_escape(&record.filename),
    )
}

fn render_feed(state: &FeedState) -> String {
    let (error, items) = match state {
        FeedState::Loading => return "<p class=\"muted\">Loading latest images…</p>".to_string(),
        FeedState::Loaded { items } => (None, items),
        FeedState::Failed {
            message,
            last_known,
        } => (Some(message), last_known),
    };

    let mut html = String::new();
    if let Some(message) = error {
        html.push_str(&format!("<div class=\"error\">{}</div>", html_escape(message)));
    }
    if items.is_empty() {
        if error.is_none() {
            html.push_str("<p class=\"muted\">No images yet. Be the first to upload!</p>");
        }
        return html;
    }
    html.push_str("<div class=\"grid\">");
    for record in items {
        html.push_str(&render_card(record));
    }
    html.push_str("</div>");
    html
}

fn render_home(state: &FeedState) -> String {
    let body = format!(
        concat!(
            "<div class=\"bar\"><h1>Recent uploads</h1>",
            "<a class=\"button\" href=\"/upload\">Upload an image</a></div>",
            "<div id=\"feed\">{feed}</div>"
        ),
        feed = render_feed(state),
    );
    layout("Recent uploads", &body, HOME_SCRIPT)
}

const HOME_SCRIPT: &str = r#"<script>
(function () {
  var feed = document.getElementById("feed");
  function esc(s) {
    return String(s).replace(/[&<>"']/g, function (c) {
      return { "&": "&amp;", "<": "&lt;", ">": "&gt;", '"': "&quot;", "'": "&#39;" }[c];
    });
  }
  function card(img) {
    var view = "/i/" + encodeURIComponent(img.id);
    return '<div class="card"><a href="' + view + '"><img src="' + esc(img.downloadURL) +
      '" alt="' + esc(img.filename || "Image") + '" loading="lazy"></a><div><a href="' + view +
      '">View</a><a href="' + esc(img.downloadURL) + '" target="_blank" rel="noreferrer">Direct</a></div></div>';
  }
  function render(s) {
    if (s.state === "loading") {
      feed.innerHTML = '<p class="muted">Loading latest images…</p>';
      return;
    }
    var items = s.state === "loaded" ? s.items : s.lastKnown;
    var html = s.state === "failed" ? '<div class="error">' + esc(s.message) + "</div>" : "";
    if (items.length === 0) {
      if (s.state !== "failed") html += '<p class="muted">No images yet. Be the first to upload!</p>';
    } else {
      html += '<div class="grid">' + items.map(card).join("") + "</div>";
    }
    feed.innerHTML = html;
  }
  var source = new EventSource("/api/feed");
  source.addEventListener("snapshot", function (e) {
    var s = JSON.parse(e.data);
    render(s);
    if (s.state === "failed") source.close();
  });
})();
</script>"#;

fn render_upload(result: Option<&UploadResult>, error: Option<&str>) -> String {
    let error_html = error
        .map(|message| format!("<div class=\"error\" id=\"error\">{}</div>", html_escape(message)))
        .unwrap_or_else(|| "<div class=\"error\" id=\"error\" hidden></div>".to_string());
    let result_html = match result {
        Some(result) => render_upload_summary(result),
        None => String::new(),
    };
    let button = if result.is_some() {
        "Upload another"
    } else {
        "Choose file"
    };

    let body = format!(
        concat!(
            "<div class=\"bar\"><h1>Upload an image</h1><a href=\"/\">Recent uploads</a></div>",
            "<form id=\"form\" class=\"drop\" method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">",
            "<p class=\"muted\">Drag &amp; drop a file here</p><p class=\"muted\">or</p>",
            "<label class=\"button\" id=\"button\">{button}",
            "<input id=\"file\" type=\"file\" name=\"file\" accept=\"image/*\" hidden></label>",
            "<noscript><button class=\"button\" type=\"submit\">Upload</button></noscript>",
            "</form>{error}",
            "<div id=\"busy\" hidden><div class=\"progress\"><div id=\"bar\"></div></div>",
            "<p class=\"muted\" id=\"percent\">0%</p></div>",
            "<div id=\"result\">{result}</div>"
        ),
        button = button,
        error = error_html,
        result = result_html,
    );
    layout("Upload an image", &body, UPLOAD_SCRIPT)
}

fn render_upload_summary(result: &UploadResult) -> String {
    format!(
        concat!(
            "<p style=\"color:#15803d\">Upload complete!</p>",
            "<p><a href=\"{view}\">View page</a> ",
            "<a href=\"{direct}\" target=\"_blank\">Direct link</a></p>",
            "<p class=\"muted\">Shareable page: {view}</p>"
        ),
        view = html_escape(&view_url(&result.id)),
        direct = html_escape(&result.download_url),
    )
}

const UPLOAD_SCRIPT: &str = r#"<script>
(function () {
  var form = document.getElementById("form");
  var input = document.getElementById("file");
  var button = document.getElementById("button");
  var busy = document.getElementById("busy");
  var bar = document.getElementById("bar");
  var percent = document.getElementById("percent");
  var error = document.getElementById("error");
  var result = document.getElementById("result");
  var uploading = false;
  function esc(s) {
    return String(s).replace(/[&<>"']/g, function (c) {
      return { "&": "&amp;", "<": "&lt;", ">": "&gt;", '"': "&quot;", "'": "&#39;" }[c];
    });
  }
  function setLabel(text) { button.firstChild.nodeValue = text; }
  function progress(p) {
    bar.style.width = p + "%";
    percent.textContent = p + "%";
    setLabel("Uploading " + p + "%");
  }
  function done() {
    uploading = false;
    busy.hidden = true;
  }
  function upload(files) {
    var file = files && files[0];
    if (!file || uploading) return;
    uploading = true;
    error.hidden = true;
    result.innerHTML = "";
    busy.hidden = false;
    progress(0);
    var xhr = new XMLHttpRequest();
    xhr.open("PUT", "/api/images?filename=" + encodeURIComponent(file.name));
    xhr.setRequestHeader("Content-Type", file.type || "application/octet-stream");
    xhr.upload.onprogress = function (e) {
      if (e.lengthComputable) progress(Math.round((e.loaded / e.total) * 100));
    };
    xhr.onload = function () {
      done();
      var body = {};
      try { body = JSON.parse(xhr.responseText); } catch (e) {}
      if (xhr.status === 201) {
        setLabel("Upload another");
        result.innerHTML = '<p style="color:#15803d">Upload complete!</p><p><a href="' + esc(body.viewUrl) +
          '">View page</a> <a href="' + esc(body.downloadURL) + '" target="_blank">Direct link</a></p>' +
          '<p class="muted">Shareable page: ' + esc(body.viewUrl) + "</p>";
      } else {
        setLabel("Choose file");
        error.textContent = body.error || "Upload failed";
        error.hidden = false;
      }
    };
    xhr.onerror = function () {
      done();
      setLabel("Choose file");
      error.textContent = "Upload failed";
      error.hidden = false;
    };
    xhr.send(file);
  }
  input.addEventListener("change", function () { upload(input.files); input.value = ""; });
  form.addEventListener("dragover", function (e) { e.preventDefault(); form.classList.add("active"); });
  form.addEventListener("dragleave", function (e) { e.preventDefault(); form.classList.remove("active"); });
  form.addEventListener("drop", function (e) {
    e.preventDefault();
    form.classList.remove("active");
    upload(e.dataTransfer.files);
  });
})();
</script>"#;

fn render_detail(record: &ImageRecord) -> String {
    let direct = html_escape(&record.download_url);
    let filename = html_escape(&record.filename);
    let body = format!(
        concat!(
            "<div class=\"bar\"><h1>{filename}</h1><div>",
            "<a href=\"{direct}\" target=\"_blank\">Direct link</a> ",
            "<a href=\"/upload\">Upload another</a></div></div>",
            "<div class=\"card detail\"><img src=\"{direct}\" alt=\"{filename}\"></div>",
            "<div class=\"muted\"><p>Content type: {content_type}</p>",
            "<p>Size: {size} KB</p><p>Storage path: {storage_path}</p></div>"
        ),
        filename = filename,
        direct = direct,
        content_type = html_escape(&record.content_type),
        size = record.size_kb(),
        storage_path = html_escape(&record.storage_path),
    );
    layout(&record.filename, &body, "")
}

fn render_detail_error(message: &str) -> String {
    let body = format!(
        "<p class=\"error\">{}</p><a href=\"/upload\">Upload an image</a>",
        html_escape(message)
    );
    layout(message, &body, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::tests::test_state,
        services::upload_service::tests::incoming,
    };
    use axum::body::to_bytes;

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// The server-rendered feed, without the live-update script.
    fn feed_fragment(html: &str) -> &str {
        let start = html.find("<div id=\"feed\">").unwrap();
        let end = html.find("<script>").unwrap();
        &html[start..end]
    }

    #[tokio::test]
    async fn test_home_shows_empty_state() {
        let (state, _) = test_state().await;
        let html = home_page(State(state)).await.0;
        let feed = feed_fragment(&html);
        assert!(feed.contains("No images yet. Be the first to upload!"));
        assert!(!feed.contains("class=\"grid\""));
        assert!(html.contains("/api/feed"));
    }

    #[tokio::test]
    async fn test_home_lists_uploads_newest_first() {
        let (state, _) = test_state().await;
        let mut ids = Vec::new();
        for name in ["old.png", "new.png"] {
            let result = state
                .uploads
                .upload(Some(incoming(name, "image/png", b"png")), |_| {})
                .await
                .unwrap()
                .unwrap();
            ids.push(result.id);
        }

        let html = home_page(State(state)).await.0;
        let feed = feed_fragment(&html);
        let old_at = feed.find(&format!("/i/{}", ids[0])).unwrap();
        let new_at = feed.find(&format!("/i/{}", ids[1])).unwrap();
        assert!(new_at < old_at);
        assert!(!feed.contains("No images yet"));
    }

    #[tokio::test]
    async fn test_detail_page_for_unknown_id() {
        let (state, _) = test_state().await;
        let response = detail_page(State(state), Path("doesnotexist".into())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let html = body_text(response).await;
        assert!(html.contains("Image not found"));
        assert!(html.contains("href=\"/upload\""));
    }

    #[tokio::test]
    async fn test_detail_page_renders_attributes() {
        let (state, _) = test_state().await;
        let result = state
            .uploads
            .upload(
                Some(incoming("<cat>.jpg", "image/jpeg", &vec![0u8; 2_097_152])),
                |_| {},
            )
            .await
            .unwrap()
            .unwrap();

        let response = detail_page(State(state), Path(result.id.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Content type: image/jpeg"));
        assert!(html.contains("Size: 2048.0 KB"));
        assert!(html.contains(&format!("Storage path: {}.jpg", result.id)));
        assert!(html.contains(&result.download_url));
        assert!(html.contains("&lt;cat&gt;.jpg"));
        assert!(!html.contains("<cat>"));
    }

    #[test]
    fn test_feed_failure_keeps_last_known_items() {
        let record = crate::models::image::NewImageRecord {
            id: "kept001".into(),
            filename: "k.png".into(),
            content_type: "image/png".into(),
            size: 1,
            storage_path: "kept001.png".into(),
            download_url: "http://localhost:3000/objects/kept001.png".into(),
        }
        .into_record(chrono::Utc::now());

        let html = render_feed(&FeedState::Failed {
            message: "listener dropped".into(),
            last_known: vec![record],
        });
        assert!(html.contains("listener dropped"));
        assert!(html.contains("/i/kept001"));
        assert!(!html.contains("No images yet"));
    }

    #[test]
    fn test_loading_state_renders_placeholder() {
        assert!(render_feed(&FeedState::Loading).contains("Loading latest images"));
    }

    #[test]
    fn test_upload_summary_links() {
        let html = render_upload(
            Some(&UploadResult {
                id: "abcDEF1".into(),
                view_url: "/i/abcDEF1".into(),
                download_url: "http://localhost:3000/objects/abcDEF1.png".into(),
            }),
            None,
        );
        assert!(html.contains("Upload complete!"));
        assert!(html.contains("href=\"/i/abcDEF1\""));
        assert!(html.contains("http://localhost:3000/objects/abcDEF1.png"));
        assert!(html.contains("Upload another"));
    }

    #[test]
    fn test_upload_error_is_escaped() {
        let html = render_upload(None, Some("<boom>"));
        assert!(html.contains("&lt;boom&gt;"));
    }
}
