//! Upload server
//!
//! `POST /upload` stores the multipart field `image` under the public
//! directory using the client's file name and answers with its URL;
//! `GET /uploads/<filename>` serves the stored bytes. The file on disk is
//! the only record, so a second upload with the same name replaces the first.

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::upload::UPLOAD_FIELD;

/// Characters escaped in the file name part of a returned URL
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Injected server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory uploads are written to and served from
    pub public_dir: PathBuf,
    /// Externally reachable origin, e.g. `https://example.dev`
    pub public_url: String,
}

impl ServerConfig {
    fn file_url(&self, file_name: &str) -> String {
        format!(
            "{}/uploads/{}",
            self.public_url.trim_end_matches('/'),
            utf8_percent_encode(file_name, PATH_SEGMENT)
        )
    }
}

#[derive(Serialize)]
struct UploadResponse {
    url: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned to upload clients as `{ "error": ... }`
#[derive(Debug)]
pub enum ServerError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ServerError::Internal(msg) => {
                tracing::error!("[Server] {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

/// Build the router; the upload directory must already exist
pub fn router(config: ServerConfig) -> Router {
    let uploads = ServeDir::new(&config.public_dir);

    Router::new()
        .route("/upload", post(upload))
        .nest_service("/uploads", uploads)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(config))
}

/// Create the upload directory and serve until the process is stopped
pub async fn serve(bind: SocketAddr, config: ServerConfig) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&config.public_dir).await?;

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(
        "[Server] Listening on {}, storing uploads in {}",
        listener.local_addr()?,
        config.public_dir.display()
    );

    axum::serve(listener, router(config)).await
}

async fn upload(
    State(config): State<Arc<ServerConfig>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Failed to read multipart: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };

        // One file per request; a second one would silently replace the first
        if file.is_some() {
            return Err(ServerError::BadRequest(format!(
                "More than one `{}` file in request",
                UPLOAD_FIELD
            )));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read file data: {}", e)))?;

        file = Some((raw_name, data.to_vec()));
    }

    let Some((raw_name, data)) = file else {
        return Err(ServerError::BadRequest("No file uploaded".to_string()));
    };

    let file_name = stored_file_name(&raw_name)
        .ok_or_else(|| ServerError::BadRequest("Invalid filename".to_string()))?;
    let path = config.public_dir.join(&file_name);

    tokio::fs::write(&path, &data)
        .await
        .map_err(|e| ServerError::Internal(format!("Failed to write {}: {}", path.display(), e)))?;

    tracing::info!("[Server] Stored {} ({} bytes)", file_name, data.len());

    Ok(Json(UploadResponse {
        url: config.file_url(&file_name),
    }))
}

/// Last path component of a client-supplied name, so uploads stay inside the public dir
fn stored_file_name(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    let name = Path::new(&normalized).file_name()?.to_string_lossy().to_string();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name)
}
