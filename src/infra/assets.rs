//! Embedded static asset serving and extraction.

use std::{borrow::Cow, io, path::Path as FsPath};

use axum::{
    body::Body,
    extract::Path,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use include_dir::{Dir, include_dir};
use mime_guess::{Mime, MimeGuess};

use crate::application::error::ErrorReport;

static STATIC_ASSETS: Dir<'_> = include_dir!("$OUT_DIR/static_public");

/// Serve an embedded stylesheet under `/css/`.
pub async fn serve_css(path: Option<Path<String>>) -> Response {
    serve_static("css", path, "infra::assets::serve_css")
}

/// Serve an embedded script under `/js/`.
pub async fn serve_js(path: Option<Path<String>>) -> Response {
    serve_static("js", path, "infra::assets::serve_js")
}

/// The fiche stylesheet text, for inlining into print pages.
pub fn fiche_stylesheet() -> &'static str {
    STATIC_ASSETS
        .get_file("css/fiche.css")
        .and_then(|file| file.contents_utf8())
        .unwrap_or_default()
}

/// Copy the whole embedded bundle into `destination`, preserving the
/// `css/`/`js/` layout. Used by the static exporter.
pub fn unpack_all(destination: &FsPath) -> io::Result<()> {
    STATIC_ASSETS.extract(destination)
}

fn serve_static(prefix: &str, path: Option<Path<String>>, source: &'static str) -> Response {
    let captured = path.map(|Path(value)| value);
    match resolve_asset(prefix, captured) {
        Some(asset) => asset.into_response(),
        None => not_found_response(source),
    }
}

fn not_found_response(source: &'static str) -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(source, StatusCode::NOT_FOUND, "Static asset not found")
        .attach(&mut response);
    response
}

struct Asset<'a> {
    contents: Cow<'a, [u8]>,
    mime: MimeGuess,
}

fn resolve_asset(prefix: &str, path: Option<String>) -> Option<Asset<'static>> {
    let mut candidate = path.unwrap_or_default();
    if candidate.starts_with('/') {
        candidate = candidate.trim_start_matches('/').to_string();
    }

    if candidate.is_empty() || candidate.ends_with('/') || candidate.contains("..") {
        // Avoid directory traversal and disallow directory listings.
        return None;
    }

    let bundled = format!("{prefix}/{candidate}");
    let file = STATIC_ASSETS.get_file(&bundled)?;

    let mime = mime_guess::from_path(&bundled);
    let contents = Cow::Borrowed(file.contents());
    Some(Asset { contents, mime })
}

impl IntoResponse for Asset<'static> {
    fn into_response(self) -> Response {
        let mime = self.mime.first_or_octet_stream();
        match self.contents {
            Cow::Borrowed(slice) => build_response(Bytes::from_static(slice), mime),
            Cow::Owned(bytes) => build_response(Bytes::from(bytes), mime),
        }
    }
}

fn build_response(bytes: Bytes, mime: Mime) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );

    response
}
