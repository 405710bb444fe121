//! Route handlers for the npm registry protocol.
//!
//! Everything here renders from the immutable catalog snapshot grabbed at
//! the top of the request, or streams tarball bytes straight off disk.
//! `dist.tarball` values are stored as base file names and rewritten to
//! absolute URLs per request from the `Host` header.

use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path as AxumPath, Query, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::catalog::{Catalog, PackageEntry, VersionDoc};
use crate::error::{AppError, AppResult};
use crate::json::JsonAscii;
use crate::state::AppState;

const DEFAULT_SEARCH_SIZE: i64 = 20;
const MAX_SEARCH_SIZE: i64 = 250;

/// `GET /` — registry banner.
pub async fn root() -> JsonAscii<Value> {
    JsonAscii(json!({ "db_name": "registry" }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub from: Option<i64>,
    pub size: Option<i64>,
}

/// `GET /-/v1/search` — case-insensitive substring search over package ids.
pub async fn search(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> AppResult<JsonAscii<Value>> {
    let Query(query) = query.map_err(|err| AppError::BadRequest(err.to_string()))?;
    let catalog = state.catalog();
    Ok(JsonAscii(search_catalog(&catalog, &query)))
}

/// The paging window keeps the last `size` matches among the first
/// `from + size`; `total` counts every match.
fn search_catalog(catalog: &Catalog, query: &SearchQuery) -> Value {
    let text = query.text.as_deref().unwrap_or("").to_ascii_lowercase();
    let from = query.from.unwrap_or(0).max(0) as usize;
    let size = query.size.unwrap_or(DEFAULT_SEARCH_SIZE).clamp(0, MAX_SEARCH_SIZE) as usize;
    let window = from + size;

    let mut ring: VecDeque<Value> = VecDeque::with_capacity(size);
    let mut total = 0usize;
    for entry in catalog.packages() {
        if !entry.name.to_ascii_lowercase().contains(&text) {
            continue;
        }
        total += 1;
        if size > 0 && total <= window {
            if ring.len() == size {
                ring.pop_front();
            }
            ring.push_back(search_object(entry));
        }
    }
    debug!(text = %text, from, size, total, "search served");
    json!({
        "objects": Value::Array(ring.into_iter().collect()),
        "total": total,
    })
}

/// Stable projection of one package's latest version.
fn search_object(entry: &PackageEntry) -> Value {
    let mut object = VersionDoc::new();
    object.insert("name".into(), Value::String(entry.name.clone()));
    object.insert("version".into(), Value::String(entry.latest.clone()));
    if let Some(doc) = entry.latest_doc() {
        if let Some(description) = doc.get("description") {
            object.insert("description".into(), description.clone());
        }
        if let Some(keywords) = doc.get("keywords") {
            object.insert("keywords".into(), keywords.clone());
        }
    }
    Value::Object(object)
}

/// `GET /{pkg}` — full package metadata.
pub async fn package_metadata(
    AxumPath(pkg): AxumPath<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<JsonAscii<Value>> {
    let catalog = state.catalog();
    let entry = lookup_package(&catalog, &pkg)?;
    let base = base_url(&headers);

    let mut body = VersionDoc::new();
    body.insert("dist-tags".into(), json!({ "latest": entry.latest }));
    body.insert("name".into(), Value::String(entry.name.clone()));
    let latest_doc = entry.latest_doc();
    if let Some(description) = latest_doc.and_then(|doc| doc.get("description")) {
        body.insert("description".into(), description.clone());
    }
    let mut versions = VersionDoc::new();
    for (version, doc) in &entry.versions {
        versions.insert(
            version.clone(),
            Value::Object(with_absolute_tarball(doc, &base, &entry.name)),
        );
    }
    body.insert("versions".into(), Value::Object(versions));
    body.insert("time".into(), json!(entry.time));
    if let Some(readme) = latest_doc.and_then(|doc| doc.get("readme")) {
        body.insert("readme".into(), readme.clone());
    }
    Ok(JsonAscii(Value::Object(body)))
}

/// `GET /{pkg}/{version}` and `GET /{pkg}/latest` — one version document.
pub async fn version_metadata(
    AxumPath((pkg, version)): AxumPath<(String, String)>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<JsonAscii<Value>> {
    let catalog = state.catalog();
    let entry = lookup_package(&catalog, &pkg)?;
    let doc = if version.eq_ignore_ascii_case("latest") {
        entry.latest_doc()
    } else {
        entry.version(&version)
    };
    let doc = doc
        .ok_or_else(|| AppError::NotFound(format!("version not found: {pkg}@{version}")))?;
    let base = base_url(&headers);
    Ok(JsonAscii(Value::Object(with_absolute_tarball(
        doc,
        &base,
        &entry.name,
    ))))
}

/// `GET|HEAD /{pkg}/-/{file}` — stream a tarball off disk.
pub async fn download_tarball(
    method: Method,
    AxumPath((_pkg, file)): AxumPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let resolved = lexical_normalize(&state.packages_dir.join(&file));
    if !path_has_prefix(&resolved, &state.packages_dir) {
        warn!(file = %file, resolved = %resolved.display(),
            "tarball request escapes the packages directory");
        return Err(AppError::Internal(format!("invalid tarball path: {file}")));
    }

    let metadata = tokio::fs::metadata(&resolved)
        .await
        .map_err(|err| AppError::Internal(format!("tarball unavailable: {file}: {err}")))?;
    let modified: DateTime<Utc> = metadata
        .modified()
        .map_err(|err| AppError::Internal(format!("tarball mtime unavailable: {err}")))?
        .into();
    let base_name = file.rsplit('/').next().unwrap_or(&file).to_string();

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        let file = tokio::fs::File::open(&resolved)
            .await
            .map_err(|err| AppError::Internal(format!("tarball unavailable: {err}")))?;
        Body::from_stream(ReaderStream::new(file))
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={base_name}"),
        )
        .header(
            header::LAST_MODIFIED,
            modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        )
        .body(body)
        .map_err(|err| AppError::Internal(format!("response build failed: {err}")))
}

/// JSON 404 for everything the route table does not know.
pub async fn fallback(uri: Uri) -> Response {
    AppError::NotFound(format!("no route for {}", uri.path())).into_response()
}

/// Rewrite case-variant `/-/v1/search` paths onto the canonical route.
///
/// The structural segments are matched case-insensitively; axum's router
/// is not, so the request path is canonicalized before routing.
pub async fn canonicalize_search_path(mut request: Request) -> Request {
    const SEARCH: &str = "/-/v1/search";
    let path = request.uri().path();
    if path.len() >= SEARCH.len() {
        let (head, tail) = path.split_at(path.len() - SEARCH.len());
        if tail != SEARCH && tail.eq_ignore_ascii_case(SEARCH) {
            let query = request
                .uri()
                .query()
                .map(|q| format!("?{q}"))
                .unwrap_or_default();
            if let Ok(uri) = format!("{head}{SEARCH}{query}").parse::<Uri>() {
                *request.uri_mut() = uri;
            }
        }
    }
    request
}

fn lookup_package<'a>(catalog: &'a Catalog, pkg: &str) -> AppResult<&'a PackageEntry> {
    catalog
        .get(pkg)
        .ok_or_else(|| AppError::NotFound(format!("package not found: {pkg}")))
}

/// Clone a version document, rewriting `dist.tarball` from the stored base
/// file name into an absolute URL for this request.
fn with_absolute_tarball(doc: &VersionDoc, base: &str, pkg: &str) -> VersionDoc {
    let mut doc = doc.clone();
    if let Some(Value::Object(dist)) = doc.get_mut("dist") {
        if let Some(Value::String(tarball)) = dist.get_mut("tarball") {
            *tarball = format!("{base}/{pkg}/-/{tarball}");
        }
    }
    doc
}

/// Base URL of the incoming request: `http://host[:non-default-port]`.
fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let host = host.strip_suffix(":80").unwrap_or(host);
    format!("http://{host}")
}

/// Resolve `..` and `.` lexically, without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Case-insensitive string-prefix containment check.
fn path_has_prefix(path: &Path, prefix: &Path) -> bool {
    let path = path.to_string_lossy().to_lowercase();
    let prefix = prefix.to_string_lossy().to_lowercase();
    path.starts_with(&prefix)
}
