// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File endpoint handlers.
//!
//! `write` accepts three wire modes with one semantic: JSON (utf8/base64
//! content), raw `application/octet-stream` with the path in the query,
//! and multipart form (`file` part + `path` field). `read` negotiates
//! between a JSON payload and a raw byte stream.

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::listener::{ListenCtx, Payload};
use crate::protocol::{
    ContentEncoding, DeleteFileRequest, FindInFilesRequest, ListFilesRequest, MoveFileRequest,
    PathListPayload, ReadPayload, RenameFileRequest, ReplaceRequest, SearchFilesRequest,
    WriteFileRequest,
};
use axum::body::Body;
use axum::extract::{Multipart, Query, Request, State};
use axum::http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::RequestExt;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct WriteQuery {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub path: String,
    #[serde(default)]
    pub stream: Option<String>,
}

pub async fn write(
    State(ctx): State<Arc<ListenCtx>>,
    Query(query): Query<WriteQuery>,
    req: Request,
) -> Result<Envelope, ApiError> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        return write_multipart(&ctx, req).await;
    }
    if content_type.starts_with("application/octet-stream") {
        return write_binary(&ctx, query, req).await;
    }
    write_json(&ctx, req).await
}

async fn write_json(ctx: &ListenCtx, req: Request) -> Result<Envelope, ApiError> {
    let bytes = collect_body(ctx, req).await?;
    let parsed: WriteFileRequest = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Validation(format!("invalid write request: {}", e)))?;

    let content = match parsed.encoding {
        ContentEncoding::Utf8 => parsed.content.into_bytes(),
        ContentEncoding::Base64 => BASE64_STANDARD
            .decode(parsed.content.as_bytes())
            .map_err(|e| ApiError::Validation(format!("invalid base64 content: {}", e)))?,
    };
    let mode = parsed
        .permissions
        .as_deref()
        .map(parse_mode)
        .transpose()?;

    let payload = ctx.files.write(&parsed.path, &content, mode).await?;
    Ok(Envelope::ok(payload))
}

async fn write_binary(
    ctx: &ListenCtx,
    query: WriteQuery,
    req: Request,
) -> Result<Envelope, ApiError> {
    let path = query
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::Validation("missing path query parameter".to_string()))?;
    let bytes = collect_body(ctx, req).await?;
    let payload = ctx.files.write(&path, &bytes, None).await?;
    Ok(Envelope::ok(payload))
}

async fn write_multipart(ctx: &ListenCtx, req: Request) -> Result<Envelope, ApiError> {
    let mut multipart = req
        .extract::<Multipart, _>()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart request: {}", e)))?;

    let mut path: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart field: {}", e)))?
    {
        match field.name() {
            Some("path") => {
                path = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::Validation(format!("invalid path field: {}", e)))?,
                );
            }
            Some("file") => {
                content = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::Validation(format!("invalid file part: {}", e)))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let path = path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::Validation("missing path field".to_string()))?;
    let content =
        content.ok_or_else(|| ApiError::Validation("missing file part".to_string()))?;
    let payload = ctx.files.write(&path, &content, None).await?;
    Ok(Envelope::ok(payload))
}

pub async fn read(
    State(ctx): State<Arc<ListenCtx>>,
    Query(query): Query<ReadQuery>,
    req: Request,
) -> Result<Response, ApiError> {
    let wants_stream = query
        .stream
        .as_deref()
        .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
        || req
            .headers()
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|accept| accept.contains("application/octet-stream"))
            .unwrap_or(false);

    if wants_stream {
        let (file, size, mime) = ctx.files.open_stream(&query.path).await?;
        let body = Body::from_stream(ReaderStream::new(file));
        return axum::http::Response::builder()
            .header(CONTENT_TYPE, mime)
            .header(CONTENT_LENGTH, size)
            .body(body)
            .map_err(|e| ApiError::Internal(e.to_string()));
    }

    let (bytes, mime) = ctx.files.read(&query.path).await?;
    let size = bytes.len() as u64;
    let payload = match String::from_utf8(bytes) {
        Ok(text) => {
            ReadPayload { content: text, encoding: ContentEncoding::Utf8, size, mime_type: mime }
        }
        Err(err) => ReadPayload {
            content: BASE64_STANDARD.encode(err.into_bytes()),
            encoding: ContentEncoding::Base64,
            size,
            mime_type: mime,
        },
    };
    Ok(Envelope::ok(payload).into_response())
}

pub async fn list(
    State(ctx): State<Arc<ListenCtx>>,
    Payload(req): Payload<ListFilesRequest>,
) -> Result<Envelope, ApiError> {
    let entries = ctx.files.list(&req.path, req.recursive, req.include_hidden).await?;
    Ok(Envelope::ok(entries))
}

pub async fn delete(
    State(ctx): State<Arc<ListenCtx>>,
    Payload(req): Payload<DeleteFileRequest>,
) -> Result<Envelope, ApiError> {
    ctx.files.delete(&req.path, req.recursive).await?;
    Ok(Envelope::ok_empty())
}

pub async fn move_entry(
    State(ctx): State<Arc<ListenCtx>>,
    Payload(req): Payload<MoveFileRequest>,
) -> Result<Envelope, ApiError> {
    ctx.files.move_entry(&req.source, &req.destination, req.overwrite).await?;
    Ok(Envelope::ok_empty())
}

pub async fn rename(
    State(ctx): State<Arc<ListenCtx>>,
    Payload(req): Payload<RenameFileRequest>,
) -> Result<Envelope, ApiError> {
    ctx.files.rename(&req.old_path, &req.new_path).await?;
    Ok(Envelope::ok_empty())
}

pub async fn search(
    State(ctx): State<Arc<ListenCtx>>,
    Payload(req): Payload<SearchFilesRequest>,
) -> Result<Envelope, ApiError> {
    let paths = ctx.files.search(&req.dir, &req.pattern).await?;
    Ok(Envelope::ok(PathListPayload { paths }))
}

pub async fn find(
    State(ctx): State<Arc<ListenCtx>>,
    Payload(req): Payload<FindInFilesRequest>,
) -> Result<Envelope, ApiError> {
    let paths = ctx.files.find(&req.dir, &req.keyword, req.max_results).await?;
    Ok(Envelope::ok(PathListPayload { paths }))
}

pub async fn replace(
    State(ctx): State<Arc<ListenCtx>>,
    Payload(req): Payload<ReplaceRequest>,
) -> Result<Envelope, ApiError> {
    let results = ctx.files.replace(&req.files, &req.from, &req.to).await?;
    Ok(Envelope::ok(results))
}

/// Buffer a request body, bounded above the configured file cap (the
/// engine applies the exact per-file limit).
async fn collect_body(ctx: &ListenCtx, req: Request) -> Result<Vec<u8>, ApiError> {
    let limit = ctx.files.max_file_size().saturating_mul(2).saturating_add(1024 * 1024) as usize;
    let bytes = axum::body::to_bytes(req.into_body(), limit).await.map_err(|_| {
        ApiError::TooLarge(format!(
            "request body exceeds maximum size ({} bytes)",
            ctx.files.max_file_size()
        ))
    })?;
    Ok(bytes.to_vec())
}

/// Octal mode string, e.g. `"755"`.
fn parse_mode(raw: &str) -> Result<u32, ApiError> {
    u32::from_str_radix(raw, 8)
        .map_err(|_| ApiError::Validation(format!("invalid permissions {:?}", raw)))
}
