//! HTTP handlers for image upload and viewing.
//! Extracts the multipart payload and the caller's identity, then
//! delegates fingerprinting, dedup, and tier fallback to `ImageStore`.

use crate::{
    errors::AppError,
    models::{identity::OwnerId, upload::UploadResponse},
    services::image_store::ImageStoreError,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

/// Query params accepted by the view endpoint.
#[derive(Debug, Deserialize)]
pub struct ViewQuery {
    /// Owner hint guiding (not authorizing) the first lookup tier.
    pub uid: Option<String>,
}

/// `POST /api/v1/files/upload` — authenticated multipart upload with a
/// single `file` field. `201` on a fresh write, `200` on dedup reuse.
pub async fn upload_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let Some(owner) = state.auth.verify(&headers) else {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "authentication required",
        ));
    };

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let declared_name = field.file_name().unwrap_or_default().to_string();
        let declared_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("failed to read file field: {err}")))?;
        upload = Some((declared_name, declared_type, bytes));
        break;
    }
    let Some((declared_name, declared_type, bytes)) = upload else {
        return Err(ImageStoreError::MissingContent.into());
    };

    let outcome = state
        .images
        .upload(&owner, bytes, &declared_name, declared_type.as_deref())
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let body = Json(UploadResponse {
        url: outcome.url,
        fingerprint: outcome.fingerprint,
    });
    Ok((status, body).into_response())
}

/// `GET /api/v1/files/view/{file_name}?uid={owner}` — serve stored image
/// bytes. Tolerates anonymous callers; a verified identity beats the
/// `uid` query hint when both are present.
pub async fn view_image(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    Query(query): Query<ViewQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let owner = state
        .auth
        .verify(&headers)
        .or_else(|| query.uid.as_deref().and_then(OwnerId::new));

    let image = state.images.resolve(&file_name, owner.as_ref()).await?;

    let mut response = Response::new(Body::from(image.bytes));
    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&image.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    resp_headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
    // Content addressing makes the bytes at a given reference immutable,
    // so clients may cache for a year.
    resp_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );
    resp_headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    resp_headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    if let Some(stored_at) = image.stored_at {
        if let Ok(value) = HeaderValue::from_str(&stored_at.to_rfc2822()) {
            resp_headers.insert(header::LAST_MODIFIED, value);
        }
    }

    Ok(response)
}
