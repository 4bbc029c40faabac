//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that round-trips the object backend

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that performs a best-effort write/read/delete round
/// trip through the object backend under a throwaway probe key.
///
/// Returns JSON describing the check. HTTP 200 when it passes,
/// HTTP 503 when it fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.images.backend();
    let probe_key = format!("probe/readyz-{}", Uuid::new_v4());

    let storage_check = match backend
        .put(&probe_key, Bytes::from_static(b"readyz"), "text/plain")
        .await
    {
        Ok(()) => match backend.get(&probe_key).await {
            Ok(Some(obj)) if obj.bytes.as_ref() == b"readyz" => {
                // try to remove the probe object; report but don't fail on it
                match backend.delete(&probe_key).await {
                    Ok(()) => (true, None::<String>),
                    Err(e) => (true, Some(format!("could not remove probe object: {}", e))),
                }
            }
            Ok(Some(_)) => {
                let _ = backend.delete(&probe_key).await;
                (false, Some("probe content mismatch".to_string()))
            }
            Ok(None) => (false, Some("probe object missing after write".to_string())),
            Err(e) => {
                let _ = backend.delete(&probe_key).await;
                (false, Some(format!("could not read probe object: {}", e)))
            }
        },
        Err(e) => (false, Some(format!("could not write probe object: {}", e))),
    };

    let storage_ok = storage_check.0;
    let mut checks = HashMap::new();
    checks.insert(
        "storage",
        CheckStatus {
            ok: storage_ok,
            error: storage_check.1,
        },
    );

    let body = ReadyResponse {
        status: if storage_ok { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
