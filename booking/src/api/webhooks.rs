//! Provider callbacks.
//!
//! `POST /webhooks/:provider` takes the raw body so signatures are checked
//! against the exact bytes the provider signed.

use crate::server::state::AppState;
use crate::types::ProviderKind;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use courtside_web::AppError;

/// Apply a provider callback and answer with the provider's expected ack.
///
/// # Errors
///
/// `404` unknown provider or order reference, `400` malformed payload,
/// `403` bad signature.
#[tracing::instrument(skip(state, headers, body), fields(body_len = body.len()))]
pub async fn provider_webhook(
    Path(provider): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let provider = ProviderKind::parse(&provider).ok_or_else(|| AppError::not_found("Payment provider", &provider))?;
    let ack = state.payments.reconcile(provider, &headers, &body).await?;
    Ok((ack.status, Json(ack.body)))
}
