//! `GET /api/courts/:id/quote?startTime=…&endTime=…`

use crate::pricing::PriceQuote;
use crate::server::state::AppState;
use crate::types::CourtId;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use courtside_web::AppError;
use serde::Deserialize;
use uuid::Uuid;

/// Slot to price.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteQuery {
    /// Slot start
    pub start_time: DateTime<Utc>,
    /// Slot end
    pub end_time: DateTime<Utc>,
}

/// Price a slot without reserving it.
///
/// # Errors
///
/// `400` bad interval, `404` unknown court.
pub async fn quote_price(
    Path(court_id): Path<Uuid>,
    State(state): State<AppState>,
    query: Result<Query<QuoteQuery>, QueryRejection>,
) -> Result<Json<PriceQuote>, AppError> {
    let Query(slot) = query?;
    let quote = state
        .engine
        .quote(CourtId::from_uuid(court_id), slot.start_time, slot.end_time)
        .await?;
    Ok(Json(quote))
}
