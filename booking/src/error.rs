//! Booking error taxonomy and its HTTP mapping.

use crate::payments::providers::ProviderError;
use crate::store::StoreError;
use crate::types::{BookingId, CourtId, ReservationStatus};
use courtside_web::AppError;

/// Errors raised by booking and payment operations.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// Malformed input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Court, booking or intent does not exist (or is hidden from the caller)
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of record
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Caller may not act on this record
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Slot held or paid by another booking
    #[error("slot on court {court_id} is already taken")]
    SlotConflict {
        /// Contested court
        court_id: CourtId,
    },

    /// Booking is paid or cancelled
    #[error("booking {booking_id} is already {status}")]
    AlreadyFinalized {
        /// Booking
        booking_id: BookingId,
        /// Its final status
        status: ReservationStatus,
    },

    /// No usable payment account, or booking cannot be paid any more
    #[error("payment unavailable: {0}")]
    PaymentUnavailable(String),

    /// Payment provider call or callback failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Unexpected condition
    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Shorthand for [`BookingError::NotFound`].
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Whether re-running the whole transaction may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Serialization))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::SlotConflict { .. } => "slot_conflict",
            Self::AlreadyFinalized { .. } => "already_finalized",
            Self::PaymentUnavailable(_) => "payment_unavailable",
            Self::Provider(_) => "provider",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(message) => {
                Self::bad_request(message).with_code("VALIDATION_ERROR")
            }
            BookingError::NotFound { resource, id } => Self::not_found(resource, id),
            BookingError::Forbidden(message) => Self::forbidden(message),
            BookingError::SlotConflict { .. } => {
                Self::conflict(err.to_string()).with_code("SLOT_CONFLICT")
            }
            BookingError::AlreadyFinalized { .. } => {
                Self::bad_request(err.to_string()).with_code("ALREADY_FINALIZED")
            }
            BookingError::PaymentUnavailable(message) => {
                Self::conflict(message).with_code("PAYMENT_UNAVAILABLE")
            }
            BookingError::Provider(ProviderError::InvalidSignature) => {
                Self::forbidden("Invalid callback signature")
            }
            BookingError::Provider(ProviderError::MalformedCallback(message)) => {
                Self::bad_request(message).with_code("MALFORMED_CALLBACK")
            }
            BookingError::Provider(source) => Self::internal("Payment provider error")
                .with_code("PROVIDER_ERROR")
                .with_source(source),
            BookingError::Store(source) => {
                Self::internal("An internal error occurred").with_source(source)
            }
            BookingError::Internal(detail) => {
                Self::internal("An internal error occurred").with_source(anyhow::anyhow!(detail))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn status_of(err: BookingError) -> (StatusCode, String) {
        let app: AppError = err.into();
        (app.status(), app.code().to_string())
    }

    #[test]
    fn maps_domain_errors_to_statuses() {
        assert_eq!(
            status_of(BookingError::Validation("bad".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(BookingError::not_found("Booking", BookingId::new())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(BookingError::SlotConflict { court_id: CourtId::new() }),
            (StatusCode::CONFLICT, "SLOT_CONFLICT".to_string())
        );
        assert_eq!(
            status_of(BookingError::AlreadyFinalized {
                booking_id: BookingId::new(),
                status: ReservationStatus::Paid
            }),
            (StatusCode::BAD_REQUEST, "ALREADY_FINALIZED".to_string())
        );
        assert_eq!(
            status_of(BookingError::PaymentUnavailable("none".into())).0,
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn provider_failures_are_opaque() {
        let app: AppError = BookingError::Provider(ProviderError::Rejected(
            "secret sk_live_123 invalid".into(),
        ))
        .into();
        assert_eq!(app.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!app.message().contains("sk_live"));
    }

    #[test]
    fn bad_signature_is_forbidden() {
        let app: AppError = BookingError::Provider(ProviderError::InvalidSignature).into();
        assert_eq!(app.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn only_serialization_failures_retry() {
        assert!(BookingError::Store(StoreError::Serialization).is_retryable());
        assert!(!BookingError::Store(StoreError::Corrupt("x".into())).is_retryable());
        assert!(!BookingError::SlotConflict { court_id: CourtId::new() }.is_retryable());
    }
}
