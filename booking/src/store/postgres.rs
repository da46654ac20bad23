//! PostgreSQL booking store.
//!
//! Transactions run at `SERIALIZABLE`, so the conflict check and the booking
//! insert of two racing requests cannot both commit: Postgres aborts one of
//! them with SQLSTATE `40001`, which surfaces as [`StoreError::Serialization`]
//! and is retried by the engine.

use super::{BookingStore, BookingTx, StoreError, StoreFuture};
use crate::statistics::StatisticDelta;
use crate::types::{
    AccountOwner, Booking, BookingId, BookingStatus, Club, ClubDailyStatistic, ClubId, Court,
    CourtContext, CourtId, Currency, IntentStatus, Interval, Money, OrganizationId, PaymentAccount,
    PaymentAccountId, PaymentIntent, PaymentIntentId, PaymentStatus, PriceRule, PriceRuleId,
    ProviderKind, ReservationStatus, Secret, UserId,
};
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use uuid::Uuid;

const BOOKING_COLUMNS: &str = "id, court_id, club_id, user_id, coach_id, start_time, end_time, \
     price_cents, currency, sport_type, status, booking_status, payment_status, \
     reservation_expires_at, created_at, updated_at";

const INTENT_COLUMNS: &str = "id, booking_id, account_id, provider, order_reference, amount_cents, \
     currency, status, checkout_url, provider_reference, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, provider, club_id, organization_id, merchant_id, secret_key, \
     webhook_secret, verified, active, created_at";

/// Booking store backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresBookingStore {
    pool: Arc<PgPool>,
}

impl PostgresBookingStore {
    /// Creates a new `PostgresBookingStore`.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }
}

impl BookingStore for PostgresBookingStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn BookingTx>> {
        Box::pin(async move {
            let tx = courtside_postgres::begin_serializable(&self.pool).await?;
            Ok(Box::new(PgTx { tx }) as Box<dyn BookingTx>)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
            Ok(())
        })
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// ============================================================================
// Row decoding
// ============================================================================

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("unexpected {what} '{value}'"))
}

fn currency(row: &PgRow, column: &str) -> Result<Currency, StoreError> {
    let raw: String = row.try_get(column)?;
    Currency::parse(&raw).ok_or_else(|| corrupt("currency", &raw))
}

fn weekday_from_iso(n: i16) -> Option<Weekday> {
    Some(match n {
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        6 => Weekday::Sat,
        7 => Weekday::Sun,
        _ => return None,
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking, StoreError> {
    let start: DateTime<Utc> = row.try_get("start_time")?;
    let end: DateTime<Utc> = row.try_get("end_time")?;
    let id = BookingId::from_uuid(row.try_get("id")?);
    let status: String = row.try_get("status")?;
    let booking_status: String = row.try_get("booking_status")?;
    let payment_status: String = row.try_get("payment_status")?;

    Ok(Booking {
        id,
        court_id: CourtId::from_uuid(row.try_get("court_id")?),
        club_id: ClubId::from_uuid(row.try_get("club_id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        coach_id: row.try_get::<Option<Uuid>, _>("coach_id")?.map(UserId::from_uuid),
        interval: Interval::new(start, end).ok_or_else(|| corrupt("interval of booking", &id.to_string()))?,
        price: Money::from_cents(row.try_get("price_cents")?),
        currency: currency(row, "currency")?,
        sport_type: row.try_get("sport_type")?,
        status: ReservationStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        booking_status: BookingStatus::parse(&booking_status)
            .ok_or_else(|| corrupt("booking_status", &booking_status))?,
        payment_status: PaymentStatus::parse(&payment_status)
            .ok_or_else(|| corrupt("payment_status", &payment_status))?,
        reservation_expires_at: row.try_get("reservation_expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn intent_from_row(row: &PgRow) -> Result<PaymentIntent, StoreError> {
    let provider: String = row.try_get("provider")?;
    let status: String = row.try_get("status")?;
    Ok(PaymentIntent {
        id: PaymentIntentId::from_uuid(row.try_get("id")?),
        booking_id: BookingId::from_uuid(row.try_get("booking_id")?),
        account_id: PaymentAccountId::from_uuid(row.try_get("account_id")?),
        provider: ProviderKind::parse(&provider).ok_or_else(|| corrupt("provider", &provider))?,
        order_reference: row.try_get("order_reference")?,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        currency: currency(row, "currency")?,
        status: IntentStatus::parse(&status).ok_or_else(|| corrupt("intent status", &status))?,
        checkout_url: row.try_get("checkout_url")?,
        provider_reference: row.try_get("provider_reference")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<PaymentAccount, StoreError> {
    let provider: String = row.try_get("provider")?;
    let club_id: Option<Uuid> = row.try_get("club_id")?;
    let organization_id: Option<Uuid> = row.try_get("organization_id")?;
    let owner = match (club_id, organization_id) {
        (Some(club), _) => AccountOwner::Club(ClubId::from_uuid(club)),
        (None, Some(org)) => AccountOwner::Organization(OrganizationId::from_uuid(org)),
        (None, None) => return Err(corrupt("account owner", "none")),
    };
    Ok(PaymentAccount {
        id: PaymentAccountId::from_uuid(row.try_get("id")?),
        provider: ProviderKind::parse(&provider).ok_or_else(|| corrupt("provider", &provider))?,
        owner,
        merchant_id: row.try_get("merchant_id")?,
        secret_key: Secret::new(row.try_get::<String, _>("secret_key")?),
        webhook_secret: row.try_get::<Option<String>, _>("webhook_secret")?.map(Secret::new),
        verified: row.try_get("verified")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn rule_from_row(row: &PgRow) -> Result<PriceRule, StoreError> {
    let days: Vec<i16> = row.try_get("days_of_week")?;
    let days_of_week = days
        .into_iter()
        .map(|d| weekday_from_iso(d).ok_or_else(|| corrupt("weekday", &d.to_string())))
        .collect::<Result<_, _>>()?;
    Ok(PriceRule {
        id: PriceRuleId::from_uuid(row.try_get("id")?),
        court_id: CourtId::from_uuid(row.try_get("court_id")?),
        days_of_week,
        valid_from: row.try_get("valid_from")?,
        valid_until: row.try_get("valid_until")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        created_at: row.try_get("created_at")?,
    })
}

fn statistic_from_row(row: &PgRow) -> Result<ClubDailyStatistic, StoreError> {
    Ok(ClubDailyStatistic {
        club_id: ClubId::from_uuid(row.try_get("club_id")?),
        date: row.try_get("date")?,
        bookings_created: row.try_get("bookings_created")?,
        bookings_cancelled: row.try_get("bookings_cancelled")?,
        revenue: Money::from_cents(row.try_get("revenue_cents")?),
        active_users: row.try_get("active_users")?,
    })
}

// ============================================================================
// Transaction
// ============================================================================

impl BookingTx for PgTx {
    fn court_context(&mut self, court_id: CourtId) -> StoreFuture<'_, Option<CourtContext>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT c.id, c.club_id, c.name, c.sport_type, c.default_price_cents, c.active, \
                        k.organization_id, k.name AS club_name, k.utc_offset_minutes, k.currency \
                 FROM courts c JOIN clubs k ON k.id = c.club_id \
                 WHERE c.id = $1",
            )
            .bind(court_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;

            row.map(|row| -> Result<CourtContext, StoreError> {
                let club_id = ClubId::from_uuid(row.try_get("club_id")?);
                Ok(CourtContext {
                    court: Court {
                        id: CourtId::from_uuid(row.try_get("id")?),
                        club_id,
                        name: row.try_get("name")?,
                        sport_type: row.try_get("sport_type")?,
                        default_price: Money::from_cents(row.try_get("default_price_cents")?),
                        active: row.try_get("active")?,
                    },
                    club: Club {
                        id: club_id,
                        organization_id: OrganizationId::from_uuid(row.try_get("organization_id")?),
                        name: row.try_get("club_name")?,
                        utc_offset_minutes: row.try_get("utc_offset_minutes")?,
                        currency: currency(&row, "currency")?,
                    },
                })
            })
            .transpose()
        })
    }

    fn price_rules(&mut self, court_id: CourtId) -> StoreFuture<'_, Vec<PriceRule>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, court_id, days_of_week, valid_from, valid_until, start_time, end_time, \
                        price_cents, created_at \
                 FROM price_rules WHERE court_id = $1",
            )
            .bind(court_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
            rows.iter().map(rule_from_row).collect()
        })
    }

    fn booking(&mut self, id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await?;
            row.as_ref().map(booking_from_row).transpose()
        })
    }

    fn overlapping_bookings(&mut self, court_id: CourtId, interval: Interval) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings \
                 WHERE court_id = $1 AND status <> 'cancelled' \
                   AND start_time < $3 AND end_time > $2"
            ))
            .bind(court_id.as_uuid())
            .bind(interval.start())
            .bind(interval.end())
            .fetch_all(&mut *self.tx)
            .await?;
            rows.iter().map(booking_from_row).collect()
        })
    }

    fn reservation_for_slot(
        &mut self,
        user_id: UserId,
        court_id: CourtId,
        interval: Interval,
    ) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings \
                 WHERE user_id = $1 AND court_id = $2 AND start_time = $3 AND end_time = $4 \
                   AND status = 'reserved' \
                 ORDER BY created_at DESC LIMIT 1"
            ))
            .bind(user_id.as_uuid())
            .bind(court_id.as_uuid())
            .bind(interval.start())
            .bind(interval.end())
            .fetch_optional(&mut *self.tx)
            .await?;
            row.as_ref().map(booking_from_row).transpose()
        })
    }

    fn insert_booking(&mut self, booking: &Booking) -> StoreFuture<'_, ()> {
        let b = booking.clone();
        Box::pin(async move {
            sqlx::query(&format!(
                "INSERT INTO bookings ({BOOKING_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
            ))
            .bind(b.id.as_uuid())
            .bind(b.court_id.as_uuid())
            .bind(b.club_id.as_uuid())
            .bind(b.user_id.as_uuid())
            .bind(b.coach_id.map(|c| *c.as_uuid()))
            .bind(b.interval.start())
            .bind(b.interval.end())
            .bind(b.price.cents())
            .bind(b.currency.as_str())
            .bind(&b.sport_type)
            .bind(b.status.as_str())
            .bind(b.booking_status.as_str())
            .bind(b.payment_status.as_str())
            .bind(b.reservation_expires_at)
            .bind(b.created_at)
            .bind(b.updated_at)
            .execute(&mut *self.tx)
            .await?;
            Ok(())
        })
    }

    fn update_booking(&mut self, booking: &Booking) -> StoreFuture<'_, ()> {
        let b = booking.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE bookings SET coach_id = $2, price_cents = $3, status = $4, booking_status = $5, \
                        payment_status = $6, reservation_expires_at = $7, updated_at = $8 \
                 WHERE id = $1",
            )
            .bind(b.id.as_uuid())
            .bind(b.coach_id.map(|c| *c.as_uuid()))
            .bind(b.price.cents())
            .bind(b.status.as_str())
            .bind(b.booking_status.as_str())
            .bind(b.payment_status.as_str())
            .bind(b.reservation_expires_at)
            .bind(b.updated_at)
            .execute(&mut *self.tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Corrupt(format!("booking {} vanished", b.id)));
            }
            Ok(())
        })
    }

    fn purgeable_reservations(&mut self, cutoff: DateTime<Utc>, limit: i64) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings b \
                 WHERE b.status = 'reserved' AND b.reservation_expires_at < $1 \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM payment_intents i \
                       WHERE i.booking_id = b.id AND i.status IN ('pending', 'expired')) \
                 ORDER BY b.reservation_expires_at \
                 LIMIT $2"
            ))
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;
            rows.iter().map(booking_from_row).collect()
        })
    }

    fn delete_booking(&mut self, id: BookingId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            // Intents go with the booking via ON DELETE CASCADE.
            sqlx::query("DELETE FROM bookings WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&mut *self.tx)
                .await?;
            Ok(())
        })
    }

    fn payment_accounts(
        &mut self,
        provider: ProviderKind,
        club_id: ClubId,
        organization_id: OrganizationId,
    ) -> StoreFuture<'_, Vec<PaymentAccount>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM payment_accounts \
                 WHERE provider = $1 AND (club_id = $2 OR organization_id = $3)"
            ))
            .bind(provider.as_str())
            .bind(club_id.as_uuid())
            .bind(organization_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
            rows.iter().map(account_from_row).collect()
        })
    }

    fn payment_account(&mut self, id: PaymentAccountId) -> StoreFuture<'_, Option<PaymentAccount>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM payment_accounts WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await?;
            row.as_ref().map(account_from_row).transpose()
        })
    }

    fn insert_intent(&mut self, intent: &PaymentIntent) -> StoreFuture<'_, ()> {
        let i = intent.clone();
        Box::pin(async move {
            sqlx::query(&format!(
                "INSERT INTO payment_intents ({INTENT_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
            ))
            .bind(i.id.as_uuid())
            .bind(i.booking_id.as_uuid())
            .bind(i.account_id.as_uuid())
            .bind(i.provider.as_str())
            .bind(&i.order_reference)
            .bind(i.amount.cents())
            .bind(i.currency.as_str())
            .bind(i.status.as_str())
            .bind(&i.checkout_url)
            .bind(&i.provider_reference)
            .bind(i.created_at)
            .bind(i.updated_at)
            .execute(&mut *self.tx)
            .await?;
            Ok(())
        })
    }

    fn update_intent(&mut self, intent: &PaymentIntent) -> StoreFuture<'_, ()> {
        let i = intent.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE payment_intents SET status = $2, checkout_url = $3, provider_reference = $4, \
                        updated_at = $5 \
                 WHERE id = $1",
            )
            .bind(i.id.as_uuid())
            .bind(i.status.as_str())
            .bind(&i.checkout_url)
            .bind(&i.provider_reference)
            .bind(i.updated_at)
            .execute(&mut *self.tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Corrupt(format!("intent {} vanished", i.id)));
            }
            Ok(())
        })
    }

    fn intent_by_reference(&mut self, order_reference: &str) -> StoreFuture<'_, Option<PaymentIntent>> {
        let order_reference = order_reference.to_string();
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE order_reference = $1"
            ))
            .bind(&order_reference)
            .fetch_optional(&mut *self.tx)
            .await?;
            row.as_ref().map(intent_from_row).transpose()
        })
    }

    fn intents_for_booking(&mut self, booking_id: BookingId) -> StoreFuture<'_, Vec<PaymentIntent>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE booking_id = $1 \
                 ORDER BY created_at, order_reference"
            ))
            .bind(booking_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
            rows.iter().map(intent_from_row).collect()
        })
    }

    fn apply_statistic(&mut self, club_id: ClubId, date: NaiveDate, delta: StatisticDelta) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO club_daily_statistics \
                     (club_id, date, bookings_created, bookings_cancelled, revenue_cents, active_users) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (club_id, date) DO UPDATE SET \
                     bookings_created = club_daily_statistics.bookings_created + EXCLUDED.bookings_created, \
                     bookings_cancelled = club_daily_statistics.bookings_cancelled + EXCLUDED.bookings_cancelled, \
                     revenue_cents = club_daily_statistics.revenue_cents + EXCLUDED.revenue_cents, \
                     active_users = club_daily_statistics.active_users + EXCLUDED.active_users",
            )
            .bind(club_id.as_uuid())
            .bind(date)
            .bind(delta.bookings_created)
            .bind(delta.bookings_cancelled)
            .bind(delta.revenue.cents())
            .bind(delta.active_users)
            .execute(&mut *self.tx)
            .await?;
            Ok(())
        })
    }

    fn mark_active_user(&mut self, club_id: ClubId, date: NaiveDate, user_id: UserId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO club_daily_active_users (club_id, date, user_id) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(club_id.as_uuid())
            .bind(date)
            .bind(user_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn statistic(&mut self, club_id: ClubId, date: NaiveDate) -> StoreFuture<'_, Option<ClubDailyStatistic>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT club_id, date, bookings_created, bookings_cancelled, revenue_cents, active_users \
                 FROM club_daily_statistics WHERE club_id = $1 AND date = $2",
            )
            .bind(club_id.as_uuid())
            .bind(date)
            .fetch_optional(&mut *self.tx)
            .await?;
            row.as_ref().map(statistic_from_row).transpose()
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx.commit().await?;
            Ok(())
        })
    }
}
