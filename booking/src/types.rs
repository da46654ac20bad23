//! Domain types for court booking.
//!
//! Identifiers, money, slots and the persisted records the engine works on:
//! bookings, courts and clubs, price rules, payment accounts and intents, and
//! per-club daily statistics.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a booking
    BookingId
);
id_type!(
    /// Unique identifier for a court
    CourtId
);
id_type!(
    /// Unique identifier for a club
    ClubId
);
id_type!(
    /// Unique identifier for an organization owning clubs
    OrganizationId
);
id_type!(
    /// Unique identifier for a user (players and coaches alike)
    UserId
);
id_type!(
    /// Unique identifier for a price rule
    PriceRuleId
);
id_type!(
    /// Unique identifier for a payment account
    PaymentAccountId
);
id_type!(
    /// Unique identifier for a payment intent
    PaymentIntentId
);

// ============================================================================
// Value Objects
// ============================================================================

/// Money amount in minor units (cents, kopiyky, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates money from minor units
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Amount in minor units
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Adds two amounts (saturating)
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Renders the amount in major units with the currency's decimals,
    /// e.g. `7000` with two decimals is `"70.00"`.
    #[must_use]
    pub fn to_major_string(&self, currency: &Currency) -> String {
        let exponent = currency.minor_exponent();
        if exponent == 0 {
            return self.0.to_string();
        }
        let divisor = 10_i64.pow(exponent);
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let divisor = divisor.unsigned_abs();
        format!(
            "{sign}{}.{:0width$}",
            abs / divisor,
            abs % divisor,
            width = exponent as usize
        )
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 currency code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Parse a three-letter currency code (case-insensitive).
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        (code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()))
            .then(|| Self(code.to_ascii_uppercase()))
    }

    /// Upper-case currency code
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of decimals in the currency's minor unit.
    #[must_use]
    pub fn minor_exponent(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" => 0,
            "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open time interval `[start, end)` in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    /// Creates an interval, or `None` unless `start < end`.
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Inclusive start
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Length in whole minutes
    #[must_use]
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Whether the intervals share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// UTC calendar dates the interval touches.
    ///
    /// An interval ending exactly at midnight does not touch the next day.
    #[must_use]
    pub fn utc_dates(&self) -> Vec<NaiveDate> {
        let first = self.start.date_naive();
        let last = (self.end - Duration::nanoseconds(1)).date_naive();
        first.iter_days().take_while(|d| *d <= last).collect()
    }
}

/// Redacted secret string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reveal the secret. Never log the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

// ============================================================================
// Clubs and Courts
// ============================================================================

/// A club operating courts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Club {
    /// Club ID
    pub id: ClubId,
    /// Owning organization
    pub organization_id: OrganizationId,
    /// Display name
    pub name: String,
    /// Offset of the club's local clock from UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Currency prices are quoted in
    pub currency: Currency,
}

/// A bookable court.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Court {
    /// Court ID
    pub id: CourtId,
    /// Owning club
    pub club_id: ClubId,
    /// Display name
    pub name: String,
    /// Sport played on the court
    pub sport_type: String,
    /// Hourly price when no rule matches
    pub default_price: Money,
    /// Inactive courts cannot be booked
    pub active: bool,
}

/// A court together with its club.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CourtContext {
    /// The court
    pub court: Court,
    /// The club owning it
    pub club: Club,
}

// ============================================================================
// Price Rules
// ============================================================================

/// Time-windowed hourly price for a court.
///
/// A rule applies on the listed weekdays (all days when empty) between the
/// optional validity dates, and only to slots lying entirely inside
/// `[start_time, end_time)` on the club's local clock. An `end_time` of
/// `00:00` means midnight at the end of the day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRule {
    /// Rule ID
    pub id: PriceRuleId,
    /// Court the rule prices
    pub court_id: CourtId,
    /// Weekdays the rule applies on
    pub days_of_week: Vec<Weekday>,
    /// First local date the rule applies (inclusive)
    pub valid_from: Option<NaiveDate>,
    /// Last local date the rule applies (inclusive)
    pub valid_until: Option<NaiveDate>,
    /// Window start (local clock)
    pub start_time: NaiveTime,
    /// Window end (local clock)
    pub end_time: NaiveTime,
    /// Hourly price inside the window
    pub price: Money,
    /// Creation time, used to break specificity ties
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Bookings
// ============================================================================

/// Combined reservation/payment status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Held pending payment
    Reserved,
    /// Paid
    Paid,
    /// Cancelled (terminal)
    Cancelled,
}

/// Whether the booked session is still ahead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Session not yet over
    Upcoming,
    /// Session over
    Completed,
    /// Cancelled
    Cancelled,
}

/// Money state of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Not paid
    Unpaid,
    /// Paid
    Paid,
    /// Refunded
    Refunded,
}

macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            /// Wire/database representation
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            /// Parse the wire/database representation
            #[must_use]
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($s => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(ReservationStatus { Reserved => "reserved", Paid => "paid", Cancelled => "cancelled" });
str_enum!(BookingStatus { Upcoming => "upcoming", Completed => "completed", Cancelled => "cancelled" });
str_enum!(PaymentStatus { Unpaid => "unpaid", Paid => "paid", Refunded => "refunded" });

/// A court booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Booking ID
    pub id: BookingId,
    /// Booked court
    pub court_id: CourtId,
    /// Club owning the court
    pub club_id: ClubId,
    /// Player the booking belongs to
    pub user_id: UserId,
    /// Optional coach
    pub coach_id: Option<UserId>,
    /// Booked slot
    pub interval: Interval,
    /// Total price in minor units
    pub price: Money,
    /// Currency of `price`
    pub currency: Currency,
    /// Sport played
    pub sport_type: String,
    /// Combined status
    pub status: ReservationStatus,
    /// Session status
    pub booking_status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// End of the reservation hold, while reserved
    pub reservation_expires_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Whether this booking keeps others out of its slot at `now`.
    #[must_use]
    pub fn blocks_slot(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ReservationStatus::Paid => true,
            ReservationStatus::Reserved => self.reservation_expires_at.is_some_and(|at| at > now),
            ReservationStatus::Cancelled => false,
        }
    }

    /// Whether a reservation's hold has lapsed.
    #[must_use]
    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Reserved
            && self.reservation_expires_at.is_none_or(|at| at <= now)
    }

    /// Session status as observed at `now`.
    #[must_use]
    pub fn booking_status_at(&self, now: DateTime<Utc>) -> BookingStatus {
        match self.booking_status {
            BookingStatus::Upcoming if self.interval.end() <= now => BookingStatus::Completed,
            other => other,
        }
    }
}

// ============================================================================
// Payments
// ============================================================================

/// Supported payment providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Stripe Checkout
    Stripe,
    /// `WayForPay` invoices
    Wayforpay,
}

str_enum!(ProviderKind { Stripe => "stripe", Wayforpay => "wayforpay" });

/// Scope owning a payment account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AccountOwner {
    /// Account of a single club
    Club(ClubId),
    /// Account shared by an organization's clubs
    Organization(OrganizationId),
}

/// Merchant credentials for one provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentAccount {
    /// Account ID
    pub id: PaymentAccountId,
    /// Provider the credentials belong to
    pub provider: ProviderKind,
    /// Owning scope
    pub owner: AccountOwner,
    /// Merchant identifier (`WayForPay` merchant account, Stripe account id)
    pub merchant_id: String,
    /// API secret (Stripe secret key, `WayForPay` merchant secret)
    pub secret_key: Secret,
    /// Webhook signing secret, when distinct from the API secret
    pub webhook_secret: Option<Secret>,
    /// Credentials were checked against the provider
    pub verified: bool,
    /// Account enabled by the club
    pub active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl PaymentAccount {
    /// Whether the account can take payments.
    #[must_use]
    pub const fn usable(&self) -> bool {
        self.verified && self.active
    }

    /// Secret used to check inbound callbacks.
    #[must_use]
    pub fn callback_secret(&self) -> &Secret {
        self.webhook_secret.as_ref().unwrap_or(&self.secret_key)
    }
}

/// Status of a payment attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Waiting for the provider
    Pending,
    /// Provider reported success
    Succeeded,
    /// Provider reported failure
    Failed,
    /// Superseded by a newer attempt
    Expired,
}

str_enum!(IntentStatus {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
    Expired => "expired",
});

impl IntentStatus {
    /// Whether the provider already settled the intent.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A tracked attempt to collect payment for a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Intent ID
    pub id: PaymentIntentId,
    /// Booking being paid
    pub booking_id: BookingId,
    /// Account collecting the money
    pub account_id: PaymentAccountId,
    /// Provider
    pub provider: ProviderKind,
    /// Unique reference shared with the provider
    pub order_reference: String,
    /// Amount in minor units
    pub amount: Money,
    /// Currency
    pub currency: Currency,
    /// Status
    pub status: IntentStatus,
    /// Hosted checkout page
    pub checkout_url: Option<String>,
    /// Provider-side id (session id, invoice id)
    pub provider_reference: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Order reference for a new intent: booking id plus a millisecond timestamp.
#[must_use]
pub fn order_reference(booking_id: BookingId, now: DateTime<Utc>) -> String {
    format!("{booking_id}-{}", now.timestamp_millis())
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-club per-day counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubDailyStatistic {
    /// Club
    pub club_id: ClubId,
    /// UTC date
    pub date: NaiveDate,
    /// Bookings created touching this date
    pub bookings_created: i64,
    /// Bookings cancelled, by start date
    pub bookings_cancelled: i64,
    /// Collected revenue, by start date
    pub revenue: Money,
    /// Distinct users who booked
    pub active_users: i64,
}

impl ClubDailyStatistic {
    /// All-zero counters for `(club_id, date)`.
    #[must_use]
    pub const fn empty(club_id: ClubId, date: NaiveDate) -> Self {
        Self {
            club_id,
            date,
            bookings_created: 0,
            bookings_cancelled: 0,
            revenue: Money::ZERO,
            active_users: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn interval_requires_start_before_end() {
        assert!(Interval::new(at(10, 0), at(10, 0)).is_none());
        assert!(Interval::new(at(11, 0), at(10, 0)).is_none());
        assert_eq!(Interval::new(at(10, 0), at(11, 30)).unwrap().duration_minutes(), 90);
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let a = Interval::new(at(10, 0), at(11, 0)).unwrap();
        let b = Interval::new(at(11, 0), at(12, 0)).unwrap();
        let c = Interval::new(at(10, 30), at(11, 30)).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn interval_dates_exclude_midnight_end() {
        let day = Interval::new(at(22, 0), Utc.with_ymd_and_hms(2025, 3, 11, 0, 0, 0).unwrap()).unwrap();
        assert_eq!(day.utc_dates(), vec![NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()]);

        let overnight =
            Interval::new(at(23, 0), Utc.with_ymd_and_hms(2025, 3, 11, 1, 0, 0).unwrap()).unwrap();
        assert_eq!(overnight.utc_dates().len(), 2);
    }

    #[test]
    fn money_major_string() {
        let uah = Currency::parse("uah").unwrap();
        assert_eq!(Money::from_cents(7000).to_major_string(&uah), "70.00");
        assert_eq!(Money::from_cents(5).to_major_string(&uah), "0.05");
        let jpy = Currency::parse("JPY").unwrap();
        assert_eq!(Money::from_cents(1500).to_major_string(&jpy), "1500");
    }

    #[test]
    fn currency_rejects_garbage() {
        assert!(Currency::parse("US").is_none());
        assert!(Currency::parse("U$D").is_none());
    }

    #[test]
    fn secret_is_redacted() {
        assert_eq!(format!("{:?}", Secret::new("sk_live_123")), "Secret(***)");
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(IntentStatus::parse("expired"), Some(IntentStatus::Expired));
        assert_eq!(ProviderKind::parse("wayforpay"), Some(ProviderKind::Wayforpay));
        assert_eq!(ReservationStatus::Paid.as_str(), "paid");
        assert_eq!(ProviderKind::parse("paypal"), None);
    }

    #[test]
    fn order_reference_embeds_booking_id() {
        let id = BookingId::new();
        let reference = order_reference(id, at(10, 0));
        assert!(reference.starts_with(&id.to_string()));
        assert!(reference.ends_with(&at(10, 0).timestamp_millis().to_string()));
    }
}
