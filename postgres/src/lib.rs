//! `PostgreSQL` plumbing for Courtside.
//!
//! Booking creation relies on the database, not on in-process locks, to keep
//! two overlapping reservations from both committing. This crate provides the
//! pieces every Postgres-backed store needs for that:
//!
//! - Connection pooling from [`PoolSettings`]
//! - [`begin_serializable`] to open a `SERIALIZABLE` transaction
//! - [`is_retryable`] to recognise serialization failures and deadlocks, which
//!   the caller answers by re-running the whole unit of work
//!
//! # Example
//!
//! ```ignore
//! use courtside_postgres::{begin_serializable, connect, PoolSettings};
//!
//! async fn example() -> Result<(), sqlx::Error> {
//!     let pool = connect(&PoolSettings::new("postgres://localhost/courtside")).await?;
//!     let mut tx = begin_serializable(&pool).await?;
//!     sqlx::query("SELECT 1").execute(&mut *tx).await?;
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

/// SQLSTATE for `serialization_failure`.
pub const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE for `deadlock_detected`.
pub const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE for `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for `exclusion_violation`.
pub const EXCLUSION_VIOLATION: &str = "23P01";

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
    /// Connections idle longer than this are closed
    pub idle_timeout: Duration,
}

impl PoolSettings {
    /// Settings with default pool sizes for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Open a connection pool.
///
/// # Errors
///
/// Returns an error if the database cannot be reached.
pub async fn connect(settings: &PoolSettings) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        "Connecting to PostgreSQL"
    );
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.connect_timeout)
        .idle_timeout(settings.idle_timeout)
        .connect(&settings.url)
        .await
}

/// Begin a transaction at `SERIALIZABLE` isolation.
///
/// # Errors
///
/// Returns an error if a connection cannot be acquired or the isolation level
/// cannot be set.
pub async fn begin_serializable(pool: &PgPool) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// SQLSTATE of a database error, if `err` carries one.
#[must_use]
pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

/// Whether a SQLSTATE means "abort and re-run the transaction".
#[must_use]
pub fn is_retryable_code(code: &str) -> bool {
    matches!(code, SERIALIZATION_FAILURE | DEADLOCK_DETECTED)
}

/// Whether `err` is a serialization failure or deadlock.
#[must_use]
pub fn is_retryable(err: &sqlx::Error) -> bool {
    sqlstate(err).is_some_and(|code| is_retryable_code(&code))
}

/// Whether `err` is a unique or exclusion constraint violation.
#[must_use]
pub fn is_constraint_violation(err: &sqlx::Error) -> bool {
    sqlstate(err).is_some_and(|code| code == UNIQUE_VIOLATION || code == EXCLUSION_VIOLATION)
}
