//! Payment account resolution.
//!
//! The account is always chosen server-side: a usable account of the club
//! wins over one of its organization, and within a scope the newest wins.

use crate::error::BookingError;
use crate::store::BookingTx;
use crate::types::{AccountOwner, Club, PaymentAccount, ProviderKind};
use std::cmp::Reverse;

/// Pick the account collecting payments for `club` through `provider`.
#[must_use]
pub fn select_account<'a>(
    accounts: &'a [PaymentAccount],
    provider: ProviderKind,
    club: &Club,
) -> Option<&'a PaymentAccount> {
    accounts
        .iter()
        .filter(|account| account.provider == provider && account.usable())
        .filter_map(|account| {
            let scope = match account.owner {
                AccountOwner::Club(id) if id == club.id => 0,
                AccountOwner::Organization(id) if id == club.organization_id => 1,
                _ => return None,
            };
            Some((scope, account))
        })
        .min_by_key(|(scope, account)| (*scope, Reverse(account.created_at), *account.id.as_uuid()))
        .map(|(_, account)| account)
}

/// Resolve the account inside an open transaction.
///
/// # Errors
///
/// [`BookingError::PaymentUnavailable`] when no usable account exists.
pub async fn resolve_account(
    tx: &mut dyn BookingTx,
    provider: ProviderKind,
    club: &Club,
) -> Result<PaymentAccount, BookingError> {
    let accounts = tx.payment_accounts(provider, club.id, club.organization_id).await?;
    select_account(&accounts, provider, club).cloned().ok_or_else(|| {
        tracing::info!(club_id = %club.id, provider = %provider, "No usable payment account");
        BookingError::PaymentUnavailable(format!("no {provider} payment account available for this club"))
    })
}
