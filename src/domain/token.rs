//! Stored credential tokens minted from tokenizing callbacks.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::event::TokenMaterial;
use super::secret::Sealed;

/// A reusable charge credential scoped to the provider that issued it.
///
/// `source_event_key` is the idempotency key of the webhook event that
/// carried the material. A unique constraint on
/// `(provider, source_event_key)` guarantees one token per resolving
/// event no matter how often the callback is redelivered.
#[derive(Debug, Clone)]
pub struct CardToken {
    pub id: Uuid,
    pub provider: String,
    pub transaction_id: Uuid,
    pub user_ref: Option<String>,
    pub source_event_key: String,
    pub token: Sealed,
    pub brand: Option<String>,
    pub last_four: Option<String>,
    pub expiry_month: Option<String>,
    pub expiry_year: Option<String>,
    pub active: bool,
    /// First instant the card is no longer valid, derived from the masked
    /// expiry. None when the provider sent no usable expiry.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CardToken {
    pub fn from_material(
        provider: &str,
        transaction_id: Uuid,
        user_ref: Option<String>,
        source_event_key: &str,
        material: &TokenMaterial,
    ) -> Self {
        let expires_at = match (&material.expiry_month, &material.expiry_year) {
            (Some(month), Some(year)) => expiry_instant(month, year),
            _ => None,
        };
        Self {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            transaction_id,
            user_ref,
            source_event_key: source_event_key.to_string(),
            token: Sealed::new(material.token.clone()),
            brand: material.brand.clone(),
            last_four: material.last_four.clone(),
            expiry_month: material.expiry_month.clone(),
            expiry_year: material.expiry_year.clone(),
            active: true,
            expires_at,
            created_at: Utc::now(),
        }
    }

    /// Whether the token may back a new charge: not revoked, not past its
    /// card expiry.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |expiry| now < expiry)
    }
}

/// Cards are valid through the last day of the named month, so the
/// cutoff is midnight on the first of the following month.
fn expiry_instant(month: &str, year: &str) -> Option<DateTime<Utc>> {
    let month: u32 = month.parse().ok()?;
    let year: i32 = year.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    Some(
        NaiveDate::from_ymd_opt(next_year, next_month, 1)?
            .and_hms_opt(0, 0, 0)?
            .and_utc(),
    )
}

/// API projection of a token. The credential value itself never leaves
/// the store through this type.
#[derive(Debug, Clone, Serialize)]
pub struct TokenView {
    pub id: Uuid,
    pub provider: String,
    pub user_ref: Option<String>,
    pub brand: Option<String>,
    pub last_four: Option<String>,
    pub expiry_month: Option<String>,
    pub expiry_year: Option<String>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&CardToken> for TokenView {
    fn from(token: &CardToken) -> Self {
        Self {
            id: token.id,
            provider: token.provider.clone(),
            user_ref: token.user_ref.clone(),
            brand: token.brand.clone(),
            last_four: token.last_four.clone(),
            expiry_month: token.expiry_month.clone(),
            expiry_year: token.expiry_year.clone(),
            active: token.active,
            expires_at: token.expires_at,
            created_at: token.created_at,
        }
    }
}
