use chrono::{DateTime, Duration, Utc};

use super::traits::TokenSet;
use crate::store::TokenRecord;

/// Seconds shaved off an access token's lifetime so it is never used right at expiry.
pub const ACCESS_TOKEN_LATENCY_SECS: i64 = 60;

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_ACCESS_TTL_SECS: u64 = 3600;

/// Upstream lifetimes are clamped to a year so expiry instants stay representable.
const MAX_TTL_SECS: u64 = 365 * 24 * 3600;

impl TokenRecord {
    pub fn is_access_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(ACCESS_TOKEN_LATENCY_SECS) < self.access_token_expires_at
    }

    /// A refresh token without a known expiry is assumed usable.
    pub fn is_refresh_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_expires_at.map_or(true, |expires| now < expires)
    }
}

/// Build the record for a freshly issued token set.
///
/// Falls back to the previous refresh token when the provider did not rotate it,
/// keeping that token's original issuance time. `None` when no refresh token is
/// available at all.
pub(crate) fn issue_record(
    realm_id: &str,
    tokens: TokenSet,
    previous: Option<&TokenRecord>,
    now: DateTime<Utc>,
) -> Option<TokenRecord> {
    let refresh_token = tokens
        .refresh_token
        .or_else(|| previous.map(|p| p.refresh_token.clone()))?;

    let carried = previous.filter(|p| p.refresh_token == refresh_token);

    let refresh_token_issued_at = carried.map_or(now, |p| p.refresh_token_issued_at);
    let refresh_token_expires_at = match tokens.refresh_token_expires_in {
        Some(secs) => Some(now + seconds(secs)),
        None => carried.and_then(|p| p.refresh_token_expires_at),
    };

    Some(TokenRecord {
        realm_id: realm_id.to_string(),
        access_token: tokens.access_token,
        refresh_token,
        token_type: tokens.token_type,
        access_token_issued_at: now,
        refresh_token_issued_at,
        access_token_expires_at: now + seconds(tokens.expires_in.unwrap_or(DEFAULT_ACCESS_TTL_SECS)),
        refresh_token_expires_at,
    })
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
}
