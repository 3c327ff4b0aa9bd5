//! Wallet session record as stored in the session cookie.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

/// Session created after a successful wallet-signature sign in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub signed_message: String,
    #[serde(default)]
    pub signer_address: String,
    /// Epoch milliseconds
    pub authenticated_at: i64,
}

impl SessionRecord {
    pub fn new(
        address: impl Into<String>,
        signed_message: impl Into<String>,
        signer_address: impl Into<String>,
        authenticated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            address: address.into(),
            signed_message: signed_message.into(),
            signer_address: signer_address.into(),
            authenticated_at: authenticated_at.timestamp_millis(),
        }
    }

    /// A record without an address carries no identity.
    pub fn has_identity(&self) -> bool {
        !self.address.is_empty()
    }

    pub fn authenticated_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.authenticated_at).single()
    }

    /// Age in milliseconds relative to `now`. Negative when the record is
    /// stamped in the future.
    pub fn age_millis(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis().saturating_sub(self.authenticated_at)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age_millis(now) >= ttl.num_milliseconds()
    }

    pub fn is_valid(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.has_identity() && !self.is_expired(now, ttl)
    }

    /// Parse a cookie value. Accepts raw JSON or percent-encoded JSON; any
    /// other shape yields `None`.
    pub fn from_cookie_value(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(record) = serde_json::from_str(raw) {
            return Some(record);
        }

        let decoded = percent_decode(raw)?;
        match serde_json::from_str(&decoded) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed session cookie");
                None
            }
        }
    }

    /// Percent-encoded JSON suitable for a `Set-Cookie` value.
    pub fn to_cookie_value(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        // byte_serialize writes spaces as '+', which cookies keep literally
        form_urlencoded::byte_serialize(json.as_bytes())
            .collect::<String>()
            .replace('+', "%20")
    }
}

fn percent_decode(raw: &str) -> Option<String> {
    // '+' is literal in cookie values, unlike form bodies
    let protected = raw.replace('+', "%2B");
    let joined = format!("v={protected}");
    form_urlencoded::parse(joined.as_bytes())
        .find(|(k, _)| *k == "v")
        .map(|(_, v)| v.into_owned())
}

/// Find a cookie by name in a `Cookie` header value.
pub fn cookie_from_header<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k.trim() == name).then(|| v.trim().trim_matches('"'))
    })
}
