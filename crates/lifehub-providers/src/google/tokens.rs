//! OAuth token pairs and refresh results.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The caller's current OAuth credential.
///
/// Created at sign-in and replaced wholesale on every successful refresh.
/// `Debug` output never contains the token values.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Bearer token for API requests.
    pub access_token: String,
    /// Long-lived token used to obtain new access tokens.
    pub refresh_token: String,
    /// When the access token expires, if the provider said so.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    /// Creates a token pair without a known expiry.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }

    /// Sets the expiry time.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true if the access token is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_within(Duration::zero(), now)
    }

    /// Returns true if the access token expires within `margin` of `now`.
    ///
    /// A pair without an expiry is never considered expiring.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + margin >= expires_at,
            None => false,
        }
    }

    /// Returns the pair that results from applying a refresh at `now`.
    ///
    /// The refresh token is kept unless the provider rotated it. When the
    /// refresh handed back the same access token and no new refresh token,
    /// the pair is returned unchanged.
    pub fn apply(&self, refreshed: RefreshedToken, now: DateTime<Utc>) -> Self {
        let same_access = refreshed.access_token == self.access_token;
        let same_refresh = refreshed
            .refresh_token
            .as_ref()
            .is_none_or(|token| *token == self.refresh_token);
        if same_access && same_refresh {
            return self.clone();
        }

        Self {
            expires_at: refreshed.expires_at(now),
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What a successful refresh returned.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present only when the provider rotated the refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the new access token in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl RefreshedToken {
    /// Creates a refresh result with a new access token only.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
        }
    }

    /// Sets a rotated refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the access token lifetime.
    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    /// Absolute expiry computed from `expires_in`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| now + Duration::seconds(secs))
    }
}

impl fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("rotated_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_checks() {
        let now = Utc::now();
        let pair = TokenPair::new("A1", "R1").with_expires_at(now + Duration::minutes(3));

        assert!(!pair.is_expired_at(now));
        assert!(pair.expires_within(Duration::minutes(5), now));
        assert!(!pair.expires_within(Duration::minutes(1), now));
        assert!(pair.is_expired_at(now + Duration::minutes(3)));
    }

    #[test]
    fn pair_without_expiry_never_expires() {
        let pair = TokenPair::new("A1", "R1");
        assert!(!pair.expires_within(Duration::days(365), Utc::now()));
    }

    #[test]
    fn apply_keeps_refresh_token_when_not_rotated() {
        let now = Utc::now();
        let pair = TokenPair::new("A1", "R1");
        let next = pair.apply(RefreshedToken::new("A2").with_expires_in(3600), now);

        assert_eq!(next.access_token, "A2");
        assert_eq!(next.refresh_token, "R1");
        assert_eq!(next.expires_at, Some(now + Duration::seconds(3600)));
    }

    #[test]
    fn apply_takes_rotated_refresh_token() {
        let pair = TokenPair::new("A1", "R1");
        let next = pair.apply(
            RefreshedToken::new("A2").with_refresh_token("R2"),
            Utc::now(),
        );
        assert_eq!(next.refresh_token, "R2");
    }

    #[test]
    fn apply_same_token_returns_input() {
        let now = Utc::now();
        let pair = TokenPair::new("A1", "R1").with_expires_at(now + Duration::minutes(30));
        let next = pair.apply(RefreshedToken::new("A1").with_expires_in(3600), now);
        assert_eq!(next, pair);
    }

    #[test]
    fn debug_redacts_tokens() {
        let pair = TokenPair::new("secret-access", "secret-refresh");
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));

        let refreshed = RefreshedToken::new("secret-access");
        assert!(!format!("{:?}", refreshed).contains("secret-access"));
    }

    #[test]
    fn refreshed_token_parses_google_response() {
        let json = r#"{
            "access_token": "ya29.new",
            "expires_in": 3599,
            "scope": "openid",
            "token_type": "Bearer"
        }"#;
        let refreshed: RefreshedToken = serde_json::from_str(json).unwrap();
        assert_eq!(refreshed.access_token, "ya29.new");
        assert_eq!(refreshed.expires_in, Some(3599));
        assert!(refreshed.refresh_token.is_none());
    }
}
