use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Session token payload.
///
/// Registered RFC 7519 claims plus the issue instant in milliseconds;
/// everything else about the principal is looked up on each request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// Subject (principal identifier)
    pub sub: String,

    /// Issued at (Unix timestamp, seconds)
    pub iat: i64,

    /// Expiration time (Unix timestamp, seconds)
    pub exp: i64,

    /// Issued at (Unix timestamp, milliseconds)
    pub iat_ms: i64,
}

impl SessionClaims {
    /// Build claims for a principal issued at `issued_at`, valid for `ttl`.
    pub fn new(subject: impl ToString, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
            iat_ms: issued_at.timestamp_millis(),
        }
    }

    /// A token is expired from its `exp` second onwards.
    pub fn is_expired(&self, current_timestamp: i64) -> bool {
        self.exp <= current_timestamp
    }
}

/// Claims that passed signature and expiry checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSession {
    pub subject: String,
    pub issued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_new_claims() {
        let issued_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + Duration::milliseconds(250);
        let claims = SessionClaims::new("user123", issued_at, Duration::days(90));

        assert_eq!(claims.sub, "user123");
        assert_eq!(claims.iat, issued_at.timestamp());
        assert_eq!(claims.iat_ms, issued_at.timestamp_millis());
        assert_eq!(claims.iat_ms % 1000, 250);
        assert_eq!(claims.exp - claims.iat, 90 * 24 * 60 * 60);
    }

    #[test]
    fn test_is_expired() {
        let claims = SessionClaims {
            sub: "user123".to_string(),
            iat: 0,
            exp: 1000,
            iat_ms: 0,
        };

        assert!(!claims.is_expired(999));
        assert!(claims.is_expired(1000)); // Exactly at expiration
        assert!(claims.is_expired(1001));
    }
}
