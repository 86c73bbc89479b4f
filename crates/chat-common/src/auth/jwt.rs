//! JWT utilities for handshake authentication
//!
//! Tokens are issued by the identity service; the gateway only verifies them.
//! The user id is read from the `userId` claim, falling back to `sub`.

use chat_core::UserId;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Application user id
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Resolve the authenticated user
    ///
    /// # Errors
    /// Returns an error if the token carries no usable user id
    pub fn user_id(&self) -> Result<UserId, AppError> {
        self.user_id
            .as_deref()
            .or(self.sub.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(UserId::from)
            .ok_or(AppError::InvalidToken)
    }

    /// Check if the token is expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// JWT service for encoding and decoding tokens
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry: i64,
}

impl JwtService {
    /// Create a new JWT service with the given secret and expiry time
    #[must_use]
    pub fn new(secret: &str, access_token_expiry: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_expiry,
        }
    }

    /// Issue an access token for a user (tooling and tests)
    ///
    /// # Errors
    /// Returns an error if token encoding fails
    pub fn issue_access_token(&self, user_id: &UserId) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: Some(user_id.to_string()),
            user_id: Some(user_id.to_string()),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.access_token_expiry)).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to encode JWT")))
    }

    /// Decode and validate a JWT token
    ///
    /// # Errors
    /// Returns an error if the token is invalid or expired
    pub fn decode_token(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::InvalidToken,
            }
        })?;

        Ok(token_data.claims)
    }

    /// Verify a handshake token and return the authenticated user.
    ///
    /// Accepts the raw token or a `Bearer `-prefixed header value.
    ///
    /// # Errors
    /// Returns an error if the token is missing, invalid or expired
    pub fn authenticate(&self, token: &str) -> Result<UserId, AppError> {
        let token = strip_bearer(token);
        if token.is_empty() {
            return Err(AppError::MissingAuth);
        }
        self.decode_token(token)?.user_id()
    }
}

/// Remove an optional `Bearer ` prefix (case-insensitive)
#[must_use]
pub fn strip_bearer(value: &str) -> &str {
    let value = value.trim_start();
    match value.get(..6) {
        Some(scheme)
            if scheme.eq_ignore_ascii_case("bearer")
                && value[6..].chars().next().map_or(true, char::is_whitespace) =>
        {
            value[6..].trim()
        }
        _ => value.trim(),
    }
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("access_token_expiry", &self.access_token_expiry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> JwtService {
        JwtService::new("test-secret-key-that-is-long-enough", 900)
    }

    #[test]
    fn test_issue_and_authenticate() {
        let service = create_test_service();
        let user_id = UserId::new("user-42");

        let token = service.issue_access_token(&user_id).unwrap();
        assert!(!token.is_empty());

        assert_eq!(service.authenticate(&token).unwrap(), user_id);
        assert_eq!(
            service.authenticate(&format!("Bearer {token}")).unwrap(),
            user_id
        );
    }

    #[test]
    fn test_decode_claims() {
        let service = create_test_service();
        let token = service.issue_access_token(&UserId::new("u1")).unwrap();
        let claims = service.decode_token(&token).unwrap();

        assert_eq!(claims.user_id.as_deref(), Some("u1"));
        assert!(!claims.is_expired());
    }

    #[test]
    fn test_invalid_token() {
        let service = create_test_service();

        let result = service.decode_token("invalid.token.here");
        assert!(matches!(result, Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_wrong_secret() {
        let issuer = JwtService::new("another-secret-entirely-different", 900);
        let token = issuer.issue_access_token(&UserId::new("u1")).unwrap();

        let result = create_test_service().authenticate(&token);
        assert!(matches!(result, Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_expired_token() {
        let service = JwtService::new("test-secret-key-that-is-long-enough", -3600);
        let token = service.issue_access_token(&UserId::new("u1")).unwrap();

        let result = service.authenticate(&token);
        assert!(matches!(result, Err(AppError::TokenExpired)));
    }

    #[test]
    fn test_missing_token() {
        let service = create_test_service();
        assert!(matches!(service.authenticate(""), Err(AppError::MissingAuth)));
        assert!(matches!(
            service.authenticate("Bearer "),
            Err(AppError::MissingAuth)
        ));
    }

    #[test]
    fn test_claims_user_id_fallback() {
        let claims = Claims {
            sub: Some("from-sub".to_string()),
            user_id: None,
            iat: 0,
            exp: i64::MAX,
        };
        assert_eq!(claims.user_id().unwrap(), UserId::new("from-sub"));

        let claims = Claims {
            sub: None,
            user_id: Some("  ".to_string()),
            iat: 0,
            exp: i64::MAX,
        };
        assert!(matches!(claims.user_id(), Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer abc"), "abc");
        assert_eq!(strip_bearer("bearer abc"), "abc");
        assert_eq!(strip_bearer("bearer   abc "), "abc");
        assert_eq!(strip_bearer("abc"), "abc");
        assert_eq!(strip_bearer("  "), "");
        assert_eq!(strip_bearer("Bearer "), "");
        assert_eq!(strip_bearer("Bearer"), "");
        assert_eq!(strip_bearer("Bearerabc"), "Bearerabc");
    }
}
