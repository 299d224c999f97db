// ============================
// crates/backend-lib/src/auth.rs
// ============================
//! Credential verification.
//!
//! The server never issues tokens; an external directory does. This
//! module only turns an opaque bearer token into `{userId, email}` or
//! fails. A failed verification leaves the session unauthenticated and
//! the connection open; there is no attempt limit or lockout.
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Verified identity of a connection
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Turns an opaque bearer token into an [`Identity`].
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AppError>;
}

/// Claims carried by directory-issued tokens
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(default)]
    email: Option<String>,
}

/// HS256 JWT verifier for directory-issued tokens.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Directory tokens carry no `exp`; expiry is validated only
        // when present.
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AppError> {
        let data =
            decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
                tracing::debug!(%err, "token verification failed");
                AppError::AuthFailed
            })?;
        Ok(Identity {
            user_id: data.claims.user_id,
            username: data.claims.email.unwrap_or_else(|| "Anonymous".to_string()),
        })
    }
}

/// Map-backed verifier for tests and local development.
#[derive(Default)]
pub struct StaticVerifier {
    tokens: std::collections::HashMap<String, Identity>,
}

impl StaticVerifier {
    pub fn with_token(
        mut self,
        token: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        self.tokens.insert(
            token.into(),
            Identity {
                user_id: user_id.into(),
                username: username.into(),
            },
        );
        self
    }
}

#[async_trait]
impl CredentialVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AppError> {
        self.tokens.get(token).cloned().ok_or(AppError::AuthFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn issue(claims: &serde_json::Value) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let verifier = JwtVerifier::new(SECRET);
        let token = issue(&serde_json::json!({
            "userId": "u1",
            "email": "alice@example.com",
        }));

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.username, "alice@example.com");
    }

    #[tokio::test]
    async fn test_missing_email_falls_back_to_anonymous() {
        let verifier = JwtVerifier::new(SECRET);
        let token = issue(&serde_json::json!({ "userId": "u2" }));

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.username, "Anonymous");
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let verifier = JwtVerifier::new("other-secret");
        let token = issue(&serde_json::json!({ "userId": "u1" }));

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AppError::AuthFailed));
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AppError::AuthFailed));
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticVerifier::default().with_token("tok", "u1", "alice");
        assert_eq!(verifier.verify("tok").await.unwrap().user_id, "u1");
        assert!(verifier.verify("nope").await.is_err());
    }
}
