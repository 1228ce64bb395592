//! The `TokenValidator` capability (§6): the core never issues or stores
//! credentials itself, it only asks this trait to turn a bearer token or API
//! key into a [`Subject`].

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{error::AuthError, subject::Subject};

/// Validates bearer tokens and API keys into authenticated [`Subject`]s.
///
/// Implemented externally in production (backed by whatever identity service
/// issues tokens); the core only ever calls through this trait. See §6 of
/// the spec for the capability boundary.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a bearer token presented on the `auth` frame's `token` field.
    async fn validate_token(&self, token: &str) -> Result<Subject, AuthError>;

    /// Validate an API key presented on the `auth` frame's `apiKey` field.
    async fn validate_api_key(&self, api_key: &str) -> Result<Subject, AuthError>;
}

/// An in-memory [`TokenValidator`] keyed by exact token/key string.
///
/// Suitable for local development and integration tests, where identity
/// issuance is out of scope and a fixed set of test subjects is all that's
/// needed. Lookups hold no lock across a suspension point: `validate_token`
/// and `validate_api_key` are synchronous under the hood, just wrapped in
/// the async trait the capability boundary requires.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, Subject>,
    api_keys: HashMap<String, Subject>,
}

impl StaticTokenValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bearer token that resolves to `subject`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, subject: Subject) -> Self {
        self.tokens.insert(token.into(), subject);
        self
    }

    /// Register an API key that resolves to `subject`.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>, subject: Subject) -> Self {
        self.api_keys.insert(api_key.into(), subject);
        self
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate_token(&self, token: &str) -> Result<Subject, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::Invalid)
    }

    async fn validate_api_key(&self, api_key: &str) -> Result<Subject, AuthError> {
        self.api_keys
            .get(api_key)
            .cloned()
            .ok_or(AuthError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::Permissions;

    fn subject(id: &str) -> Subject {
        Subject {
            user_id: id.into(),
            client_id: format!("{id}-client"),
            permissions: Permissions::read_write_all(),
            expires_at_ms: i64::MAX,
        }
    }

    #[tokio::test]
    async fn validates_registered_token() {
        let validator = StaticTokenValidator::new().with_token("T", subject("alice"));
        let subject = validator.validate_token("T").await.unwrap();
        assert_eq!(subject.user_id, "alice");
    }

    #[tokio::test]
    async fn rejects_unknown_token() {
        let validator = StaticTokenValidator::new();
        assert_eq!(validator.validate_token("nope").await, Err(AuthError::Invalid));
    }

    #[tokio::test]
    async fn validates_registered_api_key() {
        let validator = StaticTokenValidator::new().with_api_key("key-1", subject("bob"));
        let subject = validator.validate_api_key("key-1").await.unwrap();
        assert_eq!(subject.user_id, "bob");
    }
}
