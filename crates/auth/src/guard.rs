//! Evaluates every auth-gated decision: validating the `auth` frame (§4.2,
//! §4.8) and checking read/write permission at subscribe/delta time.

use std::sync::Arc;

use crate::{error::AuthError, subject::Subject, token_validator::TokenValidator};

/// Validates credentials and permission checks for one connection's lifetime.
///
/// Stateless beyond the [`TokenValidator`] it wraps — the resulting
/// [`Subject`] is stored on the `Connection`, not here, per the data model's
/// ownership rules (§3).
#[derive(Clone)]
pub struct AuthGuard {
    validator: Arc<dyn TokenValidator>,
    /// When `false`, [`AuthGuard::authenticate_disabled`] grants implicit
    /// read+write-all without consulting the validator (§6 `auth required`).
    required: bool,
}

impl AuthGuard {
    #[must_use]
    pub fn new(validator: Arc<dyn TokenValidator>, required: bool) -> Self {
        Self { validator, required }
    }

    /// Whether the AUTH handshake is mandatory for this deployment.
    #[must_use]
    pub fn required(&self) -> bool {
        self.required
    }

    /// Validate an `auth` frame's token or API key, in that order of
    /// preference if both are present.
    ///
    /// # Errors
    /// Returns [`AuthError`] if neither credential validates.
    pub async fn authenticate(
        &self,
        token: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<Subject, AuthError> {
        if let Some(token) = token {
            return self.validator.validate_token(token).await;
        }
        if let Some(api_key) = api_key {
            return self.validator.validate_api_key(api_key).await;
        }
        Err(AuthError::Invalid)
    }

    /// The implicit subject granted to every connection when `auth.required`
    /// is `false` — read+write-all, no handshake needed.
    #[must_use]
    pub fn implicit_subject(conn_id: &str) -> Subject {
        Subject {
            user_id: format!("anonymous:{conn_id}"),
            client_id: conn_id.to_string(),
            permissions: crate::subject::Permissions::read_write_all(),
            expires_at_ms: i64::MAX,
        }
    }

    /// `true` iff `subject` may read `doc_id` and has not expired.
    #[must_use]
    pub fn can_read(&self, subject: &Subject, doc_id: &str, now_ms: i64) -> bool {
        !subject.is_expired(now_ms) && subject.permissions.can_read(doc_id)
    }

    /// `true` iff `subject` may write `doc_id` and has not expired.
    #[must_use]
    pub fn can_write(&self, subject: &Subject, doc_id: &str, now_ms: i64) -> bool {
        !subject.is_expired(now_ms) && subject.permissions.can_write(doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{subject::Permissions, token_validator::StaticTokenValidator};

    fn subject_with(perms: Permissions) -> Subject {
        Subject {
            user_id: "u1".into(),
            client_id: "c1".into(),
            permissions: perms,
            expires_at_ms: 10_000,
        }
    }

    #[tokio::test]
    async fn authenticates_via_token_first() {
        let validator = StaticTokenValidator::new()
            .with_token("T", subject_with(Permissions::read_write_all()));
        let guard = AuthGuard::new(Arc::new(validator), true);
        let subject = guard.authenticate(Some("T"), Some("ignored")).await.unwrap();
        assert_eq!(subject.user_id, "u1");
    }

    #[tokio::test]
    async fn falls_back_to_api_key() {
        let validator = StaticTokenValidator::new()
            .with_api_key("K", subject_with(Permissions::read_write_all()));
        let guard = AuthGuard::new(Arc::new(validator), true);
        let subject = guard.authenticate(None, Some("K")).await.unwrap();
        assert_eq!(subject.user_id, "u1");
    }

    #[tokio::test]
    async fn rejects_missing_credentials() {
        let validator = StaticTokenValidator::new();
        let guard = AuthGuard::new(Arc::new(validator), true);
        assert!(guard.authenticate(None, None).await.is_err());
    }

    #[test]
    fn admin_short_circuits_permission_checks() {
        let subject = subject_with(Permissions {
            can_read: vec![],
            can_write: vec![],
            is_admin: true,
        });
        let guard = AuthGuard::new(Arc::new(StaticTokenValidator::new()), true);
        assert!(guard.can_read(&subject, "any-doc", 0));
        assert!(guard.can_write(&subject, "any-doc", 0));
    }

    #[test]
    fn expired_subject_fails_every_check() {
        let subject = subject_with(Permissions::read_write_all());
        let guard = AuthGuard::new(Arc::new(StaticTokenValidator::new()), true);
        assert!(!guard.can_read(&subject, "doc", 10_000));
        assert!(!guard.can_write(&subject, "doc", 10_000));
    }
}
