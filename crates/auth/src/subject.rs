//! The authenticated identity and permission set a [`TokenValidator`] yields.
//!
//! [`TokenValidator`]: crate::TokenValidator

use serde::{Deserialize, Serialize};

/// Per-connection permission set. Immutable for the life of the connection
/// (§3 GLOSSARY).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub can_read: Vec<String>,
    pub can_write: Vec<String>,
    pub is_admin: bool,
}

impl Permissions {
    /// Implicit permissions granted when `auth.required` is `false`.
    #[must_use]
    pub fn read_write_all() -> Self {
        Self {
            can_read: Vec::new(),
            can_write: Vec::new(),
            is_admin: true,
        }
    }

    #[must_use]
    pub fn can_read(&self, doc_id: &str) -> bool {
        self.is_admin || self.can_read.iter().any(|d| d == doc_id)
    }

    #[must_use]
    pub fn can_write(&self, doc_id: &str) -> bool {
        self.is_admin || self.can_write.iter().any(|d| d == doc_id)
    }
}

/// An authenticated identity plus its permission set, derived from a
/// validated token or API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub user_id: String,
    pub client_id: String,
    pub permissions: Permissions,
    /// Unix millis; the guard treats an expired subject as invalid on the
    /// next access check rather than retroactively closing the connection.
    pub expires_at_ms: i64,
}

impl Subject {
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_can_read_and_write_anything() {
        let perms = Permissions {
            can_read: vec![],
            can_write: vec![],
            is_admin: true,
        };
        assert!(perms.can_read("any-doc"));
        assert!(perms.can_write("any-doc"));
    }

    #[test]
    fn non_admin_limited_to_listed_docs() {
        let perms = Permissions {
            can_read: vec!["doc-a".into()],
            can_write: vec![],
            is_admin: false,
        };
        assert!(perms.can_read("doc-a"));
        assert!(!perms.can_read("doc-b"));
        assert!(!perms.can_write("doc-a"));
    }

    #[test]
    fn subject_expiry() {
        let subject = Subject {
            user_id: "u1".into(),
            client_id: "c1".into(),
            permissions: Permissions::default(),
            expires_at_ms: 1_000,
        };
        assert!(!subject.is_expired(999));
        assert!(subject.is_expired(1_000));
        assert!(subject.is_expired(1_001));
    }
}
