//! Connection credential

use crate::error::SocketError;
use std::fmt;

/// User identity bound to one logical session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub auth_token: String,
}

impl Credential {
    pub fn new(user_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Build from optional parts, as handed over by an auth layer that may
    /// not have a session yet.
    pub fn from_parts(
        user_id: Option<String>,
        auth_token: Option<String>,
    ) -> Result<Self, SocketError> {
        let user_id = user_id
            .ok_or_else(|| SocketError::InvalidCredential("missing user id".into()))?;
        let auth_token = auth_token
            .ok_or_else(|| SocketError::InvalidCredential("missing auth token".into()))?;
        let credential = Self::new(user_id, auth_token);
        credential.validate()?;
        Ok(credential)
    }

    pub fn validate(&self) -> Result<(), SocketError> {
        if self.user_id.trim().is_empty() {
            return Err(SocketError::InvalidCredential("empty user id".into()));
        }
        if self.auth_token.trim().is_empty() {
            return Err(SocketError::InvalidCredential("empty auth token".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Credential::new("u1", "t1").validate().is_ok());
        assert!(matches!(
            Credential::new("", "t1").validate(),
            Err(SocketError::InvalidCredential(_))
        ));
        assert!(Credential::new("u1", "   ").validate().is_err());
    }

    #[test]
    fn test_from_parts_missing_field() {
        let err = Credential::from_parts(Some("u1".into()), None).unwrap_err();
        assert_eq!(err, SocketError::InvalidCredential("missing auth token".into()));
        assert!(Credential::from_parts(Some("u1".into()), Some("t1".into())).is_ok());
    }

    #[test]
    fn test_debug_redacts_token() {
        let printed = format!("{:?}", Credential::new("u1", "secret-token"));
        assert!(printed.contains("u1"));
        assert!(!printed.contains("secret-token"));
    }
}
