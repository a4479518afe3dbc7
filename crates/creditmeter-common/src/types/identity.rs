//! Attested caller identity
//!
//! An [`Identity`] is only ever produced by an [`IdentityProvider`], i.e.
//! by the authentication collaborator after it validated a session token.
//! Account access is always checked against an identity, never against a
//! user id supplied in a request body.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::IdentityError;

/// Caller role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

/// Verified identity of the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    user_id: String,
    role: Role,
}

impl Identity {
    /// Build an attested identity. Call this from provider implementations only.
    pub fn attested(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Read access: own account, or any account for admins
    pub fn authorize_read(&self, target_user: &str) -> Result<(), IdentityError> {
        if self.user_id == target_user || self.is_admin() {
            Ok(())
        } else {
            Err(IdentityError::Unauthorized {
                actor: self.user_id.clone(),
                target: target_user.to_string(),
            })
        }
    }

    /// Debit access: own account only, admins included
    pub fn authorize_debit(&self, target_user: &str) -> Result<(), IdentityError> {
        if self.user_id == target_user {
            Ok(())
        } else {
            Err(IdentityError::Unauthorized {
                actor: self.user_id.clone(),
                target: target_user.to_string(),
            })
        }
    }
}

/// Authentication collaborator
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validate a session token and return the identity it belongs to
    async fn authenticate(&self, token: &str) -> Result<Identity, IdentityError>;
}

/// Token table provider for embedding and tests
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user
    pub fn insert(&self, token: impl Into<String>, user_id: impl Into<String>, role: Role) {
        self.tokens
            .write()
            .insert(token.into(), Identity::attested(user_id, role));
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.write().remove(token);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Identity, IdentityError> {
        if token.is_empty() {
            return Err(IdentityError::MissingToken);
        }
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(IdentityError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_reads_only_own_account() {
        let alice = Identity::attested("alice", Role::User);
        assert!(alice.authorize_read("alice").is_ok());
        assert!(matches!(
            alice.authorize_read("bob"),
            Err(IdentityError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_admin_reads_but_never_debits_others() {
        let admin = Identity::attested("ops", Role::Admin);
        assert!(admin.authorize_read("bob").is_ok());
        assert!(admin.authorize_debit("bob").is_err());
        assert!(admin.authorize_debit("ops").is_ok());
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticIdentityProvider::new();
        provider.insert("tok-1", "alice", Role::User);

        let identity = provider.authenticate("tok-1").await.unwrap();
        assert_eq!(identity.user_id(), "alice");
        assert_eq!(identity.role(), Role::User);

        assert_eq!(
            provider.authenticate("nope").await,
            Err(IdentityError::InvalidToken)
        );
        assert_eq!(provider.authenticate("").await, Err(IdentityError::MissingToken));

        provider.revoke("tok-1");
        assert!(provider.authenticate("tok-1").await.is_err());
    }
}
