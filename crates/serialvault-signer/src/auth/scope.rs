//! Caller identity and scope.

use serde::{Deserialize, Serialize};

/// What an authenticated caller may act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Scope {
    /// Full access to everything the account owns.
    Account { authority_id: String },
    /// Access to one substore and the model it is bound to.
    Substore { store_id: String, model_id: i64 },
}

/// A caller resolved by the authentication layer.
///
/// Scope is fixed at construction; there is no way to widen it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    username: String,
    authority_id: String,
    scope: Scope,
}

impl AuthenticatedUser {
    /// An account-level user of `authority_id`.
    pub fn account(username: impl Into<String>, authority_id: impl Into<String>) -> Self {
        let authority_id = authority_id.into();
        Self {
            username: username.into(),
            scope: Scope::Account {
                authority_id: authority_id.clone(),
            },
            authority_id,
        }
    }

    /// A user restricted to the substore binding `store_id` to `model_id`.
    pub fn substore(
        username: impl Into<String>,
        authority_id: impl Into<String>,
        store_id: impl Into<String>,
        model_id: i64,
    ) -> Self {
        Self {
            username: username.into(),
            authority_id: authority_id.into(),
            scope: Scope::Substore {
                store_id: store_id.into(),
                model_id,
            },
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The account this user belongs to.
    pub fn authority_id(&self) -> &str {
        &self.authority_id
    }

    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Whether this is an account-level user of `authority_id`.
    pub fn is_account_of(&self, authority_id: &str) -> bool {
        matches!(&self.scope, Scope::Account { authority_id: a } if a == authority_id)
    }
}
