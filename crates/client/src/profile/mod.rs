//! User profile store: fields kept next to, not inside, the identity provider.

pub mod firestore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cookbook_shared::ProfileError;
use serde::{Deserialize, Serialize};

use crate::identity::IdentityId;

pub use firestore::FirestoreProfileStore;

/// Profile document fields. Every field is optional; absent means "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFields {
    pub name: Option<String>,
    pub email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
}

impl ProfileFields {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.created_at.is_none()
            && self.last_login.is_none()
    }

    /// Overwrite fields that are present in `newer`.
    pub fn merge_from(&mut self, newer: &ProfileFields) {
        if newer.name.is_some() {
            self.name.clone_from(&newer.name);
        }
        if newer.email.is_some() {
            self.email.clone_from(&newer.email);
        }
        if newer.created_at.is_some() {
            self.created_at = newer.created_at;
        }
        if newer.last_login.is_some() {
            self.last_login = newer.last_login;
        }
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile document; `Ok(None)` when none exists.
    async fn get_profile(&self, id: &IdentityId) -> Result<Option<ProfileFields>, ProfileError>;

    /// Write `fields`. With `merge`, only present fields are touched;
    /// otherwise the document is replaced.
    async fn set_profile(
        &self,
        id: &IdentityId,
        fields: &ProfileFields,
        merge: bool,
    ) -> Result<(), ProfileError>;
}
