//! Mock profile store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cookbook_shared::ProfileError;

use crate::identity::IdentityId;
use crate::profile::{ProfileFields, ProfileStore};

/// A recorded `set_profile` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileWrite {
    pub id: IdentityId,
    pub fields: ProfileFields,
    pub merge: bool,
}

/// Mock profile store.
///
/// Uses in-memory storage; reads can be delayed per user and both reads and
/// writes can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct MockProfileStore {
    profiles: Arc<Mutex<HashMap<IdentityId, ProfileFields>>>,
    delays: Arc<Mutex<HashMap<IdentityId, Duration>>>,
    writes: Arc<Mutex<Vec<ProfileWrite>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MockProfileStore {
    /// Create a new, empty mock profile store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &IdentityId, fields: ProfileFields) {
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), fields);
    }

    /// Delay every read of `id`'s profile by `delay`.
    pub fn delay_reads_for(&self, id: &IdentityId, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), delay);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    pub fn get(&self, id: &IdentityId) -> Option<ProfileFields> {
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Every write attempted so far, including failed ones.
    pub fn writes(&self) -> Vec<ProfileWrite> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ProfileStore for MockProfileStore {
    async fn get_profile(&self, id: &IdentityId) -> Result<Option<ProfileFields>, ProfileError> {
        let delay = self
            .delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_reads.load(Ordering::Acquire) {
            return Err(ProfileError::Network("profile store offline".into()));
        }
        Ok(self.get(id))
    }

    async fn set_profile(
        &self,
        id: &IdentityId,
        fields: &ProfileFields,
        merge: bool,
    ) -> Result<(), ProfileError> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ProfileWrite {
                id: id.clone(),
                fields: fields.clone(),
                merge,
            });

        if self.fail_writes.load(Ordering::Acquire) {
            return Err(ProfileError::Http {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let mut profiles = self.profiles.lock().unwrap_or_else(PoisonError::into_inner);
        if merge {
            profiles.entry(id.clone()).or_default().merge_from(fields);
        } else {
            profiles.insert(id.clone(), fields.clone());
        }
        Ok(())
    }
}
