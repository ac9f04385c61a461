//! Session controller: the single source of truth for who is signed in.
//!
//! The controller subscribes to the identity provider, merges each identity
//! with its profile document and publishes the result through a `watch`
//! channel. Every provider event gets a sequence number when it is delivered;
//! only the result for the newest event is applied, so a slow profile lookup
//! can never overwrite a later sign-in or sign-out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use cookbook_shared::{AuthError, AuthErrorCode};
use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::identity::{Identity, IdentityId, IdentityProvider, SessionListener, SignUpProfile, Subscription};
use crate::profile::{ProfileFields, ProfileStore};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Authenticated,
    Unauthenticated,
}

/// Opaque marker present exactly while a user is authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Provider identity merged with the stored profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: IdentityId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub profile: ProfileFields,
}

impl AuthUser {
    pub fn new(identity: Identity, profile: Option<ProfileFields>) -> Self {
        Self {
            id: identity.id,
            email: identity.email,
            display_name: identity.display_name,
            profile: profile.unwrap_or_default(),
        }
    }

    /// Best available name: provider display name, then profile name, then email.
    pub fn name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .or(self.profile.name.as_deref())
            .or(self.email.as_deref())
    }
}

/// Current session. Constructed only through the state constructors, so
/// `status == Authenticated` iff a user is present iff a token is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    status: SessionStatus,
    user: Option<AuthUser>,
    token: Option<SessionToken>,
}

impl Session {
    pub fn initializing() -> Self {
        Self {
            status: SessionStatus::Initializing,
            user: None,
            token: None,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            user: None,
            token: None,
        }
    }

    pub fn authenticated(user: AuthUser) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            user: Some(user),
            token: Some(SessionToken::new()),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn session_token(&self) -> Option<SessionToken> {
        self.token
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.status == SessionStatus::Initializing
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitializeError {
    #[error("session controller is already subscribed to the identity provider")]
    AlreadyInitialized,
}

#[derive(Default)]
struct Control {
    /// Sequence number of the newest provider event.
    latest_seq: u64,
    events_seen: bool,
    /// Bumped on every initialize and cancel; results from older epochs are dropped.
    epoch: u64,
    active: bool,
    initialized_at: Option<Instant>,
}

struct Inner {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    state: watch::Sender<Session>,
    control: Mutex<Control>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(identity: Arc<dyn IdentityProvider>, profiles: Arc<dyn ProfileStore>) -> Self {
        let (state, _) = watch::channel(Session::initializing());
        Self {
            inner: Arc::new(Inner {
                identity,
                profiles,
                state,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    /// Subscribe to the identity provider. Fails if a previous subscription
    /// has not been cancelled yet.
    pub fn initialize(&self) -> Result<SessionHandle, InitializeError> {
        let epoch = {
            let mut control = self.inner.lock();
            if control.active {
                return Err(InitializeError::AlreadyInitialized);
            }
            control.active = true;
            control.epoch += 1;
            control.events_seen = false;
            control.initialized_at = Some(Instant::now());
            control.epoch
        };

        let listener = Arc::new(ControllerListener {
            inner: Arc::downgrade(&self.inner),
            epoch,
        });
        let subscription = self.inner.identity.subscribe(listener);
        tracing::debug!(epoch, "session controller subscribed");

        Ok(SessionHandle {
            controller: self.clone(),
            subscription,
            epoch,
            timeout: Mutex::new(None),
        })
    }

    /// [`SessionController::initialize`] plus
    /// [`SessionController::resolve_initializing_with_timeout`].
    pub fn initialize_with_timeout(&self, timeout: Duration) -> Result<SessionHandle, InitializeError> {
        let handle = self.initialize()?;
        let task = self.resolve_initializing_with_timeout(timeout);
        *handle.timeout.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(handle)
    }

    /// Force `unauthenticated` if no provider event arrives within `timeout`
    /// of the last `initialize`.
    pub fn resolve_initializing_with_timeout(&self, timeout: Duration) -> JoinHandle<()> {
        let (epoch, started) = {
            let control = self.inner.lock();
            (control.epoch, control.initialized_at.unwrap_or_else(Instant::now))
        };
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep_until(started + timeout).await;
            if let Some(inner) = weak.upgrade() {
                SessionController { inner }.expire_initializing(epoch, timeout);
            }
        })
    }

    fn expire_initializing(&self, epoch: u64, timeout: Duration) {
        let control = self.inner.lock();
        if control.epoch != epoch || control.events_seen {
            return;
        }
        if self.inner.state.borrow().status() != SessionStatus::Initializing {
            return;
        }
        tracing::warn!(
            timeout_ms = timeout.as_millis() as u64,
            "identity provider did not report a session in time, continuing signed out"
        );
        self.inner.state.send_replace(Session::unauthenticated());
    }

    /// Handle a session change from the provider.
    ///
    /// The event is ordered immediately; the returned future performs the
    /// profile lookup and applies the result unless a newer event arrived
    /// meanwhile. A signed-out event is applied before returning. Events are
    /// ignored while no subscription is active.
    pub fn on_provider_event(&self, identity: Option<Identity>) -> BoxFuture<'static, ()> {
        let epoch = self.inner.lock().epoch;
        self.on_event(epoch, identity)
    }

    fn on_event(&self, epoch: u64, identity: Option<Identity>) -> BoxFuture<'static, ()> {
        let seq = {
            let mut control = self.inner.lock();
            if !control.active || control.epoch != epoch {
                tracing::debug!(epoch, "ignoring provider event for inactive subscription");
                return future::ready(()).boxed();
            }
            control.latest_seq += 1;
            control.events_seen = true;
            control.latest_seq
        };

        let Some(identity) = identity else {
            self.apply(seq, epoch, Session::unauthenticated());
            return future::ready(()).boxed();
        };

        let controller = self.clone();
        async move {
            let profile = match controller.inner.profiles.get_profile(&identity.id).await {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!(user = %identity.id, "profile lookup failed, using provider fields only: {e}");
                    None
                }
            };
            controller.apply(seq, epoch, Session::authenticated(AuthUser::new(identity, profile)));
        }
        .boxed()
    }

    fn on_subscription_error(&self, epoch: u64, error: AuthError) {
        tracing::error!("identity provider subscription failed: {error}");
        let mut control = self.inner.lock();
        if !control.active || control.epoch != epoch {
            return;
        }
        control.latest_seq += 1;
        control.events_seen = true;
        self.inner.state.send_replace(Session::unauthenticated());
    }

    fn apply(&self, seq: u64, epoch: u64, session: Session) -> bool {
        let control = self.inner.lock();
        if !control.active || control.epoch != epoch || control.latest_seq != seq {
            tracing::debug!(seq, latest = control.latest_seq, "discarding stale session update");
            return false;
        }
        tracing::debug!(seq, status = ?session.status(), "session updated");
        self.inner.state.send_replace(session);
        true
    }

    fn accepts(&self, epoch: u64) -> bool {
        let control = self.inner.lock();
        control.active && control.epoch == epoch
    }

    /// Sign out at the provider, then clear the session. On failure the
    /// session is left untouched.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Err(e) = self.inner.identity.sign_out().await {
            tracing::warn!("sign-out failed: {e}");
            return Err(e);
        }

        {
            let mut control = self.inner.lock();
            control.latest_seq += 1;
            control.events_seen = true;
            self.inner.state.send_replace(Session::unauthenticated());
        }
        tracing::info!("signed out");
        Ok(())
    }

    /// Sign in and record the login time on the profile.
    ///
    /// The session itself changes when the provider reports the new identity.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::missing_fields());
        }

        let identity = self.inner.identity.sign_in(email, password).await?;
        tracing::info!(user = %identity.id, "signed in");

        let update = ProfileFields {
            last_login: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(e) = self.inner.profiles.set_profile(&identity.id, &update, true).await {
            tracing::warn!(user = %identity.id, "could not record last login: {e}");
        }
        Ok(identity)
    }

    /// Register a new account and create its profile document.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity, AuthError> {
        let email = email.trim();
        let name = display_name.trim();
        if email.is_empty() || password.is_empty() || name.is_empty() {
            return Err(AuthError::missing_fields());
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::new(
                AuthErrorCode::WeakPassword,
                format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            ));
        }

        let profile = SignUpProfile {
            display_name: name.to_string(),
        };
        let identity = self.inner.identity.sign_up(email, password, profile).await?;
        tracing::info!(user = %identity.id, "account created");

        let now = Utc::now();
        let fields = ProfileFields {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            created_at: Some(now),
            last_login: Some(now),
        };
        if let Err(e) = self.inner.profiles.set_profile(&identity.id, &fields, false).await {
            tracing::warn!(user = %identity.id, "could not create profile: {e}");
        }
        Ok(identity)
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.inner.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading()
    }

    /// Wait until the session has left `initializing`.
    pub async fn wait_until_resolved(&self) -> Session {
        let mut rx = self.subscribe();
        let resolved = rx.wait_for(|s| !s.is_loading()).await.map(|s| s.clone());
        // The sender lives as long as `self`, so the channel cannot close here.
        resolved.unwrap_or_else(|_| self.snapshot())
    }
}

/// Keeps the provider subscription alive. Call [`SessionHandle::cancel`] on teardown.
pub struct SessionHandle {
    controller: SessionController,
    subscription: Subscription,
    epoch: u64,
    timeout: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    /// Unsubscribe and stop applying results of events already in progress.
    pub fn cancel(&self) {
        self.subscription.cancel();
        if let Some(task) = self
            .timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        let mut control = self.controller.inner.lock();
        if control.active && control.epoch == self.epoch {
            control.active = false;
            control.epoch += 1;
            tracing::debug!(epoch = self.epoch, "session subscription cancelled");
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_active() && self.controller.accepts(self.epoch)
    }
}

struct ControllerListener {
    inner: Weak<Inner>,
    epoch: u64,
}

impl ControllerListener {
    fn controller(&self) -> Option<SessionController> {
        let controller = SessionController {
            inner: self.inner.upgrade()?,
        };
        controller.accepts(self.epoch).then_some(controller)
    }
}

impl SessionListener for ControllerListener {
    fn on_session_change(&self, identity: Option<Identity>) {
        if let Some(controller) = self.controller() {
            tokio::spawn(controller.on_event(self.epoch, identity));
        }
    }

    fn on_subscription_error(&self, error: AuthError) {
        if let Some(controller) = self.controller() {
            controller.on_subscription_error(self.epoch, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockIdentityProvider, MockProfileStore};

    fn controller() -> (SessionController, MockIdentityProvider, MockProfileStore) {
        let provider = MockIdentityProvider::new();
        let profiles = MockProfileStore::new();
        let controller = SessionController::new(Arc::new(provider.clone()), Arc::new(profiles.clone()));
        (controller, provider, profiles)
    }

    #[test]
    fn session_states_keep_token_and_user_together() {
        assert_eq!(Session::initializing().session_token(), None);
        assert!(Session::initializing().is_loading());
        assert!(Session::unauthenticated().user().is_none());

        let user = AuthUser::new(
            Identity {
                id: IdentityId::from("uid-1"),
                email: Some("a@b.c".into()),
                display_name: None,
            },
            None,
        );
        let session = Session::authenticated(user);
        assert!(session.is_authenticated());
        assert!(session.session_token().is_some());
        assert_eq!(session.user().and_then(AuthUser::name), Some("a@b.c"));
    }

    #[tokio::test]
    async fn rejects_second_initialize_until_cancelled() {
        let (controller, provider, _) = controller();
        let handle = controller.initialize().unwrap();
        assert_eq!(
            controller.initialize().err(),
            Some(InitializeError::AlreadyInitialized)
        );

        handle.cancel();
        handle.cancel();
        assert!(!handle.is_active());
        assert_eq!(provider.listener_count(), 0);

        let again = controller.initialize().unwrap();
        assert!(again.is_active());
        again.cancel();
    }

    fn identity(id: &str) -> Identity {
        Identity {
            id: IdentityId::from(id),
            email: Some(format!("{id}@example.com")),
            display_name: None,
        }
    }

    #[tokio::test]
    async fn events_after_cancel_are_ignored() {
        let (controller, _, _) = controller();
        let handle = controller.initialize().unwrap();
        controller.wait_until_resolved().await;
        handle.cancel();

        controller.on_provider_event(Some(identity("late"))).await;

        let session = controller.snapshot();
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
        assert!(session.user().is_none());
    }

    #[tokio::test]
    async fn events_from_an_earlier_subscription_are_ignored() {
        let (controller, _, _) = controller();
        let first = controller.initialize().unwrap();
        let old_epoch = first.epoch;
        first.cancel();

        let second = controller.initialize().unwrap();
        controller.wait_until_resolved().await;
        controller.on_event(old_epoch, Some(identity("stale"))).await;
        assert_eq!(controller.snapshot().status(), SessionStatus::Unauthenticated);

        controller.on_event(second.epoch, Some(identity("current"))).await;
        let session = controller.snapshot();
        assert_eq!(session.user().map(|u| u.id.as_str()), Some("current"));
        second.cancel();
    }

    #[tokio::test]
    async fn validates_sign_in_fields_locally() {
        let (controller, _, _) = controller();
        let err = controller.sign_in("  ", "secret").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::MissingFields);
    }

    #[tokio::test]
    async fn validates_sign_up_fields_locally() {
        let (controller, _, profiles) = controller();

        let err = controller.sign_up("a@b.c", "secret", "").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::MissingFields);

        let err = controller.sign_up("a@b.c", "12345", "Ann").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::WeakPassword);
        assert!(profiles.writes().is_empty());
    }
}
