//! Mock identity provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cookbook_shared::{AuthError, AuthErrorCode};

use crate::identity::{
    Identity, IdentityId, IdentityProvider, ListenerSet, SessionListener, SignUpProfile,
    Subscription,
};

#[derive(Debug, Clone)]
struct Account {
    password: String,
    identity: Identity,
}

/// Mock identity provider.
///
/// Keeps accounts in memory and emits events the way a real provider does:
/// once on subscribe, then on every sign-in, sign-up and sign-out.
#[derive(Clone)]
pub struct MockIdentityProvider {
    accounts: Arc<Mutex<HashMap<String, Account>>>,
    current: Arc<Mutex<Option<Identity>>>,
    listeners: ListenerSet,
    emit_on_subscribe: Arc<AtomicBool>,
    sign_out_failure: Arc<Mutex<Option<AuthError>>>,
    next_uid: Arc<AtomicUsize>,
    sign_out_calls: Arc<AtomicUsize>,
}

impl MockIdentityProvider {
    /// Create a new mock provider with no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(Mutex::new(HashMap::new())),
            current: Arc::new(Mutex::new(None)),
            listeners: ListenerSet::new(),
            emit_on_subscribe: Arc::new(AtomicBool::new(true)),
            sign_out_failure: Arc::new(Mutex::new(None)),
            next_uid: Arc::new(AtomicUsize::new(1)),
            sign_out_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A provider that never calls back on subscribe (misconfigured provider).
    #[must_use]
    pub fn silent() -> Self {
        let provider = Self::new();
        provider.emit_on_subscribe.store(false, Ordering::Release);
        provider
    }

    /// Register an account and return its identity.
    pub fn add_account(&self, email: &str, password: &str, display_name: Option<&str>) -> Identity {
        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed);
        let identity = Identity {
            id: IdentityId(format!("uid-{uid}")),
            email: Some(email.to_string()),
            display_name: display_name.map(str::to_string),
        };
        self.lock_accounts().insert(
            email.to_lowercase(),
            Account {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        identity
    }

    /// Pretend a session was restored from a previous run.
    pub fn restore(&self, identity: Identity) {
        *self.lock_current() = Some(identity);
    }

    /// Emit an arbitrary session change to all listeners.
    pub fn emit(&self, identity: Option<Identity>) {
        *self.lock_current() = identity.clone();
        self.listeners.notify(identity);
    }

    /// Report a subscription failure to all listeners.
    pub fn emit_error(&self, error: AuthError) {
        self.listeners.notify_error(error);
    }

    /// Make the next `sign_out` call fail with `error`.
    pub fn fail_next_sign_out(&self, error: AuthError) {
        *self
            .sign_out_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::Acquire)
    }

    fn lock_accounts(&self) -> std::sync::MutexGuard<'_, HashMap<String, Account>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Identity>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn subscribe(&self, listener: Arc<dyn SessionListener>) -> Subscription {
        if self.emit_on_subscribe.load(Ordering::Acquire) {
            self.listeners.add(listener, self.current())
        } else {
            // Registered, but the initial state is never delivered.
            self.listeners.add(Arc::new(SkipFirst::new(listener)), None)
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        if !email.contains('@') {
            return Err(AuthError::new(AuthErrorCode::InvalidEmail, "INVALID_EMAIL"));
        }
        let account = self.lock_accounts().get(&email.to_lowercase()).cloned();
        match account {
            Some(account) if account.password == password => {
                self.emit(Some(account.identity.clone()));
                Ok(account.identity)
            }
            _ => Err(AuthError::new(
                AuthErrorCode::InvalidCredential,
                "INVALID_LOGIN_CREDENTIALS",
            )),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: SignUpProfile,
    ) -> Result<Identity, AuthError> {
        if !email.contains('@') {
            return Err(AuthError::new(AuthErrorCode::InvalidEmail, "INVALID_EMAIL"));
        }
        if password.len() < 6 {
            return Err(AuthError::new(AuthErrorCode::WeakPassword, "WEAK_PASSWORD"));
        }
        if self.lock_accounts().contains_key(&email.to_lowercase()) {
            return Err(AuthError::new(AuthErrorCode::EmailAlreadyInUse, "EMAIL_EXISTS"));
        }

        let display_name = Some(profile.display_name.as_str()).filter(|n| !n.is_empty());
        let identity = self.add_account(email, password, display_name);
        self.emit(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::AcqRel);
        let failure = self
            .sign_out_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(error) = failure {
            return Err(error);
        }
        self.emit(None);
        Ok(())
    }

    fn current(&self) -> Option<Identity> {
        self.lock_current().clone()
    }
}

/// Listener wrapper that swallows the initial delivery.
struct SkipFirst {
    inner: Arc<dyn SessionListener>,
    skipped: AtomicBool,
}

impl SkipFirst {
    fn new(inner: Arc<dyn SessionListener>) -> Self {
        Self {
            inner,
            skipped: AtomicBool::new(false),
        }
    }
}

impl SessionListener for SkipFirst {
    fn on_session_change(&self, identity: Option<Identity>) {
        if self.skipped.swap(true, Ordering::AcqRel) {
            self.inner.on_session_change(identity);
        }
    }

    fn on_subscription_error(&self, error: AuthError) {
        self.inner.on_subscription_error(error);
    }
}
