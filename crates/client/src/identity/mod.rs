//! Identity provider abstraction.
//!
//! The provider owns credentials and pushes session changes to registered
//! [`SessionListener`]s. Each listener gets its own ordered delivery queue,
//! so events reach it in the order the provider emitted them and never
//! re-entrantly from inside a provider call.

pub mod firebase;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use cookbook_shared::AuthError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use firebase::FirebaseIdentityProvider;

/// Stable identifier issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub String);

impl IdentityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The provider's own record of a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Extra data collected by the registration form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignUpProfile {
    pub display_name: String,
}

/// Observer of provider session changes.
pub trait SessionListener: Send + Sync {
    /// Called on sign-in, sign-out and session restore. `None` means signed out.
    fn on_session_change(&self, identity: Option<Identity>);

    /// Called when the provider can no longer track the session.
    fn on_subscription_error(&self, error: AuthError) {
        tracing::error!("identity subscription error: {error}");
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register `listener`. The current session state is delivered once,
    /// asynchronously, followed by every later change.
    fn subscribe(&self, listener: Arc<dyn SessionListener>) -> Subscription;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: SignUpProfile,
    ) -> Result<Identity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Identity currently held by the provider, if any.
    fn current(&self) -> Option<Identity>;
}

/// Source of bearer tokens for services that trust the identity provider.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

// --- Listener fan-out ---

#[derive(Debug, Clone)]
enum ProviderEvent {
    Changed(Option<Identity>),
    Failed(AuthError),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    queues: Vec<(u64, mpsc::UnboundedSender<ProviderEvent>)>,
}

/// Ordered fan-out of provider events to listeners.
///
/// Must be used from within a Tokio runtime: every listener is driven by its
/// own delivery task.
#[derive(Clone, Default)]
pub struct ListenerSet {
    registry: Arc<Mutex<Registry>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`, queueing `initial` as its first event.
    pub fn add(&self, listener: Arc<dyn SessionListener>, initial: Option<Identity>) -> Subscription {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));

        let id = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.next_id += 1;
            let id = registry.next_id;
            // Queued under the lock so no concurrent notify can overtake it.
            let _ = tx.send(ProviderEvent::Changed(initial));
            registry.queues.push((id, tx));
            id
        };

        let task_active = Arc::clone(&active);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !task_active.load(Ordering::Acquire) {
                    break;
                }
                match event {
                    ProviderEvent::Changed(identity) => listener.on_session_change(identity),
                    ProviderEvent::Failed(error) => listener.on_subscription_error(error),
                }
            }
        });

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            active,
        }
    }

    pub fn notify(&self, identity: Option<Identity>) {
        self.broadcast(ProviderEvent::Changed(identity));
    }

    pub fn notify_error(&self, error: AuthError) {
        self.broadcast(ProviderEvent::Failed(error));
    }

    fn broadcast(&self, event: ProviderEvent) {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, queue) in &registry.queues {
            let _ = queue.send(event.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queues
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static DETACHED_IDS: AtomicU64 = AtomicU64::new(0);

/// Cancellation token for a listener registration.
///
/// Dropping it does not unsubscribe; call [`Subscription::cancel`] on teardown.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// A subscription that is not attached to any provider.
    pub fn detached() -> Self {
        Self {
            id: u64::MAX - DETACHED_IDS.fetch_add(1, Ordering::Relaxed),
            registry: Weak::new(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop delivery to the listener. Idempotent.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.queues.retain(|(id, _)| *id != self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
