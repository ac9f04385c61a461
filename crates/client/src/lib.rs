//! Cookbook client core.
//!
//! Session lifecycle against an external identity provider plus a keyed
//! stale-while-revalidate cache over the cookbook data API. The `cookbook`
//! binary is a thin command line front end over [`AppContext`].

pub mod api_client;
pub mod app;
pub mod config;
pub mod identity;
pub mod logging;
pub mod profile;
pub mod query;
pub mod resources;
pub mod session;
pub mod storage;
pub mod ui_state;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use api_client::ApiClient;
pub use app::AppContext;
pub use config::{ClientConfig, ConfigError};
pub use identity::{Identity, IdentityId, IdentityProvider, SessionListener, Subscription};
pub use profile::{ProfileFields, ProfileStore};
pub use query::{QueryCache, QueryConfig, QueryKey, QuerySnapshot, QueryStatus, RetryConfig};
pub use resources::{QueryHandle, ResourceData, Resources};
pub use session::{AuthUser, Session, SessionController, SessionHandle, SessionStatus};
pub use ui_state::UiState;
