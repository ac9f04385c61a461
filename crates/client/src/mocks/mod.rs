//! In-memory providers for tests and offline demos.

mod identity;
mod profile;

pub use identity::MockIdentityProvider;
pub use profile::MockProfileStore;
