//! Session controller lifecycle against the in-memory providers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use cookbook_client::mocks::{MockIdentityProvider, MockProfileStore};
use cookbook_client::{
    Identity, IdentityId, ProfileFields, Session, SessionController, SessionStatus,
};
use cookbook_shared::{AuthError, AuthErrorCode};

fn setup() -> (SessionController, MockIdentityProvider, MockProfileStore) {
    let provider = MockIdentityProvider::new();
    let profiles = MockProfileStore::new();
    let controller = SessionController::new(Arc::new(provider.clone()), Arc::new(profiles.clone()));
    (controller, provider, profiles)
}

fn identity(id: &str, email: &str) -> Identity {
    Identity {
        id: IdentityId::from(id),
        email: Some(email.to_string()),
        display_name: None,
    }
}

async fn wait_until(controller: &SessionController, done: impl FnMut(&Session) -> bool) -> Session {
    let mut rx = controller.subscribe();
    let session = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(done))
        .await
        .expect("session did not reach the expected state")
        .expect("session channel closed");
    session.clone()
}

fn user_id(session: &Session) -> Option<String> {
    session.user().map(|u| u.id.as_str().to_string())
}

#[tokio::test]
async fn starts_initializing_then_resolves_from_first_event() {
    let (controller, _provider, _) = setup();
    assert!(controller.is_loading());

    let handle = controller.initialize().unwrap();
    let session = controller.wait_until_resolved().await;

    assert_eq!(session.status(), SessionStatus::Unauthenticated);
    assert_eq!(session.session_token(), None);
    handle.cancel();
}

#[tokio::test]
async fn restores_previous_session_with_profile() {
    let (controller, provider, profiles) = setup();
    let julia = identity("uid-7", "julia@example.com");
    let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    profiles.insert(
        &julia.id,
        ProfileFields {
            name: Some("Julia".into()),
            created_at: Some(created),
            ..Default::default()
        },
    );
    provider.restore(julia);

    let handle = controller.initialize().unwrap();
    let session = controller.wait_until_resolved().await;

    assert!(session.is_authenticated());
    assert!(session.session_token().is_some());
    let user = session.user().unwrap();
    assert_eq!(user.email.as_deref(), Some("julia@example.com"));
    assert_eq!(user.profile.name.as_deref(), Some("Julia"));
    assert_eq!(user.profile.created_at, Some(created));
    assert_eq!(user.name(), Some("Julia"));
    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn slow_profile_lookup_never_overwrites_newer_event() {
    let (controller, provider, profiles) = setup();
    let a = identity("uid-a", "a@example.com");
    let b = identity("uid-b", "b@example.com");
    profiles.delay_reads_for(&a.id, Duration::from_millis(500));

    let handle = controller.initialize().unwrap();
    provider.emit(Some(a.clone()));
    provider.emit(Some(b.clone()));

    let session = wait_until(&controller, |s| s.is_authenticated()).await;
    assert_eq!(user_id(&session).as_deref(), Some("uid-b"));

    // Let A's lookup finish; its result must be discarded.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let session = controller.snapshot();
    assert_eq!(session.status(), SessionStatus::Authenticated);
    assert_eq!(user_id(&session).as_deref(), Some("uid-b"));
    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn sign_out_event_wins_over_pending_lookup() {
    let (controller, provider, profiles) = setup();
    let a = identity("uid-a", "a@example.com");
    profiles.delay_reads_for(&a.id, Duration::from_millis(500));

    let handle = controller.initialize().unwrap();
    provider.emit(Some(a));
    provider.emit(None);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let session = controller.snapshot();
    assert_eq!(session.status(), SessionStatus::Unauthenticated);
    assert!(session.user().is_none());
    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn silent_provider_times_out_to_unauthenticated() {
    let provider = MockIdentityProvider::silent();
    let controller = SessionController::new(Arc::new(provider.clone()), Arc::new(MockProfileStore::new()));

    let handle = controller
        .initialize_with_timeout(Duration::from_millis(3000))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert!(controller.is_loading());

    let session = controller.wait_until_resolved().await;
    assert_eq!(session.status(), SessionStatus::Unauthenticated);
    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn timeout_does_not_override_an_event_in_progress() {
    let (controller, provider, profiles) = setup();
    let a = identity("uid-a", "a@example.com");
    profiles.delay_reads_for(&a.id, Duration::from_secs(5));
    provider.restore(a);

    let handle = controller
        .initialize_with_timeout(Duration::from_secs(3))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(controller.is_loading());

    let session = controller.wait_until_resolved().await;
    assert!(session.is_authenticated());
    handle.cancel();
}

#[tokio::test]
async fn sign_in_with_valid_credentials_authenticates() {
    let (controller, provider, profiles) = setup();
    provider.add_account("julia@example.com", "s3cret!", Some("Julia"));
    let handle = controller.initialize().unwrap();
    controller.wait_until_resolved().await;

    let identity = controller.sign_in("julia@example.com", "s3cret!").await.unwrap();
    let session = wait_until(&controller, |s| s.is_authenticated()).await;

    let user = session.user().unwrap();
    assert_eq!(user.id, identity.id);
    assert_eq!(user.email.as_deref(), Some("julia@example.com"));
    assert_eq!(user.display_name.as_deref(), Some("Julia"));

    let writes = profiles.writes();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].merge);
    assert!(writes[0].fields.last_login.is_some());
    assert_eq!(writes[0].fields.name, None);
    handle.cancel();
}

#[tokio::test]
async fn sign_in_with_wrong_password_is_rejected() {
    let (controller, provider, _) = setup();
    provider.add_account("julia@example.com", "s3cret!", None);
    let handle = controller.initialize().unwrap();
    controller.wait_until_resolved().await;

    let err = controller.sign_in("julia@example.com", "nope").await.unwrap_err();

    assert_eq!(err.code, AuthErrorCode::InvalidCredential);
    assert_eq!(err.code.as_str(), "invalid-credential");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.snapshot().status(), SessionStatus::Unauthenticated);
    handle.cancel();
}

#[tokio::test]
async fn profile_store_outage_does_not_block_sign_in() {
    let (controller, provider, profiles) = setup();
    provider.add_account("julia@example.com", "s3cret!", None);
    profiles.fail_reads(true);
    profiles.fail_writes(true);
    let handle = controller.initialize().unwrap();
    controller.wait_until_resolved().await;

    controller.sign_in("julia@example.com", "s3cret!").await.unwrap();
    let session = wait_until(&controller, |s| s.is_authenticated()).await;

    let user = session.user().unwrap();
    assert_eq!(user.email.as_deref(), Some("julia@example.com"));
    assert!(user.profile.is_empty());
    handle.cancel();
}

#[tokio::test]
async fn sign_up_creates_full_profile() {
    let (controller, _provider, profiles) = setup();
    let handle = controller.initialize().unwrap();
    controller.wait_until_resolved().await;

    let identity = controller
        .sign_up("new@example.com", "longenough", "  Newbie ")
        .await
        .unwrap();
    let session = wait_until(&controller, |s| s.is_authenticated()).await;
    assert_eq!(session.user().unwrap().display_name.as_deref(), Some("Newbie"));

    let writes = profiles.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].id, identity.id);
    assert!(!writes[0].merge);
    let fields = &writes[0].fields;
    assert_eq!(fields.name.as_deref(), Some("Newbie"));
    assert_eq!(fields.email.as_deref(), Some("new@example.com"));
    assert!(fields.created_at.is_some());
    assert_eq!(fields.created_at, fields.last_login);
    handle.cancel();
}

#[tokio::test]
async fn sign_up_with_taken_email_fails() {
    let (controller, provider, profiles) = setup();
    provider.add_account("taken@example.com", "whatever", None);

    let err = controller
        .sign_up("taken@example.com", "longenough", "Someone")
        .await
        .unwrap_err();
    assert_eq!(err.code, AuthErrorCode::EmailAlreadyInUse);
    assert!(profiles.writes().is_empty());
}

#[tokio::test]
async fn failed_sign_out_leaves_session_unchanged() {
    let (controller, provider, _) = setup();
    provider.add_account("julia@example.com", "s3cret!", None);
    let handle = controller.initialize().unwrap();
    controller.wait_until_resolved().await;
    controller.sign_in("julia@example.com", "s3cret!").await.unwrap();
    let before = wait_until(&controller, |s| s.is_authenticated()).await;

    provider.fail_next_sign_out(AuthError::network("offline"));
    let err = controller.sign_out().await.unwrap_err();
    assert_eq!(err.code, AuthErrorCode::NetworkRequestFailed);
    assert_eq!(controller.snapshot(), before);

    controller.sign_out().await.unwrap();
    let after = controller.snapshot();
    assert_eq!(after.status(), SessionStatus::Unauthenticated);
    assert_eq!(after.session_token(), None);
    assert!(after.user().is_none());
    assert_eq!(provider.sign_out_calls(), 2);
    handle.cancel();
}

#[tokio::test]
async fn subscription_error_resolves_to_unauthenticated() {
    let provider = MockIdentityProvider::silent();
    let controller = SessionController::new(Arc::new(provider.clone()), Arc::new(MockProfileStore::new()));
    let handle = controller.initialize().unwrap();

    provider.emit_error(AuthError::network("channel closed"));
    let session = controller.wait_until_resolved().await;
    assert_eq!(session.status(), SessionStatus::Unauthenticated);
    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn cancelled_subscription_stops_mutations() {
    let (controller, provider, profiles) = setup();
    let a = identity("uid-a", "a@example.com");
    profiles.delay_reads_for(&a.id, Duration::from_millis(500));

    let handle = controller.initialize().unwrap();
    controller.wait_until_resolved().await;

    provider.emit(Some(a.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();
    assert!(!handle.is_active());

    // The lookup already in progress is dropped, later events are not delivered.
    tokio::time::sleep(Duration::from_secs(1)).await;
    provider.emit(Some(a));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(controller.snapshot().status(), SessionStatus::Unauthenticated);
    assert_eq!(provider.listener_count(), 0);
}
