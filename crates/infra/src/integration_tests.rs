//! End-to-end scenarios across the orchestrator, admin service and stores.
//!
//! Verifies:
//! - lockout after repeated failures and automatic expiry
//! - concurrent failed logins are counted atomically and lock once
//! - refresh tokens are single use and end with their session
//! - password change invalidates every outstanding credential
//! - admin mutations are atomic with their audit entries
//! - system-defined roles and pages are protected
//!
//! The `postgres` module repeats the store-sensitive scenarios against a real
//! database when `DATABASE_URL` is set.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use gatehouse_auth::{
        AuditAction, AuthError, ClientMeta, HashCost, PageName, RefreshError, SessionError,
    };
    use gatehouse_core::{Clock, ManualClock};

    use crate::admin::{Actor, AdminError, CreateIdentity, CreatePage, CreateRole, UpdateIdentity};
    use crate::config::AuthConfig;
    use crate::services::AuthServices;
    use crate::store::{AuditQuery, InMemoryStore, Stores};

    const PASSWORD: &str = "Correct1horse";

    struct Harness {
        services: AuthServices,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn setup() -> Harness {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        let store = Arc::new(InMemoryStore::new());
        let config = AuthConfig::new("0123456789abcdef0123456789abcdef").with_hash_cost(HashCost {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        });
        let services = AuthServices::new(&config, Stores::shared(store.clone()), clock.clone()).unwrap();
        Harness { services, store, clock }
    }

    async fn create(h: &Harness, handle: &str) -> gatehouse_auth::Identity {
        h.services
            .admin
            .create_identity(
                &Actor::system(),
                CreateIdentity {
                    handle: handle.to_string(),
                    password: Some(PASSWORD.to_string()),
                },
            )
            .await
            .unwrap()
            .value
    }

    fn client() -> ClientMeta {
        ClientMeta::new(Some("203.0.113.7".to_string()), Some("integration".to_string()))
    }

    #[tokio::test]
    async fn five_failures_lock_the_account_until_the_window_passes() {
        let h = setup();
        let alice = create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        for _ in 0..4 {
            let err = auth.login("alice", "wrong", false, client()).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        let err = auth.login("alice", "wrong", false, client()).await.unwrap_err();
        let AuthError::UserLocked { locked_until } = err else {
            panic!("expected lock, got {err:?}");
        };
        assert_eq!(locked_until, h.clock.now() + Duration::minutes(15));

        // Correct password is not even looked at while locked.
        let err = auth.login("alice", PASSWORD, false, client()).await.unwrap_err();
        assert!(matches!(err, AuthError::UserLocked { .. }));

        h.clock.advance(Duration::minutes(15) + Duration::seconds(1));
        let outcome = auth.login("alice", PASSWORD, false, client()).await.unwrap();
        assert_eq!(outcome.identity_id, alice.id);

        let locks = h
            .services
            .admin
            .audit_log(AuditQuery {
                identity_id: Some(alice.id),
                action: Some(AuditAction::AccountLocked),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(locks.len(), 1);

        let stored = h.services.admin.get_identity(alice.id).await.unwrap();
        assert_eq!(stored.failed_login_attempts, 0);
        assert_eq!(stored.last_login_at, Some(h.clock.now()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failed_logins_lock_once() {
        let h = setup();
        let alice = create(&h, "alice").await;

        let attempts = 12u32;
        let mut handles = Vec::new();
        for _ in 0..attempts {
            let auth = h.services.orchestrator.clone();
            handles.push(tokio::spawn(async move {
                auth.login("alice", "wrong", false, client()).await.unwrap_err()
            }));
        }
        for handle in handles {
            let err = handle.await.unwrap();
            assert!(matches!(
                err,
                AuthError::InvalidCredentials | AuthError::UserLocked { .. }
            ));
        }

        let stored = h.services.admin.get_identity(alice.id).await.unwrap();
        assert!(stored.failed_login_attempts >= 5);
        assert!(stored.failed_login_attempts <= attempts);
        assert!(stored.locked_until.is_some());

        let entries = |action| {
            h.services.admin.audit_log(AuditQuery {
                identity_id: Some(alice.id),
                action: Some(action),
                limit: 100,
            })
        };
        let failures = entries(AuditAction::LoginFailed).await.unwrap();
        assert_eq!(failures.len() as u32, stored.failed_login_attempts);
        let locks = entries(AuditAction::AccountLocked).await.unwrap();
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn unknown_handle_and_wrong_password_look_the_same() {
        let h = setup();
        create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        let unknown = auth.login("mallory", PASSWORD, false, client()).await.unwrap_err();
        let wrong = auth.login("alice", "nope", false, client()).await.unwrap_err();
        assert_eq!(unknown.code(), wrong.code());
        assert_eq!(unknown.public_message(), wrong.public_message());
    }

    #[tokio::test]
    async fn refresh_tokens_are_single_use() {
        let h = setup();
        create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        let login = auth.login("alice", PASSWORD, true, client()).await.unwrap();
        let first = login.refresh.expect("remember-me issues a refresh token");

        let rotated = auth.refresh(&first.token, client()).await.unwrap();
        let second = rotated.refresh.expect("rotation issues a replacement");
        assert_ne!(first.token, second.token);
        assert_ne!(rotated.session_id, login.session_id);

        let err = auth.refresh(&first.token, client()).await.unwrap_err();
        assert!(matches!(err, AuthError::Refresh(RefreshError::Revoked)));

        auth.refresh(&second.token, client()).await.unwrap();
    }

    #[tokio::test]
    async fn login_without_remember_me_issues_no_refresh_token() {
        let h = setup();
        create(&h, "alice").await;
        let outcome = h
            .services
            .orchestrator
            .login("alice", PASSWORD, false, client())
            .await
            .unwrap();
        assert!(outcome.refresh.is_none());
        assert_eq!(outcome.access.expires_at, h.clock.now() + Duration::minutes(1440));
    }

    #[tokio::test]
    async fn password_change_invalidates_outstanding_credentials() {
        let h = setup();
        let alice = create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        let login = auth.login("alice", PASSWORD, true, client()).await.unwrap();
        let refresh = login.refresh.clone().unwrap();
        auth.authenticate(&login.access.token).await.unwrap();

        auth.change_password(alice.id, PASSWORD, "Another2horse", client())
            .await
            .unwrap();

        let err = auth.authenticate(&login.access.token).await.unwrap_err();
        assert!(matches!(err, AuthError::Session(SessionError::SessionNotFound)));
        let err = auth.refresh(&refresh.token, client()).await.unwrap_err();
        assert!(matches!(err, AuthError::Refresh(RefreshError::Revoked)));

        assert!(auth.login("alice", PASSWORD, false, client()).await.is_err());
        auth.login("alice", "Another2horse", false, client()).await.unwrap();
    }

    #[tokio::test]
    async fn password_change_reports_every_policy_violation() {
        let h = setup();
        let alice = create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        let err = auth.change_password(alice.id, PASSWORD, "short", client()).await.unwrap_err();
        let AuthError::Validation { violations, .. } = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(violations.len() >= 3);

        let err = auth
            .change_password(alice.id, "not-the-password", "Another2horse", client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let err = auth.change_password(alice.id, PASSWORD, PASSWORD, client()).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation { .. }));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let h = setup();
        create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        let login = auth.login("alice", PASSWORD, true, client()).await.unwrap();
        let refresh = login.refresh.clone().unwrap();

        auth.logout(Some(&login.access.token), Some(&refresh.token), client())
            .await
            .unwrap();
        auth.logout(Some(&login.access.token), Some(&refresh.token), client())
            .await
            .unwrap();
        auth.logout(None, Some("never-issued"), client()).await.unwrap();

        assert!(auth.authenticate(&login.access.token).await.is_err());
        assert!(auth.refresh(&refresh.token, client()).await.is_err());

        let logouts = h
            .services
            .admin
            .audit_log(AuditQuery {
                action: Some(AuditAction::Logout),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(logouts.len(), 1);
    }

    #[tokio::test]
    async fn logout_revokes_the_session_refresh_token_without_its_cookie() {
        let h = setup();
        create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        let laptop = auth.login("alice", PASSWORD, true, client()).await.unwrap();
        let phone = auth.login("alice", PASSWORD, true, client()).await.unwrap();

        auth.logout(Some(&laptop.access.token), None, client()).await.unwrap();

        let err = auth
            .refresh(&laptop.refresh.unwrap().token, client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Refresh(RefreshError::Revoked)));

        // Tokens minted by rotation follow the new session.
        let rotated = auth.refresh(&phone.refresh.unwrap().token, client()).await.unwrap();
        auth.logout(Some(&rotated.access.token), None, client()).await.unwrap();
        let err = auth
            .refresh(&rotated.refresh.unwrap().token, client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Refresh(RefreshError::Revoked)));
    }

    #[tokio::test]
    async fn deactivation_ends_sessions_and_blocks_login() {
        let h = setup();
        let alice = create(&h, "alice").await;
        let auth = &h.services.orchestrator;
        let login = auth.login("alice", PASSWORD, true, client()).await.unwrap();

        h.services
            .admin
            .update_identity(
                &Actor::system(),
                alice.id,
                UpdateIdentity {
                    active: Some(false),
                    ..UpdateIdentity::default()
                },
            )
            .await
            .unwrap();

        assert!(auth.authenticate(&login.access.token).await.is_err());
        let err = auth.login("alice", PASSWORD, false, client()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let stored = h.services.admin.get_identity(alice.id).await.unwrap();
        assert_eq!(stored.failed_login_attempts, 0);
    }

    #[tokio::test]
    async fn failed_audit_write_rolls_back_the_mutation() {
        let h = setup();
        let admin = &h.services.admin;

        h.store.set_fail_audit_writes(true);
        let err = admin
            .create_role(
                &Actor::system(),
                CreateRole {
                    name: "auditors".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Internal(_)));
        assert!(admin.list_roles().await.unwrap().is_empty());

        h.store.set_fail_audit_writes(false);
        let created = admin
            .create_role(
                &Actor::system(),
                CreateRole {
                    name: "auditors".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(created.audit_ids.len(), 1);
    }

    #[tokio::test]
    async fn system_roles_and_pages_are_protected() {
        let h = setup();
        let admin = &h.services.admin;
        let actor = Actor::system();

        let role = admin.seed_system_roles().await.unwrap();
        assert!(role.system_defined);
        // Seeding twice is a no-op.
        let again = admin.seed_system_roles().await.unwrap();
        assert_eq!(again.id, role.id);
        assert_eq!(admin.permissions_of(role.id).await.unwrap().len(), 1);

        let err = admin.delete_role(&actor, role.id).await.unwrap_err();
        assert!(matches!(err, AdminError::Protected(_)));

        let page = admin
            .create_page(
                &actor,
                CreatePage {
                    name: "dashboard".to_string(),
                    label: "Dashboard".to_string(),
                    route: Some("/".to_string()),
                    parent_id: None,
                    sort_order: 0,
                    system_defined: true,
                },
            )
            .await
            .unwrap()
            .value;
        let err = admin.delete_page(&actor, page.id).await.unwrap_err();
        assert!(matches!(err, AdminError::Protected(_)));
    }

    #[tokio::test]
    async fn page_grants_reach_the_principal() {
        let h = setup();
        let admin = &h.services.admin;
        let actor = Actor::system();
        let alice = create(&h, "alice").await;

        let page = |name: &str, parent| CreatePage {
            name: name.to_string(),
            label: name.to_string(),
            route: None,
            parent_id: parent,
            sort_order: 0,
            system_defined: false,
        };
        let analytics = admin.create_page(&actor, page("analytics", None)).await.unwrap().value;
        let overview = admin
            .create_page(&actor, page("analytics.overview", Some(analytics.id)))
            .await
            .unwrap()
            .value;
        let role = admin
            .create_role(
                &actor,
                CreateRole {
                    name: "analyst".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap()
            .value;

        let set = admin.set_role_pages(&actor, role.id, vec![overview.id]).await.unwrap();
        assert_eq!(set.audit_ids.len(), 1);
        // Same set again changes nothing and audits nothing.
        let unchanged = admin.set_role_pages(&actor, role.id, vec![overview.id]).await.unwrap();
        assert!(unchanged.audit_ids.is_empty());

        admin.assign_role(&actor, alice.id, role.id).await.unwrap();
        let err = admin.assign_role(&actor, alice.id, role.id).await.unwrap_err();
        assert!(matches!(err, AdminError::Conflict(_)));

        let login = h
            .services
            .orchestrator
            .login("alice", PASSWORD, false, client())
            .await
            .unwrap();
        let principal = h.services.orchestrator.authenticate(&login.access.token).await.unwrap();
        assert!(principal.entitlements.has_page(&PageName::parse("analytics.overview").unwrap()));
        assert!(principal.entitlements.has_page(&PageName::parse("analytics").unwrap()));

        let err = admin.delete_page(&actor, analytics.id).await.unwrap_err();
        assert!(matches!(err, AdminError::Conflict(_)));
    }
}

/// The same flows against a real Postgres, when `DATABASE_URL` is set.
///
/// Each test migrates into a fresh schema and drops it afterwards.
#[cfg(test)]
mod postgres {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{Duration, TimeZone, Utc};
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;

    use gatehouse_auth::{
        AuditAction, AuthError, ClientMeta, EntityKind, HandleName, HashCost, Identity,
        NewAuditEntry, RefreshError,
    };
    use gatehouse_core::{AuditEntryId, Clock, ManualClock};

    use crate::admin::{Actor, CreateIdentity};
    use crate::config::AuthConfig;
    use crate::services::AuthServices;
    use crate::store::{AuditQuery, IdentityStore, PostgresStore, StoreError, Stores};

    const PASSWORD: &str = "Correct1horse";

    struct PgHarness {
        services: AuthServices,
        store: Arc<PostgresStore>,
        clock: Arc<ManualClock>,
        admin_pool: PgPool,
        schema: String,
    }

    impl PgHarness {
        async fn teardown(self) {
            self.store.pool().close().await;
            sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
                .execute(&self.admin_pool)
                .await
                .unwrap();
        }
    }

    async fn setup() -> Option<PgHarness> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping Postgres scenario");
            return None;
        };

        let schema = format!("gatehouse_test_{}", Uuid::now_v7().simple());
        let admin_pool = PgPool::connect(&url).await.unwrap();
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin_pool)
            .await
            .unwrap();

        let search_path = schema.clone();
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .after_connect(move |conn, _meta| {
                let sql = format!("SET search_path TO {search_path}");
                Box::pin(async move {
                    sqlx::query(&sql).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .unwrap();

        let store = Arc::new(PostgresStore::new(pool, StdDuration::from_secs(5)));
        store.migrate().await.unwrap();

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        let config = AuthConfig::new("0123456789abcdef0123456789abcdef").with_hash_cost(HashCost {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        });
        let services = AuthServices::new(&config, Stores::shared(store.clone()), clock.clone()).unwrap();
        Some(PgHarness {
            services,
            store,
            clock,
            admin_pool,
            schema,
        })
    }

    async fn create(h: &PgHarness, handle: &str) -> Identity {
        h.services
            .admin
            .create_identity(
                &Actor::system(),
                CreateIdentity {
                    handle: handle.to_string(),
                    password: Some(PASSWORD.to_string()),
                },
            )
            .await
            .unwrap()
            .value
    }

    fn client() -> ClientMeta {
        ClientMeta::new(Some("203.0.113.7".to_string()), Some("postgres-it".to_string()))
    }

    async fn count(h: &PgHarness, identity: &Identity, action: AuditAction) -> usize {
        h.services
            .admin
            .audit_log(AuditQuery {
                identity_id: Some(identity.id),
                action: Some(action),
                limit: 100,
            })
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn lock_transition_is_audited() {
        let Some(h) = setup().await else { return };
        let alice = create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        // A sub-microsecond offset is lost in TIMESTAMPTZ.
        h.clock.advance(Duration::nanoseconds(1_234_567));
        for _ in 0..4 {
            let err = auth.login("alice", "wrong", false, client()).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        let err = auth.login("alice", "wrong", false, client()).await.unwrap_err();
        assert!(matches!(err, AuthError::UserLocked { .. }));

        assert_eq!(count(&h, &alice, AuditAction::LoginFailed).await, 5);
        assert_eq!(count(&h, &alice, AuditAction::AccountLocked).await, 1);

        // Failures while locked keep counting but never re-lock.
        h.clock.advance(Duration::minutes(1));
        let transition = IdentityStore::record_failed_attempt(
            h.store.as_ref(),
            alice.id,
            Default::default(),
            h.clock.now(),
        )
        .await
        .unwrap();
        assert!(!transition.newly_locked);
        assert_eq!(transition.state.failed_attempts, 6);

        h.teardown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_are_counted_atomically() {
        let Some(h) = setup().await else { return };
        let alice = create(&h, "alice").await;

        let attempts = 12u32;
        let mut handles = Vec::new();
        for _ in 0..attempts {
            let auth = h.services.orchestrator.clone();
            handles.push(tokio::spawn(async move {
                auth.login("alice", "wrong", false, client()).await.unwrap_err()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = h.services.admin.get_identity(alice.id).await.unwrap();
        assert!(stored.failed_login_attempts >= 5);
        assert!(stored.failed_login_attempts <= attempts);
        assert_eq!(
            count(&h, &alice, AuditAction::LoginFailed).await as u32,
            stored.failed_login_attempts
        );
        assert_eq!(count(&h, &alice, AuditAction::AccountLocked).await, 1);

        h.teardown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refresh_has_one_winner() {
        let Some(h) = setup().await else { return };
        create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        let login = auth.login("alice", PASSWORD, true, client()).await.unwrap();
        let token = login.refresh.unwrap().token;

        let (a, b) = tokio::join!(auth.refresh(&token, client()), auth.refresh(&token, client()));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = a.err().or(b.err()).unwrap();
        assert!(matches!(loser, AuthError::Refresh(RefreshError::Revoked)));

        h.teardown().await;
    }

    #[tokio::test]
    async fn logout_revokes_the_session_refresh_token() {
        let Some(h) = setup().await else { return };
        create(&h, "alice").await;
        let auth = &h.services.orchestrator;

        let login = auth.login("alice", PASSWORD, true, client()).await.unwrap();
        auth.logout(Some(&login.access.token), None, client()).await.unwrap();

        let err = auth
            .refresh(&login.refresh.unwrap().token, client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Refresh(RefreshError::Revoked)));

        h.teardown().await;
    }

    #[tokio::test]
    async fn failed_audit_insert_rolls_back_the_mutation() {
        let Some(h) = setup().await else { return };
        let now = h.clock.now();
        let audit = NewAuditEntry::new(AuditAction::IdentityCreated, EntityKind::Identity)
            .into_entry(AuditEntryId::new(), now);

        let alice = Identity::new(HandleName::parse("alice").unwrap(), "hash".into(), now);
        h.store.create(alice, audit.clone()).await.unwrap();

        // Reusing the audit id makes the audit insert fail after the identity row.
        let bob = Identity::new(HandleName::parse("bob").unwrap(), "hash".into(), now);
        let err = h.store.create(bob.clone(), audit).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(IdentityStore::get(h.store.as_ref(), bob.id).await.unwrap().is_none());

        h.teardown().await;
    }

    #[tokio::test]
    async fn identity_rows_are_never_cascaded() {
        let Some(h) = setup().await else { return };
        let alice = create(&h, "alice").await;
        let admin_role = h.services.admin.seed_system_roles().await.unwrap();
        h.services
            .admin
            .assign_role(&Actor::system(), alice.id, admin_role.id)
            .await
            .unwrap();

        let err = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(*alice.id.as_uuid())
            .execute(h.store.pool())
            .await
            .unwrap_err();
        let code = err.as_database_error().and_then(|e| e.code()).map(|c| c.into_owned());
        assert_eq!(code.as_deref(), Some("23503"));

        h.teardown().await;
    }
}
