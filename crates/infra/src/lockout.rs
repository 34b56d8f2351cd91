//! Failed-attempt tracking on top of the identity store.

use std::sync::Arc;

use gatehouse_auth::{Identity, LockoutPolicy, LockoutTransition};
use gatehouse_core::{Clock, IdentityId};

use crate::store::{IdentityStore, StoreError};

#[derive(Clone)]
pub struct LockoutTracker {
    identities: Arc<dyn IdentityStore>,
    policy: LockoutPolicy,
    clock: Arc<dyn Clock>,
}

impl LockoutTracker {
    pub fn new(identities: Arc<dyn IdentityStore>, policy: LockoutPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            identities,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Atomically count one failure; the store applies the transition.
    pub async fn record_failure(&self, identity_id: IdentityId) -> Result<LockoutTransition, StoreError> {
        let transition = self
            .identities
            .record_failed_attempt(identity_id, self.policy, self.clock.now())
            .await?;
        if transition.newly_locked {
            tracing::warn!(
                identity_id = %identity_id,
                failed_attempts = transition.state.failed_attempts,
                locked_until = ?transition.state.locked_until,
                "identity locked after repeated failures"
            );
        }
        Ok(transition)
    }

    pub async fn record_success(&self, identity_id: IdentityId) -> Result<(), StoreError> {
        self.identities
            .record_successful_login(identity_id, self.clock.now())
            .await
    }

    pub fn is_locked(&self, identity: &Identity) -> bool {
        gatehouse_auth::is_locked(identity.locked_until, self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use gatehouse_auth::{AuditAction, EntityKind, HandleName, NewAuditEntry};
    use gatehouse_core::{AuditEntryId, ManualClock};

    use crate::store::InMemoryStore;

    async fn seeded() -> (Arc<InMemoryStore>, Identity) {
        let store = Arc::new(InMemoryStore::new());
        let identity = Identity::new(HandleName::parse("alice").unwrap(), "h".into(), Utc::now());
        let audit = NewAuditEntry::new(AuditAction::IdentityCreated, EntityKind::Identity)
            .into_entry(AuditEntryId::new(), Utc::now());
        store.create(identity.clone(), audit).await.unwrap();
        (store, identity)
    }

    #[tokio::test]
    async fn concurrent_failures_lock_exactly_once() {
        let (store, identity) = seeded().await;
        let tracker = Arc::new(LockoutTracker::new(
            store.clone(),
            LockoutPolicy::default(),
            Arc::new(ManualClock::new(Utc::now())),
        ));

        let attempts = 20;
        let mut handles = Vec::new();
        for _ in 0..attempts {
            let tracker = tracker.clone();
            let id = identity.id;
            handles.push(tokio::spawn(async move { tracker.record_failure(id).await.unwrap() }));
        }

        let mut newly_locked = 0;
        for handle in handles {
            if handle.await.unwrap().newly_locked {
                newly_locked += 1;
            }
        }
        assert_eq!(newly_locked, 1);

        let stored = IdentityStore::get(store.as_ref(), identity.id).await.unwrap().unwrap();
        assert!(stored.failed_login_attempts >= 5);
        assert!(stored.failed_login_attempts <= attempts);
        assert!(tracker.is_locked(&stored));
    }

    #[tokio::test]
    async fn success_resets_counter() {
        let (store, identity) = seeded().await;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = LockoutTracker::new(store.clone(), LockoutPolicy::default(), clock.clone());

        for _ in 0..3 {
            tracker.record_failure(identity.id).await.unwrap();
        }
        tracker.record_success(identity.id).await.unwrap();

        let stored = IdentityStore::get(store.as_ref(), identity.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_login_attempts, 0);
        assert_eq!(stored.last_login_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn lock_expires_with_time() {
        let (store, identity) = seeded().await;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = LockoutTracker::new(store.clone(), LockoutPolicy::default(), clock.clone());

        for _ in 0..5 {
            tracker.record_failure(identity.id).await.unwrap();
        }
        let stored = IdentityStore::get(store.as_ref(), identity.id).await.unwrap().unwrap();
        assert!(tracker.is_locked(&stored));

        clock.advance(Duration::minutes(15));
        assert!(!tracker.is_locked(&stored));
    }
}
