//! Audit log recorder.
//!
//! Entries are stamped here (id + clock time) and then either appended on their
//! own or handed to a store mutation that persists them in the same unit.

use std::sync::Arc;

use gatehouse_auth::{AuditEntry, NewAuditEntry};
use gatehouse_core::{AuditEntryId, Clock};

use crate::store::{AuditQuery, AuditStore, StoreError};

/// Hard cap on a single audit query.
pub const MAX_AUDIT_PAGE: usize = 500;

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Assign identity and timestamp without writing anything.
    pub fn prepare(&self, entry: NewAuditEntry) -> AuditEntry {
        entry.into_entry(AuditEntryId::new(), self.clock.now())
    }

    /// Append a standalone entry (login outcomes, lockouts, logouts).
    pub async fn record(&self, entry: NewAuditEntry) -> Result<AuditEntryId, StoreError> {
        let entry = self.prepare(entry);
        let id = entry.id;
        tracing::debug!(audit_id = %id, action = entry.action.as_str(), "audit entry recorded");
        self.store.append(entry).await?;
        Ok(id)
    }

    /// Newest first; `limit` is clamped to `MAX_AUDIT_PAGE`.
    pub async fn query(&self, mut query: AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        query.limit = match query.limit {
            0 => MAX_AUDIT_PAGE,
            n => n.min(MAX_AUDIT_PAGE),
        };
        self.store.query(&query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gatehouse_auth::{AuditAction, EntityKind};
    use gatehouse_core::ManualClock;

    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn entries_are_stamped_with_clock_time() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let recorder = AuditRecorder::new(Arc::new(InMemoryStore::new()), clock);

        let id = recorder
            .record(NewAuditEntry::new(AuditAction::Logout, EntityKind::Identity))
            .await
            .unwrap();

        let entries = recorder.query(AuditQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].recorded_at, start);
    }

    #[tokio::test]
    async fn query_filters_by_action() {
        let recorder = AuditRecorder::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
        );
        recorder
            .record(NewAuditEntry::new(AuditAction::LoginFailed, EntityKind::Identity))
            .await
            .unwrap();
        recorder
            .record(NewAuditEntry::new(AuditAction::LoginSucceeded, EntityKind::Identity))
            .await
            .unwrap();

        let failed = recorder
            .query(AuditQuery {
                action: Some(AuditAction::LoginFailed),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].action, AuditAction::LoginFailed);
    }
}
