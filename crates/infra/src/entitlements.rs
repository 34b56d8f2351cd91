//! Store-backed entitlement resolution.

use std::sync::Arc;

use gatehouse_auth::{Entitlements, PageName, RoleGrant, resolve_entitlements};
use gatehouse_core::IdentityId;

use crate::store::{RbacStore, StoreError};

#[derive(Clone)]
pub struct EntitlementResolver {
    rbac: Arc<dyn RbacStore>,
}

impl EntitlementResolver {
    pub fn new(rbac: Arc<dyn RbacStore>) -> Self {
        Self { rbac }
    }

    /// Union of roles, permissions and pages across every role assigned to the identity.
    pub async fn resolve(&self, identity_id: IdentityId) -> Result<Entitlements, StoreError> {
        let roles = self.rbac.roles_for_identity(identity_id).await?;
        let mut grants = Vec::with_capacity(roles.len());
        for role in roles {
            let permissions = self.rbac.permissions_for_role(role.id).await?;
            let page_ids = self.rbac.page_ids_for_role(role.id).await?;
            grants.push(RoleGrant {
                role_id: role.id,
                role: role.name,
                permissions,
                page_ids,
            });
        }

        let catalog = if grants.iter().any(|g| !g.page_ids.is_empty()) {
            self.rbac.list_pages().await?
        } else {
            Vec::new()
        };

        Ok(resolve_entitlements(&grants, &catalog))
    }

    pub async fn has_page_access(&self, identity_id: IdentityId, page: &PageName) -> Result<bool, StoreError> {
        Ok(self.resolve(identity_id).await?.has_page(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gatehouse_auth::{
        AuditAction, AuditEntry, EntityKind, HandleName, Identity, NewAuditEntry, Page, Role, RoleName,
    };
    use gatehouse_core::{AuditEntryId, PageId, RoleId};

    use crate::store::{IdentityStore, InMemoryStore};

    fn audit() -> AuditEntry {
        NewAuditEntry::new(AuditAction::RoleAssigned, EntityKind::IdentityRole)
            .into_entry(AuditEntryId::new(), Utc::now())
    }

    fn role(name: &str) -> Role {
        let now = Utc::now();
        Role {
            id: RoleId::new(),
            name: RoleName::parse(name.to_string()).unwrap(),
            description: None,
            system_defined: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn page(name: &str, parent: Option<PageId>) -> Page {
        let now = Utc::now();
        Page {
            id: PageId::new(),
            name: PageName::parse(name).unwrap(),
            label: name.to_string(),
            route: None,
            parent_id: parent,
            system_defined: false,
            sort_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn pages_union_across_roles() {
        let store = Arc::new(InMemoryStore::new());
        let user = Identity::new(HandleName::parse("user1").unwrap(), "h".into(), Utc::now());
        store.create(user.clone(), audit()).await.unwrap();

        let dashboard = page("dashboard", None);
        let reports = page("reports", None);
        let settings = page("settings", None);
        for p in [&dashboard, &reports, &settings] {
            store.create_page(p.clone(), audit()).await.unwrap();
        }

        let a = role("role-a");
        let b = role("role-b");
        store.create_role(a.clone(), audit()).await.unwrap();
        store.create_role(b.clone(), audit()).await.unwrap();
        store.grant_page(a.id, dashboard.id, audit()).await.unwrap();
        store.grant_page(b.id, reports.id, audit()).await.unwrap();
        store.assign_role(user.id, a.id, audit()).await.unwrap();
        store.assign_role(user.id, b.id, audit()).await.unwrap();

        let resolver = EntitlementResolver::new(store);
        assert!(resolver.has_page_access(user.id, &dashboard.name).await.unwrap());
        assert!(resolver.has_page_access(user.id, &reports.name).await.unwrap());
        assert!(!resolver.has_page_access(user.id, &settings.name).await.unwrap());
    }

    #[tokio::test]
    async fn parent_page_is_included_for_navigation() {
        let store = Arc::new(InMemoryStore::new());
        let user = Identity::new(HandleName::parse("user1").unwrap(), "h".into(), Utc::now());
        store.create(user.clone(), audit()).await.unwrap();

        let analytics = page("analytics", None);
        let overview = page("analytics.overview", Some(analytics.id));
        store.create_page(analytics.clone(), audit()).await.unwrap();
        store.create_page(overview.clone(), audit()).await.unwrap();

        let viewer = role("viewer");
        store.create_role(viewer.clone(), audit()).await.unwrap();
        store.grant_page(viewer.id, overview.id, audit()).await.unwrap();
        store.assign_role(user.id, viewer.id, audit()).await.unwrap();

        let entitlements = EntitlementResolver::new(store).resolve(user.id).await.unwrap();
        assert!(entitlements.has_page(&analytics.name));
        assert!(entitlements.has_page(&overview.name));

        let tree = entitlements.page_tree();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children[0].name, overview.name);
    }

    #[tokio::test]
    async fn identity_without_roles_resolves_empty() {
        let store = Arc::new(InMemoryStore::new());
        let entitlements = EntitlementResolver::new(store).resolve(IdentityId::new()).await.unwrap();
        assert_eq!(entitlements, Entitlements::default());
    }
}
