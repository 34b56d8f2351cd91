//! Page/permission entitlement resolution.
//!
//! Entitlement is the **union** across every assigned role (OR semantics): an
//! identity needs only one qualifying role to reach a page. Ancestors of every
//! granted page are added so navigation trees never contain orphans.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use gatehouse_core::{PageId, PermissionId, RoleId};

use crate::pages::{Page, PageName, PageNode, build_page_tree};
use crate::{Permission, PermissionName, RoleName};

/// Everything one role grants directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub role_id: RoleId,
    pub role: RoleName,
    pub permissions: Vec<Permission>,
    pub page_ids: Vec<PageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub id: PageId,
    pub name: PageName,
    pub label: String,
    pub route: Option<String>,
    pub parent_id: Option<PageId>,
    pub sort_order: i32,
}

impl From<&Page> for PageEntry {
    fn from(page: &Page) -> Self {
        Self {
            id: page.id,
            name: page.name.clone(),
            label: page.label.clone(),
            route: page.route.clone(),
            parent_id: page.parent_id,
            sort_order: page.sort_order,
        }
    }
}

/// Resolved `{roles, permissions, pages}` for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlements {
    pub roles: Vec<RoleName>,
    pub permissions: Vec<PermissionName>,
    pub pages: Vec<PageEntry>,
}

pub fn resolve_entitlements(grants: &[RoleGrant], catalog: &[Page]) -> Entitlements {
    let mut roles: BTreeMap<RoleId, RoleName> = BTreeMap::new();
    let mut permissions: BTreeMap<PermissionId, PermissionName> = BTreeMap::new();
    let mut granted: HashSet<PageId> = HashSet::new();

    for grant in grants {
        roles.insert(grant.role_id, grant.role.clone());
        for permission in &grant.permissions {
            permissions.insert(permission.id, permission.name.clone());
        }
        granted.extend(grant.page_ids.iter().copied());
    }

    let by_id: HashMap<PageId, &Page> = catalog.iter().map(|p| (p.id, p)).collect();

    let mut visible: HashSet<PageId> = HashSet::new();
    for page_id in granted {
        let mut cursor = Some(page_id);
        while let Some(current) = cursor {
            let Some(page) = by_id.get(&current) else {
                break;
            };
            if !visible.insert(current) {
                break;
            }
            cursor = page.parent_id;
        }
    }

    let mut pages: Vec<PageEntry> = visible
        .into_iter()
        .filter_map(|id| by_id.get(&id).map(|p| PageEntry::from(*p)))
        .collect();
    pages.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));

    let mut role_names: Vec<RoleName> = roles.into_values().collect();
    role_names.sort();
    role_names.dedup();

    let mut permission_names: Vec<PermissionName> = permissions.into_values().collect();
    permission_names.sort();
    permission_names.dedup();

    Entitlements {
        roles: role_names,
        permissions: permission_names,
        pages,
    }
}

impl Entitlements {
    pub fn has_role(&self, role: &RoleName) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, required: &PermissionName) -> bool {
        self.permissions
            .iter()
            .any(|p| p.is_wildcard() || p == required)
    }

    /// Exact page-name match; the name is never split on `.`.
    pub fn has_page(&self, page: &PageName) -> bool {
        self.pages.iter().any(|p| &p.name == page)
    }

    pub fn page_tree(&self) -> Vec<PageNode> {
        build_page_tree(&self.pages)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn page(name: &str, parent: Option<&Page>, sort_order: i32) -> Page {
        let now = Utc::now();
        Page {
            id: PageId::new(),
            name: PageName::parse(name).unwrap(),
            label: name.to_string(),
            route: Some(format!("/{}", name.replace('.', "/"))),
            parent_id: parent.map(|p| p.id),
            system_defined: false,
            sort_order,
            created_at: now,
            updated_at: now,
        }
    }

    fn grant(role: &str, pages: &[&Page], permissions: &[&str]) -> RoleGrant {
        RoleGrant {
            role_id: RoleId::new(),
            role: RoleName::parse(role.to_string()).unwrap(),
            permissions: permissions
                .iter()
                .map(|p| Permission {
                    id: PermissionId::new(),
                    name: p.parse().unwrap(),
                    description: None,
                })
                .collect(),
            page_ids: pages.iter().map(|p| p.id).collect(),
        }
    }

    #[test]
    fn pages_are_the_union_across_roles() {
        let dashboard = page("dashboard", None, 0);
        let reports = page("reports", None, 1);
        let settings = page("settings", None, 2);
        let catalog = vec![dashboard.clone(), reports.clone(), settings.clone()];

        let grants = vec![
            grant("role_a", &[&dashboard], &[]),
            grant("role_b", &[&reports], &[]),
        ];
        let resolved = resolve_entitlements(&grants, &catalog);

        assert!(resolved.has_page(&dashboard.name));
        assert!(resolved.has_page(&reports.name));
        assert!(!resolved.has_page(&settings.name));
        assert_eq!(resolved.roles.len(), 2);
    }

    #[test]
    fn granting_a_child_includes_its_parent() {
        let analytics = page("analytics", None, 0);
        let overview = page("analytics.overview", Some(&analytics), 0);
        let catalog = vec![analytics.clone(), overview.clone()];

        let resolved = resolve_entitlements(&[grant("analyst", &[&overview], &[])], &catalog);

        let names: Vec<&str> = resolved.pages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["analytics", "analytics.overview"]);

        let tree = resolved.page_tree();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children[0].name.as_str(), "analytics.overview");
    }

    #[test]
    fn dotted_name_without_parent_link_adds_nothing() {
        // Hierarchy comes from parent_id, not from the name.
        let analytics = page("analytics", None, 0);
        let orphan = page("analytics.orphan", None, 0);
        let catalog = vec![analytics.clone(), orphan.clone()];

        let resolved = resolve_entitlements(&[grant("r", &[&orphan], &[])], &catalog);
        assert!(!resolved.has_page(&analytics.name));
    }

    #[test]
    fn shared_pages_and_permissions_are_deduplicated() {
        let dashboard = page("dashboard", None, 0);
        let catalog = vec![dashboard.clone()];
        let mut a = grant("role_a", &[&dashboard], &["users:read"]);
        let b = grant("role_b", &[&dashboard], &[]);
        let mut shared = a.permissions[0].clone();
        shared.description = Some("same row".into());
        a.permissions.push(shared);

        let resolved = resolve_entitlements(&[a, b], &catalog);
        assert_eq!(resolved.pages.len(), 1);
        assert_eq!(resolved.permissions.len(), 1);
    }

    #[test]
    fn wildcard_permission_satisfies_any_requirement() {
        let resolved = resolve_entitlements(&[grant("admin", &[], &["*:*"])], &[]);
        assert!(resolved.has_permission(&"users:manage".parse().unwrap()));
    }

    #[test]
    fn no_roles_means_nothing() {
        let resolved = resolve_entitlements(&[], &[]);
        assert_eq!(resolved, Entitlements::default());
    }
}
