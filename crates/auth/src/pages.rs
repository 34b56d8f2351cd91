//! Navigable pages and the page hierarchy.
//!
//! A page name such as `analytics.overview` is an opaque string: the dot is an
//! operator naming convention only. Hierarchy comes from `parent_id`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, PageId};

use crate::naming::check_name;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageName(String);

impl PageName {
    pub fn parse(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        check_name("page name", &name, 128, Some('.'))?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PageName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PageName> for String {
    fn from(value: PageName) -> Self {
        value.0
    }
}

impl core::fmt::Display for PageName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub name: PageName,
    pub label: String,
    pub route: Option<String>,
    pub parent_id: Option<PageId>,
    /// System pages cannot be deleted through the admin surface.
    pub system_defined: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        if self.system_defined {
            return Err(DomainError::invariant(format!(
                "page '{}' is system-defined and cannot be deleted",
                self.name
            )));
        }
        Ok(())
    }
}

/// Check that re-parenting `page_id` under `new_parent` keeps the hierarchy a tree.
pub fn ensure_acyclic(
    pages: &[Page],
    page_id: PageId,
    new_parent: Option<PageId>,
) -> Result<(), DomainError> {
    let parents: HashMap<PageId, Option<PageId>> =
        pages.iter().map(|p| (p.id, p.parent_id)).collect();

    let mut cursor = new_parent;
    let mut seen = HashSet::new();
    while let Some(current) = cursor {
        if current == page_id {
            return Err(DomainError::invariant("page cannot be its own ancestor"));
        }
        if !seen.insert(current) {
            break;
        }
        cursor = parents.get(&current).copied().flatten();
    }
    Ok(())
}

/// Page with its visible children, for navigation rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageNode {
    pub id: PageId,
    pub name: PageName,
    pub label: String,
    pub route: Option<String>,
    pub sort_order: i32,
    pub children: Vec<PageNode>,
}

/// Nest a flat page list by parent reference.
///
/// Pages whose parent is absent from `pages` become roots. Siblings are ordered
/// by `(sort_order, name)`.
pub fn build_page_tree<'a, I>(pages: I) -> Vec<PageNode>
where
    I: IntoIterator<Item = &'a crate::PageEntry>,
{
    let entries: Vec<&crate::PageEntry> = pages.into_iter().collect();
    let present: HashSet<PageId> = entries.iter().map(|p| p.id).collect();

    let mut children: HashMap<Option<PageId>, Vec<&crate::PageEntry>> = HashMap::new();
    for entry in &entries {
        let parent = entry.parent_id.filter(|id| present.contains(id));
        children.entry(parent).or_default().push(entry);
    }

    fn build(
        parent: Option<PageId>,
        children: &HashMap<Option<PageId>, Vec<&crate::PageEntry>>,
        visiting: &mut HashSet<PageId>,
    ) -> Vec<PageNode> {
        let mut level: Vec<&crate::PageEntry> = children.get(&parent).cloned().unwrap_or_default();
        level.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));

        let mut nodes = Vec::with_capacity(level.len());
        for entry in level {
            if !visiting.insert(entry.id) {
                continue;
            }
            nodes.push(PageNode {
                id: entry.id,
                name: entry.name.clone(),
                label: entry.label.clone(),
                route: entry.route.clone(),
                sort_order: entry.sort_order,
                children: build(Some(entry.id), children, visiting),
            });
        }
        nodes
    }

    build(None, &children, &mut HashSet::new())
}
