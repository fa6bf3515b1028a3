use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::database::models::Organization;

/// An organization together with its nested children
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationNode {
    #[serde(flatten)]
    pub organization: Organization,
    pub children: Vec<OrganizationNode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantHierarchy {
    pub tenant_id: Uuid,
    pub total_organizations: usize,
    pub hierarchy: Vec<OrganizationNode>,
}

/// Nest a flat list of organizations under their parents.
///
/// Siblings are ordered by `created_at`, then id. An organization whose
/// parent is not in `organizations` is treated as a root.
pub fn build_tree(mut organizations: Vec<Organization>) -> Vec<OrganizationNode> {
    organizations.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.organization_id.cmp(&b.organization_id))
    });

    let known: HashSet<Uuid> = organizations.iter().map(|o| o.organization_id).collect();
    let mut children: HashMap<Uuid, Vec<Organization>> = HashMap::new();
    let mut roots = Vec::new();

    for org in organizations {
        match org.parent_organization_id {
            Some(parent) if known.contains(&parent) => children.entry(parent).or_default().push(org),
            _ => roots.push(org),
        }
    }

    roots
        .into_iter()
        .map(|org| attach(org, &mut children))
        .collect()
}

fn attach(org: Organization, children: &mut HashMap<Uuid, Vec<Organization>>) -> OrganizationNode {
    let kids = children.remove(&org.organization_id).unwrap_or_default();
    OrganizationNode {
        organization: org,
        children: kids.into_iter().map(|child| attach(child, children)).collect(),
    }
}

/// Order used by subtree listings: level, then creation time, then id
pub fn sort_by_depth(organizations: &mut [Organization]) {
    organizations.sort_by(|a, b| {
        a.organization_level
            .cmp(&b.organization_level)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.organization_id.cmp(&b.organization_id))
    });
}

/// `seeds` plus every organization in `organizations` that descends from one of them
pub fn with_descendants(organizations: &[Organization], seeds: &HashSet<Uuid>) -> HashSet<Uuid> {
    let mut visible = seeds.clone();
    for org in organizations {
        if org.hierarchy_path.ids().iter().any(|id| seeds.contains(id)) {
            visible.insert(org.organization_id);
        }
    }
    visible
}
