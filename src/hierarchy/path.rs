use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

const SEPARATOR: char = '/';

/// Materialized list of an organization's strict ancestors, root first.
///
/// Persisted as `"<root>/<child>/"` so that every descendant of `X` is
/// matched by `hierarchy_path LIKE '%X/%'`. A root organization has an
/// empty path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HierarchyPath(Vec<Uuid>);

#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed hierarchy path segment: {0}")]
pub struct PathParseError(String);

impl HierarchyPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_ids(ids: Vec<Uuid>) -> Self {
        Self(ids)
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Depth of the owning node; equals `organization_level`
    pub fn level(&self) -> i32 {
        self.0.len() as i32
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.0.contains(&id)
    }

    /// Path of a child whose parent has this path and id `parent_id`
    pub fn child(&self, parent_id: Uuid) -> Self {
        let mut ids = self.0.clone();
        ids.push(parent_id);
        Self(ids)
    }

    /// Immediate parent, if any
    pub fn parent(&self) -> Option<Uuid> {
        self.0.last().copied()
    }

    /// Ancestors ordered nearest first
    pub fn nearest_first(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.0.iter().rev().copied()
    }

    /// Replace the leading `old_prefix` with `new_prefix`.
    ///
    /// Returns `None` when this path does not start with `old_prefix`.
    pub fn rebase(&self, old_prefix: &HierarchyPath, new_prefix: &HierarchyPath) -> Option<Self> {
        if !self.0.starts_with(&old_prefix.0) {
            return None;
        }
        let mut ids = new_prefix.0.clone();
        ids.extend_from_slice(&self.0[old_prefix.0.len()..]);
        Some(Self(ids))
    }

    pub fn to_path_string(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 37);
        for id in &self.0 {
            out.push_str(&id.to_string());
            out.push(SEPARATOR);
        }
        out
    }

    /// LIKE pattern matching every path that passes through `id`
    pub fn descendant_pattern(id: Uuid) -> String {
        format!("%{}{}%", id, SEPARATOR)
    }
}

impl fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path_string())
    }
}

impl FromStr for HierarchyPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .map(|segment| Uuid::parse_str(segment).map_err(|_| PathParseError(segment.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl Type<Postgres> for HierarchyPath {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for HierarchyPath {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let text = <&str as Decode<'r, Postgres>>::decode(value)?;
        Ok(text.parse::<HierarchyPath>()?)
    }
}

impl<'q> Encode<'q, Postgres> for HierarchyPath {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        <String as Encode<'q, Postgres>>::encode(self.to_path_string(), buf)
    }
}

/// New level and path for one organization after a move
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathUpdate {
    pub organization_id: Uuid,
    pub path: HierarchyPath,
}

impl PathUpdate {
    pub fn level(&self) -> i32 {
        self.path.level()
    }
}

/// Compute the rewritten paths for moving `node` (and everything under it)
/// beneath `new_parent`, or to the root when `new_parent` is `None`.
///
/// `descendants` are `(id, path)` pairs for every organization whose path
/// contains the node. The first update is always the node itself.
pub fn plan_move(
    node_id: Uuid,
    node_path: &HierarchyPath,
    descendants: &[(Uuid, HierarchyPath)],
    new_parent: Option<(Uuid, &HierarchyPath)>,
) -> CoreResult<Vec<PathUpdate>> {
    let new_node_path = match new_parent {
        Some((parent_id, parent_path)) => {
            if parent_id == node_id || parent_path.contains(node_id) {
                return Err(CoreError::CycleDetected {
                    organization_id: node_id,
                    new_parent_id: parent_id,
                });
            }
            parent_path.child(parent_id)
        }
        None => HierarchyPath::root(),
    };

    let old_prefix = node_path.child(node_id);
    let new_prefix = new_node_path.child(node_id);

    let mut updates = Vec::with_capacity(descendants.len() + 1);
    updates.push(PathUpdate {
        organization_id: node_id,
        path: new_node_path,
    });

    for (id, path) in descendants {
        let rebased = path.rebase(&old_prefix, &new_prefix).ok_or_else(|| {
            CoreError::InvalidHierarchy(format!(
                "organization {} has path {} which does not pass through {}",
                id, path, node_id
            ))
        })?;
        updates.push(PathUpdate {
            organization_id: *id,
            path: rebased,
        });
    }

    Ok(updates)
}
