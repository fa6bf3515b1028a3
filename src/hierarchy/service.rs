use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::credits::ledger_service::open_account;
use crate::database::advisory_xact_lock;
use crate::database::models::{Organization, OrganizationMembership, Tenant, TenantUser};
use crate::error::{CoreError, CoreResult};
use crate::types::{CreditEntityType, MembershipEntityType, MembershipType, OrganizationType, TenantOrganizationType};

use super::path::{plan_move, HierarchyPath};
use super::tree::{build_tree, sort_by_depth, TenantHierarchy};

const LOCK_NAMESPACE: &str = "hierarchy";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrganization {
    pub parent_organization_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub tax_id: Option<String>,
    #[serde(skip)]
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMembership {
    pub user_id: Uuid,
    #[serde(default = "default_membership_type")]
    pub membership_type: MembershipType,
}

fn default_membership_type() -> MembershipType {
    MembershipType::Member
}

/// Organization tree storage with materialized paths
#[derive(Clone)]
pub struct HierarchyService {
    pool: PgPool,
}

impl HierarchyService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an organization under `parent_organization_id`, or a root when absent.
    pub async fn create_organization(&self, tenant_id: Uuid, input: NewOrganization) -> CoreResult<Organization> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("organization name is required".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, LOCK_NAMESPACE, tenant_id).await?;

        let tenant = fetch_tenant(&mut tx, tenant_id)
            .await?
            .ok_or_else(|| CoreError::not_found("tenant", tenant_id))?;

        let (organization_type, path) = match input.parent_organization_id {
            Some(parent_id) => {
                let parent = fetch_organization(&mut tx, parent_id)
                    .await?
                    .ok_or_else(|| CoreError::InvalidHierarchy(format!("parent organization {} does not exist", parent_id)))?;
                if parent.tenant_id != tenant_id {
                    return Err(CoreError::InvalidHierarchy(
                        "parent organization belongs to another tenant".to_string(),
                    ));
                }
                if !parent.is_active {
                    return Err(CoreError::InvalidHierarchy(format!(
                        "parent organization {} is inactive",
                        parent_id
                    )));
                }
                (OrganizationType::Sub, parent.hierarchy_path.child(parent.organization_id))
            }
            None => (root_type(&tenant), HierarchyPath::root()),
        };

        let organization = sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (
                organization_id, tenant_id, parent_organization_id, organization_type,
                organization_level, hierarchy_path, name, description, tax_id, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(input.parent_organization_id)
        .bind(organization_type)
        .bind(path.level())
        .bind(&path)
        .bind(name)
        .bind(&input.description)
        .bind(&input.tax_id)
        .bind(input.created_by)
        .fetch_one(&mut *tx)
        .await?;

        open_account(
            &mut tx,
            tenant_id,
            CreditEntityType::Organization,
            organization.organization_id,
            None,
        )
        .await?;

        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            organization_id = %organization.organization_id,
            level = organization.organization_level,
            "Created organization"
        );
        Ok(organization)
    }

    /// Re-parent an organization, rewriting level and path for its whole subtree.
    pub async fn move_organization(
        &self,
        tenant_id: Uuid,
        organization_id: Uuid,
        new_parent_id: Option<Uuid>,
    ) -> CoreResult<Organization> {
        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, LOCK_NAMESPACE, tenant_id).await?;

        let node = fetch_owned(&mut tx, tenant_id, organization_id).await?;

        let parent = match new_parent_id {
            Some(parent_id) if parent_id == organization_id => {
                return Err(CoreError::CycleDetected {
                    organization_id,
                    new_parent_id: parent_id,
                })
            }
            Some(parent_id) => {
                let parent = fetch_organization(&mut tx, parent_id)
                    .await?
                    .ok_or_else(|| CoreError::InvalidHierarchy(format!("parent organization {} does not exist", parent_id)))?;
                if parent.tenant_id != tenant_id {
                    return Err(CoreError::InvalidHierarchy(
                        "cannot move an organization under another tenant".to_string(),
                    ));
                }
                if !parent.is_active {
                    return Err(CoreError::InvalidHierarchy(format!(
                        "parent organization {} is inactive",
                        parent_id
                    )));
                }
                Some(parent)
            }
            None => None,
        };

        let descendants: Vec<(Uuid, HierarchyPath)> = sqlx::query_as(
            r#"
            SELECT organization_id, hierarchy_path
            FROM organizations
            WHERE tenant_id = $1 AND hierarchy_path LIKE $2
            "#,
        )
        .bind(tenant_id)
        .bind(HierarchyPath::descendant_pattern(organization_id))
        .fetch_all(&mut *tx)
        .await?;

        let updates = plan_move(
            organization_id,
            &node.hierarchy_path,
            &descendants,
            parent.as_ref().map(|p| (p.organization_id, &p.hierarchy_path)),
        )?;

        let organization_type = match parent {
            Some(_) => OrganizationType::Sub,
            None => {
                let tenant = fetch_tenant(&mut tx, tenant_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("tenant", tenant_id))?;
                root_type(&tenant)
            }
        };

        // The node's parent and level change together to satisfy the root/level check.
        let node_update = &updates[0];
        let moved = sqlx::query_as::<_, Organization>(
            r#"
            UPDATE organizations
            SET parent_organization_id = $2,
                organization_type = $3,
                organization_level = $4,
                hierarchy_path = $5,
                updated_at = NOW()
            WHERE organization_id = $1
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(new_parent_id)
        .bind(organization_type)
        .bind(node_update.level())
        .bind(&node_update.path)
        .fetch_one(&mut *tx)
        .await?;

        let rest = &updates[1..];
        if !rest.is_empty() {
            let ids: Vec<Uuid> = rest.iter().map(|u| u.organization_id).collect();
            let paths: Vec<String> = rest.iter().map(|u| u.path.to_path_string()).collect();
            let levels: Vec<i32> = rest.iter().map(|u| u.level()).collect();

            sqlx::query(
                r#"
                UPDATE organizations AS o
                SET hierarchy_path = u.path,
                    organization_level = u.level,
                    updated_at = NOW()
                FROM UNNEST($1::uuid[], $2::text[], $3::int4[]) AS u(id, path, level)
                WHERE o.organization_id = u.id AND o.tenant_id = $4
                "#,
            )
            .bind(&ids)
            .bind(&paths)
            .bind(&levels)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            organization_id = %organization_id,
            new_parent_id = ?new_parent_id,
            rewritten = updates.len(),
            "Moved organization"
        );
        Ok(moved)
    }

    pub async fn get_organization(&self, tenant_id: Uuid, organization_id: Uuid) -> CoreResult<Organization> {
        let mut conn = self.pool.acquire().await?;
        fetch_owned(&mut conn, tenant_id, organization_id).await
    }

    /// Strict descendants of `organization_id`, shallowest first
    pub async fn get_subtree(&self, tenant_id: Uuid, organization_id: Uuid) -> CoreResult<Vec<Organization>> {
        let mut conn = self.pool.acquire().await?;
        fetch_owned(&mut conn, tenant_id, organization_id).await?;

        let mut rows = sqlx::query_as::<_, Organization>(
            r#"
            SELECT * FROM organizations
            WHERE tenant_id = $1 AND hierarchy_path LIKE $2
            ORDER BY organization_level, created_at, organization_id
            "#,
        )
        .bind(tenant_id)
        .bind(HierarchyPath::descendant_pattern(organization_id))
        .fetch_all(&mut *conn)
        .await?;

        sort_by_depth(&mut rows);
        Ok(rows)
    }

    pub async fn get_hierarchy(&self, tenant_id: Uuid) -> CoreResult<TenantHierarchy> {
        let organizations = self.list_organizations(tenant_id).await?;
        let total_organizations = organizations.len();
        debug!(tenant_id = %tenant_id, total_organizations, "Building organization tree");

        Ok(TenantHierarchy {
            tenant_id,
            total_organizations,
            hierarchy: build_tree(organizations),
        })
    }

    /// Active organizations of a tenant
    pub async fn list_organizations(&self, tenant_id: Uuid) -> CoreResult<Vec<Organization>> {
        let rows = sqlx::query_as::<_, Organization>(
            r#"
            SELECT * FROM organizations
            WHERE tenant_id = $1 AND is_active
            ORDER BY organization_level, created_at, organization_id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_organization(
        &self,
        tenant_id: Uuid,
        organization_id: Uuid,
        update: OrganizationUpdate,
    ) -> CoreResult<Organization> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(CoreError::Validation("organization name cannot be empty".to_string()));
            }
        }

        let mut tx = self.pool.begin().await?;
        fetch_owned(&mut tx, tenant_id, organization_id).await?;

        let updated = sqlx::query_as::<_, Organization>(
            r#"
            UPDATE organizations
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                tax_id = COALESCE($4, tax_id),
                updated_at = NOW()
            WHERE organization_id = $1
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(&update.description)
        .bind(&update.tax_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Soft-delete an organization. Without `cascade` this refuses while any
    /// active descendant exists; with it the whole subtree is deactivated.
    ///
    /// Returns the number of organizations deactivated.
    pub async fn deactivate_organization(
        &self,
        tenant_id: Uuid,
        organization_id: Uuid,
        cascade: bool,
    ) -> CoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, LOCK_NAMESPACE, tenant_id).await?;
        fetch_owned(&mut tx, tenant_id, organization_id).await?;

        let pattern = HierarchyPath::descendant_pattern(organization_id);

        if !cascade {
            let (active_children,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM organizations WHERE tenant_id = $1 AND hierarchy_path LIKE $2 AND is_active",
            )
            .bind(tenant_id)
            .bind(&pattern)
            .fetch_one(&mut *tx)
            .await?;

            if active_children > 0 {
                return Err(CoreError::InvalidHierarchy(format!(
                    "organization {} has {} active descendant(s); deactivate them first or cascade",
                    organization_id, active_children
                )));
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET is_active = FALSE, updated_at = NOW()
            WHERE tenant_id = $1
              AND (organization_id = $2 OR hierarchy_path LIKE $3)
              AND is_active
            "#,
        )
        .bind(tenant_id)
        .bind(organization_id)
        .bind(&pattern)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            organization_id = %organization_id,
            cascade,
            deactivated = result.rows_affected(),
            "Deactivated organization"
        );
        Ok(result.rows_affected())
    }
    /// Add or reactivate a user's membership in an organization
    pub async fn add_member(
        &self,
        tenant_id: Uuid,
        organization_id: Uuid,
        member: NewMembership,
    ) -> CoreResult<OrganizationMembership> {
        let mut tx = self.pool.begin().await?;
        let org = fetch_owned(&mut tx, tenant_id, organization_id).await?;
        if !org.is_active {
            return Err(CoreError::Validation(format!("organization {} is inactive", organization_id)));
        }

        let user = sqlx::query_as::<_, TenantUser>("SELECT * FROM tenant_users WHERE user_id = $1")
            .bind(member.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::not_found("user", member.user_id))?;
        if user.tenant_id != tenant_id {
            return Err(CoreError::TenantMismatch);
        }

        let membership = sqlx::query_as::<_, OrganizationMembership>(
            r#"
            INSERT INTO organization_memberships (membership_id, tenant_id, user_id, entity_type, entity_id, membership_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, entity_id) DO UPDATE
            SET membership_type = EXCLUDED.membership_type, membership_status = 'active'
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(member.user_id)
        .bind(MembershipEntityType::Organization)
        .bind(organization_id)
        .bind(member.membership_type)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            organization_id = %organization_id,
            user_id = %member.user_id,
            "Added organization member"
        );
        Ok(membership)
    }
}

fn root_type(tenant: &Tenant) -> OrganizationType {
    match tenant.organization_type {
        TenantOrganizationType::Parent => OrganizationType::Parent,
        TenantOrganizationType::Standalone => OrganizationType::Standalone,
    }
}

pub(crate) async fn fetch_tenant(conn: &mut PgConnection, tenant_id: Uuid) -> CoreResult<Option<Tenant>> {
    let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
        .bind(tenant_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(tenant)
}

pub(crate) async fn fetch_organization(
    conn: &mut PgConnection,
    organization_id: Uuid,
) -> CoreResult<Option<Organization>> {
    let org = sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE organization_id = $1")
        .bind(organization_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(org)
}

/// Load an organization that must belong to `tenant_id`
async fn fetch_owned(conn: &mut PgConnection, tenant_id: Uuid, organization_id: Uuid) -> CoreResult<Organization> {
    let org = fetch_organization(conn, organization_id)
        .await?
        .ok_or_else(|| CoreError::not_found("organization", organization_id))?;
    if org.tenant_id != tenant_id {
        return Err(CoreError::TenantMismatch);
    }
    Ok(org)
}
