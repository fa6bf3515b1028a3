use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::models::role::TENANT_ADMIN_PERMISSION;
use crate::database::models::{
    CreditAccount, Location, LocationAssignment, Organization, OrganizationMembership,
};
use crate::error::{CoreError, CoreResult};

use super::context::{location_visibility, organization_visibility, AccessContext, Visibility};

/// Enforces tenant, organization, location and application boundaries for
/// every request that reads or writes tenant data.
#[derive(Clone)]
pub struct DataIsolationGate {
    pool: PgPool,
}

impl DataIsolationGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whether the caller holds System Administrator or a role granting `tenant.admin`
    pub async fn is_tenant_admin(&self, ctx: &AccessContext) -> CoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        tenant_admin(&mut conn, ctx).await
    }

    pub async fn require_tenant_admin(&self, ctx: &AccessContext) -> CoreResult<()> {
        if self.is_tenant_admin(ctx).await? {
            Ok(())
        } else {
            Err(CoreError::Forbidden("tenant administrator role required".to_string()))
        }
    }

    pub async fn organization_visibility(&self, ctx: &AccessContext) -> CoreResult<Visibility> {
        let mut conn = self.pool.acquire().await?;
        organizations_for(&mut conn, ctx).await
    }

    pub async fn location_visibility(&self, ctx: &AccessContext) -> CoreResult<Visibility> {
        let mut conn = self.pool.acquire().await?;
        let organizations = organizations_for(&mut conn, ctx).await?;
        if organizations == Visibility::All {
            return Ok(Visibility::All);
        }

        let memberships = memberships(&mut conn, ctx).await?;
        let assignments = sqlx::query_as::<_, LocationAssignment>(
            "SELECT * FROM location_assignments WHERE tenant_id = $1 AND is_active",
        )
        .bind(ctx.tenant_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(location_visibility(&organizations, &memberships, &assignments))
    }

    /// Tenant check plus organization visibility for a single organization
    pub async fn ensure_organization(&self, ctx: &AccessContext, organization: &Organization) -> CoreResult<()> {
        ctx.ensure_tenant(organization.tenant_id)?;
        self.organization_visibility(ctx).await?.ensure(organization.organization_id)
    }

    pub async fn ensure_location(&self, ctx: &AccessContext, location: &Location) -> CoreResult<()> {
        ctx.ensure_tenant(location.tenant_id)?;
        self.location_visibility(ctx).await?.ensure(location.location_id)
    }

    pub async fn visible_organizations(&self, ctx: &AccessContext, organizations: Vec<Organization>) -> CoreResult<Vec<Organization>> {
        let visibility = self.organization_visibility(ctx).await?;
        let owned = organizations.into_iter().filter(|o| o.tenant_id == ctx.tenant_id).collect();
        Ok(visibility.retain(owned, |o| o.organization_id))
    }

    pub async fn visible_locations(&self, ctx: &AccessContext, locations: Vec<Location>) -> CoreResult<Vec<Location>> {
        let visibility = self.location_visibility(ctx).await?;
        let owned = locations.into_iter().filter(|l| l.tenant_id == ctx.tenant_id).collect();
        Ok(visibility.retain(owned, |l| l.location_id))
    }

    /// Organization and location ids a caller supplies to pick a price must
    /// be visible like any other entity. Ownership is checked by the resolver.
    pub async fn ensure_pricing_scope(
        &self,
        ctx: &AccessContext,
        organization_id: Option<Uuid>,
        location_id: Option<Uuid>,
    ) -> CoreResult<()> {
        if let Some(organization_id) = organization_id {
            self.organization_visibility(ctx).await?.ensure(organization_id)?;
        }
        if let Some(location_id) = location_id {
            self.location_visibility(ctx).await?.ensure(location_id)?;
        }
        Ok(())
    }

    /// Credit and ledger endpoints address entities by bare id. The tenant
    /// itself and the caller are always reachable; organizations and
    /// locations must be visible.
    pub async fn ensure_entity(&self, ctx: &AccessContext, entity_id: Uuid) -> CoreResult<()> {
        if entity_id == ctx.tenant_id || entity_id == ctx.user_id {
            return Ok(());
        }
        let organizations = self.organization_visibility(ctx).await?;
        if organizations.allows(entity_id) || self.location_visibility(ctx).await?.allows(entity_id) {
            return Ok(());
        }
        Err(CoreError::Forbidden(format!("entity {} is not visible to the caller", entity_id)))
    }

    /// A credit account is readable when it belongs to the tenant and is not
    /// scoped to another application
    pub fn ensure_account(&self, ctx: &AccessContext, account: &CreditAccount) -> CoreResult<()> {
        ctx.ensure_tenant(account.tenant_id)?;
        if ctx.sees_application(account.application_code.as_deref()) {
            Ok(())
        } else {
            Err(CoreError::not_found("credit account for entity", account.entity_id))
        }
    }
}

async fn tenant_admin(conn: &mut PgConnection, ctx: &AccessContext) -> CoreResult<bool> {
    let (is_admin,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM user_role_assignments ura
            JOIN custom_roles cr ON cr.role_id = ura.role_id
            WHERE ura.tenant_id = $1
              AND ura.user_id = $2
              AND ura.is_active
              AND cr.is_active
              AND (ura.is_system_admin OR $3 = ANY(cr.permissions))
        )
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(ctx.user_id)
    .bind(TENANT_ADMIN_PERMISSION)
    .fetch_one(&mut *conn)
    .await?;
    Ok(is_admin)
}

async fn memberships(conn: &mut PgConnection, ctx: &AccessContext) -> CoreResult<Vec<OrganizationMembership>> {
    let rows = sqlx::query_as::<_, OrganizationMembership>(
        "SELECT * FROM organization_memberships WHERE tenant_id = $1 AND user_id = $2",
    )
    .bind(ctx.tenant_id)
    .bind(ctx.user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

async fn organizations_for(conn: &mut PgConnection, ctx: &AccessContext) -> CoreResult<Visibility> {
    if tenant_admin(conn, ctx).await? {
        return Ok(Visibility::All);
    }

    let memberships = memberships(conn, ctx).await?;
    let organizations = sqlx::query_as::<_, Organization>(
        "SELECT * FROM organizations WHERE tenant_id = $1 AND is_active",
    )
    .bind(ctx.tenant_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(organization_visibility(false, &memberships, &organizations))
}
