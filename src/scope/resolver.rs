use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::database::models::{Location, LocationAssignment, Organization};
use crate::error::{CoreError, CoreResult};
use crate::hierarchy::service::{fetch_organization, fetch_tenant};

use super::chain::{location_reachable, primary_organization, RequestContext, ScopeChain};

/// Validates a request context against the store and derives its scope chain.
///
/// Read-only and uncached: every call sees the current hierarchy.
#[derive(Clone)]
pub struct ScopeResolver {
    pool: PgPool,
}

impl ScopeResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn resolve_scope(&self, ctx: &RequestContext) -> CoreResult<ScopeChain> {
        let mut conn = self.pool.acquire().await?;

        let tenant = fetch_tenant(&mut conn, ctx.tenant_id)
            .await?
            .ok_or_else(|| CoreError::ScopeNotFound(format!("tenant {} not found", ctx.tenant_id)))?;
        if !tenant.status.is_usable() {
            return Err(CoreError::ScopeNotFound(format!("tenant {} is {}", ctx.tenant_id, tenant.status)));
        }

        let named_org = match ctx.organization_id {
            Some(org_id) => Some(self.live_organization(&mut conn, ctx.tenant_id, org_id).await?),
            None => None,
        };

        let organization = match ctx.location_id {
            Some(location_id) => {
                let location = sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE location_id = $1")
                    .bind(location_id)
                    .fetch_optional(&mut *conn)
                    .await?
                    .filter(|l| l.tenant_id == ctx.tenant_id && l.is_active)
                    .ok_or_else(|| CoreError::ScopeNotFound(format!("location {} not found", location_id)))?;

                let assignments = sqlx::query_as::<_, LocationAssignment>(
                    "SELECT * FROM location_assignments WHERE location_id = $1 AND is_active",
                )
                .bind(location.location_id)
                .fetch_all(&mut *conn)
                .await?;

                match named_org {
                    Some(org) => {
                        if !location_reachable(&org, &assignments) {
                            return Err(CoreError::ScopeNotFound(format!(
                                "location {} is not assigned to organization {} or its ancestors",
                                location_id, org.organization_id
                            )));
                        }
                        Some(org)
                    }
                    None => match primary_organization(&assignments) {
                        Some(primary_id) => fetch_organization(&mut conn, primary_id)
                            .await?
                            .filter(|o| o.tenant_id == ctx.tenant_id && o.is_active),
                        None => None,
                    },
                }
            }
            None => named_org,
        };

        let chain = ScopeChain::build(
            ctx.tenant_id,
            ctx.location_id,
            organization.as_ref(),
            ctx.user_id,
            ctx.application_code.clone(),
        );
        debug!(tenant_id = %ctx.tenant_id, levels = chain.levels().len(), "Resolved scope chain");
        Ok(chain)
    }

    /// Chain used to price a charge against `entity_id`. When the request
    /// names neither an organization nor a location, the entity anchors the
    /// chain itself.
    pub async fn resolve_for_entity(&self, ctx: &RequestContext, entity_id: Uuid) -> CoreResult<ScopeChain> {
        let mut anchored = ctx.clone();
        if ctx.organization_id.is_none() && ctx.location_id.is_none() && entity_id != ctx.tenant_id {
            let mut conn = self.pool.acquire().await?;
            let organization = fetch_organization(&mut conn, entity_id)
                .await?
                .filter(|o| o.tenant_id == ctx.tenant_id);
            if organization.is_some() {
                anchored.organization_id = Some(entity_id);
            } else {
                let location: Option<(Uuid,)> =
                    sqlx::query_as("SELECT location_id FROM locations WHERE location_id = $1 AND tenant_id = $2")
                        .bind(entity_id)
                        .bind(ctx.tenant_id)
                        .fetch_optional(&mut *conn)
                        .await?;
                anchored.location_id = location.map(|(id,)| id);
            }
        }
        self.resolve_scope(&anchored).await
    }

    async fn live_organization(
        &self,
        conn: &mut sqlx::PgConnection,
        tenant_id: Uuid,
        organization_id: Uuid,
    ) -> CoreResult<Organization> {
        fetch_organization(conn, organization_id)
            .await?
            .filter(|o| o.tenant_id == tenant_id && o.is_active)
            .ok_or_else(|| CoreError::ScopeNotFound(format!("organization {} not found", organization_id)))
    }
}
