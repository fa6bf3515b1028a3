mod common;

use anyhow::Result;
use rust_decimal::Decimal;

use wrapper_api::error::CoreError;
use wrapper_api::hierarchy::NewOrganization;
use wrapper_api::locations::NewLocation;
use wrapper_api::types::{TenantOrganizationType, TenantStatus};

#[tokio::test]
async fn purge_removes_every_tenant_row() -> Result<()> {
    let Some(ctx) = common::setup_with(TenantOrganizationType::Parent, Decimal::new(100, 0)).await? else {
        return Ok(());
    };
    let state = &ctx.state;
    let tenant = ctx.tenant_id();
    let root = ctx
        .tenant
        .root_organization
        .as_ref()
        .map(|o| o.organization_id)
        .ok_or_else(|| anyhow::anyhow!("parent tenants start with a root organization"))?;

    let child = state
        .hierarchy
        .create_organization(
            tenant,
            NewOrganization {
                parent_organization_id: Some(root),
                name: "Child".to_string(),
                ..NewOrganization::default()
            },
        )
        .await?;
    state
        .locations
        .create_location(
            tenant,
            NewLocation {
                name: "Store".to_string(),
                address: None,
                location_type: None,
                max_occupancy: None,
                organization_id: Some(child.organization_id),
            },
        )
        .await?;

    let report = state.tenants.purge(tenant).await?;
    assert!(report.total() > 0);
    assert_eq!(report.deleted.get("tenants").copied(), Some(1));
    assert_eq!(report.deleted.get("organizations").copied(), Some(2));

    let err = state.tenants.get(tenant).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)), "{:?}", err);
    for table in ["organizations", "locations", "credits", "credit_transactions", "tenant_users"] {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {} WHERE tenant_id = $1", table))
            .bind(tenant)
            .fetch_one(&ctx.pool)
            .await?;
        assert_eq!(count, 0, "{} still has rows", table);
    }
    Ok(())
}

#[tokio::test]
async fn suspended_tenants_cannot_resolve_scopes() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let tenant = ctx.state.tenants.set_status(ctx.tenant_id(), TenantStatus::Suspended).await?;
    assert_eq!(tenant.status, TenantStatus::Suspended);

    let err = ctx
        .state
        .scopes
        .resolve_scope(&wrapper_api::scope::RequestContext::tenant(ctx.tenant_id(), "platform"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ScopeNotFound(_)), "{:?}", err);

    let (status, _) = ctx.request(ctx.admin_id(), "GET", "/organizations", None).await?;
    assert_eq!(status, axum::http::StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn duplicate_domains_are_rejected() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let err = ctx
        .state
        .tenants
        .onboard(wrapper_api::services::OnboardRequest {
            name: "Copycat".to_string(),
            domain: ctx.tenant.tenant.domain.to_uppercase(),
            organization_type: TenantOrganizationType::Standalone,
            status: TenantStatus::Trial,
            admin: wrapper_api::services::AdminUserInput {
                email: "copy@cat.test".to_string(),
                name: "Copy".to_string(),
            },
            initial_credits: None,
            trial_days: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)), "{:?}", err);
    Ok(())
}
