mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use wrapper_api::credits::{AllocationTarget, ConfigValues, OverrideTarget};
use wrapper_api::error::CoreError;
use wrapper_api::hierarchy::{NewMembership, NewOrganization};
use wrapper_api::scope::RequestContext;
use wrapper_api::types::{ConfigScope, MembershipType, PoolSource, TenantOrganizationType, TransactionType};

fn cost(credits: i64) -> ConfigValues {
    ConfigValues {
        credit_cost: Decimal::new(credits, 0),
        ..ConfigValues::default()
    }
}

fn named(name: &str, parent: Option<Uuid>) -> NewOrganization {
    NewOrganization {
        parent_organization_id: parent,
        name: name.to_string(),
        ..NewOrganization::default()
    }
}

#[tokio::test]
async fn narrowest_override_wins() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let state = &ctx.state;
    let tenant = ctx.tenant_id();
    let operation = format!("crm.leads.create_{}", common::unique_suffix());

    state.configs.upsert_global(&operation, cost(100)).await?;

    let parent = state.hierarchy.create_organization(tenant, named("Parent", None)).await?;
    let entity = state
        .hierarchy
        .create_organization(tenant, named("Entity", Some(parent.organization_id)))
        .await?;
    let sibling = state
        .hierarchy
        .create_organization(tenant, named("Sibling", Some(parent.organization_id)))
        .await?;

    let op = operation.as_str();
    let resolve = |organization: Option<Uuid>, tenant_id: Uuid| {
        let request = RequestContext::tenant(tenant_id, "platform").with_organization(organization);
        async move {
            let chain = state.scopes.resolve_scope(&request).await?;
            state.configs.get_effective_cost(op, &chain).await
        }
    };

    // Only the global default exists so far
    let global = resolve(Some(entity.organization_id), tenant).await?;
    assert_eq!(global.credit_cost, Decimal::new(100, 0));
    assert!(!global.is_customized);
    assert_eq!(global.resolved_scope, ConfigScope::Global);

    state
        .configs
        .upsert_override(tenant, OverrideTarget::Tenant, &operation, cost(50))
        .await?;
    state
        .configs
        .upsert_override(tenant, OverrideTarget::Organization(entity.organization_id), &operation, cost(10))
        .await?;

    let for_entity = resolve(Some(entity.organization_id), tenant).await?;
    assert_eq!(for_entity.credit_cost, Decimal::new(10, 0));
    assert!(for_entity.is_customized);
    assert_eq!(for_entity.resolved_entity_id, Some(entity.organization_id));

    let for_sibling = resolve(Some(sibling.organization_id), tenant).await?;
    assert_eq!(for_sibling.credit_cost, Decimal::new(50, 0));
    assert_eq!(for_sibling.resolved_scope, ConfigScope::Tenant);

    let other = common::onboard(state, TenantOrganizationType::Standalone, Decimal::ZERO).await?;
    let for_other = resolve(None, other.tenant.tenant_id).await?;
    assert_eq!(for_other.credit_cost, Decimal::new(100, 0));

    // Resetting the entity override falls back to the tenant row
    let removed = state
        .configs
        .reset_override(tenant, OverrideTarget::Organization(entity.organization_id), &operation, None)
        .await?;
    assert_eq!(removed, 1);
    let after_reset = resolve(Some(entity.organization_id), tenant).await?;
    assert_eq!(after_reset.credit_cost, Decimal::new(50, 0));
    Ok(())
}

#[tokio::test]
async fn unconfigured_operations_are_rejected() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let chain = ctx
        .state
        .scopes
        .resolve_scope(&RequestContext::tenant(ctx.tenant_id(), "platform"))
        .await?;
    let operation = format!("never.configured_{}", common::unique_suffix());

    let err = ctx.state.configs.get_effective_cost(&operation, &chain).await.unwrap_err();
    assert!(matches!(err, CoreError::OperationCostNotConfigured(_)), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn consume_debits_exactly_the_cost() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let state = &ctx.state;
    let tenant = ctx.tenant_id();
    let operation = format!("crm.leads.create_{}", common::unique_suffix());
    state.configs.upsert_global(&operation, cost(100)).await?;

    let before = state.ledger.balance(tenant, tenant).await?;
    let chain = state
        .scopes
        .resolve_scope(&RequestContext::tenant(tenant, "platform"))
        .await?;
    let record = state.ledger.consume(&chain, tenant, &operation, 3).await?;

    assert_eq!(record.quote.cost, Decimal::new(300, 0));
    assert_eq!(record.transaction.amount, Decimal::new(-300, 0));
    let after = state.ledger.balance(tenant, tenant).await?;
    assert_eq!(after.available_credits, before.available_credits - Decimal::new(300, 0));
    assert_eq!(record.transaction.balance_after, after.available_credits);

    let rows = state.ledger.transactions(tenant, tenant, 10).await?;
    let consumption: Vec<_> = rows
        .iter()
        .filter(|row| row.operation_code.as_deref() == Some(operation.as_str()))
        .collect();
    assert_eq!(consumption.len(), 1);

    // 1000 - 300 leaves 700; 8 more units would need 800
    let err = state.ledger.consume(&chain, tenant, &operation, 8).await.unwrap_err();
    match err {
        CoreError::InsufficientCredits { shortfall, .. } => assert_eq!(shortfall, Decimal::new(100, 0)),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(state.ledger.balance(tenant, tenant).await?.available_credits, Decimal::new(700, 0));
    Ok(())
}

#[tokio::test]
async fn allocation_moves_credits_atomically() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let state = &ctx.state;
    let tenant = ctx.tenant_id();
    let org = state.hierarchy.create_organization(tenant, named("Branch", None)).await?;

    let record = state
        .ledger
        .allocate(tenant, tenant, AllocationTarget::Entity(org.organization_id), Decimal::new(250, 0), "seed")
        .await?;
    assert_eq!(record.target_account.available_credits, Decimal::new(250, 0));
    assert_eq!(record.source_transaction.amount, Decimal::new(-250, 0));
    assert_eq!(state.ledger.balance(tenant, tenant).await?.available_credits, Decimal::new(750, 0));

    // Over-allocation fails and leaves both sides untouched
    let err = state
        .ledger
        .allocate(tenant, org.organization_id, AllocationTarget::Entity(tenant), Decimal::new(251, 0), "too much")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientSourceBalance { .. }), "{:?}", err);
    assert_eq!(
        state.ledger.balance(tenant, org.organization_id).await?.available_credits,
        Decimal::new(250, 0)
    );
    assert_eq!(state.ledger.balance(tenant, tenant).await?.available_credits, Decimal::new(750, 0));

    // Application accounts hang off the source entity
    let app = state
        .ledger
        .allocate(tenant, tenant, AllocationTarget::Application("crm".to_string()), Decimal::new(50, 0), "crm")
        .await?;
    assert_eq!(app.target_account.application_code.as_deref(), Some("crm"));
    assert_eq!(state.ledger.accounts(tenant, tenant).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn consume_endpoint_uses_the_resolved_price() -> Result<()> {
    let Some(ctx) = common::setup_with(TenantOrganizationType::Standalone, Decimal::new(500, 0)).await? else {
        return Ok(());
    };
    let operation = format!("crm.leads.create_{}", common::unique_suffix());
    ctx.state.configs.upsert_global(&operation, cost(100)).await?;

    let (status, body) = ctx
        .request(
            ctx.admin_id(),
            "PUT",
            &format!("/credit-config/overrides/{}", operation),
            Some(json!({ "creditCost": 40 })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = ctx
        .request(
            ctx.admin_id(),
            "POST",
            "/credits/consume",
            Some(json!({ "entityId": ctx.tenant_id(), "operationCode": operation, "quantity": 2 })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = ctx
        .request(ctx.admin_id(), "GET", &format!("/credits/{}/balance", ctx.tenant_id()), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let available: Decimal = serde_json::from_value(body["data"]["availableCredits"].clone())?;
    assert_eq!(available, Decimal::new(420, 0));

    // A fresh user with no memberships cannot spend the tenant's credits on another entity
    let outsider = ctx.add_user("Outsider").await?;
    let org = ctx.state.hierarchy.create_organization(ctx.tenant_id(), named("Hidden", None)).await?;
    let (status, _) = ctx
        .request(
            outsider,
            "POST",
            "/credits/consume",
            Some(json!({ "entityId": org.organization_id, "operationCode": operation })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn expired_pools_lapse_and_refunds_restore() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let ledger = &ctx.state.ledger;
    let tenant = ctx.tenant_id();

    let before = ledger.balance(tenant, tenant).await?.available_credits;
    let granted = ledger
        .grant(
            tenant,
            tenant,
            Decimal::new(75, 0),
            PoolSource::Purchase,
            Some(Utc::now() - Duration::hours(1)),
            "stale promotion",
        )
        .await?;
    assert_eq!(granted.transaction_type, TransactionType::Allocation);
    assert_eq!(ledger.balance(tenant, tenant).await?.available_credits, before + Decimal::new(75, 0));

    let expiry = ledger.expire_pools(tenant, tenant).await?.expect("expiry row");
    assert_eq!(expiry.transaction_type, TransactionType::Expiry);
    assert_eq!(expiry.amount, Decimal::new(-75, 0));
    assert_eq!(ledger.balance(tenant, tenant).await?.available_credits, before);

    // Nothing left to expire
    assert!(ledger.expire_pools(tenant, tenant).await?.is_none());

    let refund = ledger.refund(tenant, tenant, Decimal::new(20, 0), "goodwill").await?;
    assert_eq!(refund.transaction_type, TransactionType::Refund);
    assert_eq!(refund.balance_after, before + Decimal::new(20, 0));

    let err = ledger.refund(tenant, tenant, Decimal::ZERO, "nothing").await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn pruning_keeps_customized_overrides() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let configs = &ctx.state.configs;
    let tenant = ctx.tenant_id();
    let operation = format!("crm.leads.create_{}", common::unique_suffix());

    configs.upsert_global(&operation, cost(100)).await?;
    // Same price as the default, but set deliberately by an admin
    configs
        .upsert_override(tenant, OverrideTarget::Tenant, &operation, cost(100))
        .await?;

    assert_eq!(configs.prune_inherited_overrides(tenant).await?, 0);

    let chain = ctx
        .state
        .scopes
        .resolve_scope(&RequestContext::tenant(tenant, "platform"))
        .await?;
    let effective = configs.get_effective_cost(&operation, &chain).await?;
    assert_eq!(effective.resolved_scope, ConfigScope::Tenant);
    Ok(())
}

#[tokio::test]
async fn consumption_is_priced_from_the_charged_entity() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let state = &ctx.state;
    let tenant = ctx.tenant_id();
    let operation = format!("crm.leads.create_{}", common::unique_suffix());

    let north = state.hierarchy.create_organization(tenant, named("North", None)).await?;
    let south = state.hierarchy.create_organization(tenant, named("South", None)).await?;
    state.configs.upsert_global(&operation, cost(100)).await?;
    state
        .configs
        .upsert_override(tenant, OverrideTarget::Organization(north.organization_id), &operation, cost(7))
        .await?;
    state
        .configs
        .upsert_override(tenant, OverrideTarget::Organization(south.organization_id), &operation, cost(1))
        .await?;
    state
        .ledger
        .allocate(tenant, tenant, AllocationTarget::Entity(north.organization_id), Decimal::new(100, 0), "seed")
        .await?;

    let member = ctx.add_user("NorthMember").await?;
    state
        .hierarchy
        .add_member(
            tenant,
            north.organization_id,
            NewMembership {
                user_id: member,
                membership_type: MembershipType::Member,
            },
        )
        .await?;

    // South's price is out of reach for a North-only member
    let (status, body) = ctx
        .request(
            member,
            "POST",
            "/credits/consume",
            Some(json!({
                "entityId": north.organization_id,
                "operationCode": operation,
                "organizationId": south.organization_id
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);

    let (status, _) = ctx
        .request(
            member,
            "GET",
            &format!("/credit-config/effective/{}?organizationId={}", operation, south.organization_id),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Without an explicit organization the charged entity anchors the price
    let (status, body) = ctx
        .request(
            member,
            "POST",
            "/credits/consume",
            Some(json!({ "entityId": north.organization_id, "operationCode": operation })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let amount: Decimal = serde_json::from_value(body["data"]["transaction"]["amount"].clone())?;
    assert_eq!(amount, Decimal::new(-7, 0));

    // Even an admin who sees both cannot borrow a sibling's price
    let (status, body) = ctx
        .request(
            ctx.admin_id(),
            "POST",
            "/credits/consume",
            Some(json!({
                "entityId": north.organization_id,
                "operationCode": operation,
                "organizationId": south.organization_id
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert_eq!(
        state.ledger.balance(tenant, north.organization_id).await?.available_credits,
        Decimal::new(93, 0)
    );
    Ok(())
}

#[tokio::test]
async fn application_overrides_match_regardless_of_case() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let configs = &ctx.state.configs;
    let tenant = ctx.tenant_id();
    let operation = format!("crm.leads.create_{}", common::unique_suffix());

    configs.upsert_global(&operation, cost(100)).await?;
    let row = configs
        .upsert_override(
            tenant,
            OverrideTarget::Tenant,
            &operation,
            ConfigValues {
                application_code: Some("CRM".to_string()),
                ..cost(1)
            },
        )
        .await?;
    assert_eq!(row.application_code.as_deref(), Some("crm"));

    let resolve = |application: &'static str| {
        let request = RequestContext::tenant(tenant, application);
        let state = &ctx.state;
        let op = operation.as_str();
        async move {
            let chain = state.scopes.resolve_scope(&request).await?;
            state.configs.get_effective_cost(op, &chain).await
        }
    };

    let crm = resolve("crm").await?;
    assert_eq!(crm.credit_cost, Decimal::new(1, 0));
    assert_eq!(crm.resolved_scope, ConfigScope::Tenant);

    // Other applications still pay the default
    assert_eq!(resolve("billing").await?.credit_cost, Decimal::new(100, 0));

    // The row was stored under the lower-case code
    let removed = configs
        .reset_override(tenant, OverrideTarget::Tenant, &operation, Some("crm"))
        .await?;
    assert_eq!(removed, 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_first_overrides_leave_one_row() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let configs = &ctx.state.configs;
    let tenant = ctx.tenant_id();
    let operation = format!("crm.leads.create_{}", common::unique_suffix());

    let (a, b) = tokio::join!(
        configs.upsert_override(tenant, OverrideTarget::Tenant, &operation, cost(5)),
        configs.upsert_override(tenant, OverrideTarget::Tenant, &operation, cost(6)),
    );
    a?;
    b?;

    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM credit_configurations WHERE tenant_id = $1 AND operation_code = $2",
    )
    .bind(tenant)
    .bind(&operation)
    .fetch_one(&ctx.pool)
    .await?;
    assert_eq!(count, 1);
    Ok(())
}
