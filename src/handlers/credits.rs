// handlers/credits.rs - /credits handlers

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credits::{AllocationRecord, AllocationTarget, ConsumptionRecord};
use crate::database::models::{CreditAccount, CreditTransaction};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::scope::RequestContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateRequest {
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub credit_amount: Decimal,
    #[serde(default)]
    pub allocation_purpose: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateApplicationRequest {
    pub source_entity_id: Uuid,
    pub target_application: String,
    pub credit_amount: Decimal,
    #[serde(default)]
    pub allocation_purpose: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub entity_id: Uuid,
    pub operation_code: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub organization_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub entity_id: Uuid,
    pub available_credits: Decimal,
    pub total_credits: Decimal,
    pub overage_used: Decimal,
    /// General account first, then application accounts the caller may see
    pub accounts: Vec<CreditAccount>,
}

/// POST /credits/allocate
pub async fn allocate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AllocateRequest>,
) -> ApiResult<AllocationRecord> {
    let ctx = user.access_context();
    state.gate.ensure_entity(&ctx, body.source_entity_id).await?;
    state.gate.ensure_entity(&ctx, body.target_entity_id).await?;

    let record = state
        .ledger
        .allocate(
            ctx.tenant_id,
            body.source_entity_id,
            AllocationTarget::Entity(body.target_entity_id),
            body.credit_amount,
            &body.allocation_purpose,
        )
        .await?;
    ctx.audit("credits.allocate", body.source_entity_id);
    Ok(ApiResponse::created(record))
}

/// POST /credits/allocate/application
pub async fn allocate_application(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AllocateApplicationRequest>,
) -> ApiResult<AllocationRecord> {
    let ctx = user.access_context();
    state.gate.ensure_entity(&ctx, body.source_entity_id).await?;

    let record = state
        .ledger
        .allocate(
            ctx.tenant_id,
            body.source_entity_id,
            AllocationTarget::Application(body.target_application.trim().to_lowercase()),
            body.credit_amount,
            &body.allocation_purpose,
        )
        .await?;
    ctx.audit("credits.allocate.application", body.source_entity_id);
    Ok(ApiResponse::created(record))
}

/// POST /credits/consume
pub async fn consume(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ConsumeRequest>,
) -> ApiResult<ConsumptionRecord> {
    let ctx = user.access_context();
    state.gate.ensure_entity(&ctx, body.entity_id).await?;
    state
        .gate
        .ensure_pricing_scope(&ctx, body.organization_id, body.location_id)
        .await?;

    let request = RequestContext::tenant(ctx.tenant_id, ctx.application_code.clone())
        .with_organization(body.organization_id)
        .with_location(body.location_id)
        .with_user(Some(ctx.user_id));
    let chain = state.scopes.resolve_for_entity(&request, body.entity_id).await?;

    let record = state
        .ledger
        .consume(&chain, body.entity_id, &body.operation_code, body.quantity)
        .await?;
    ctx.audit("credits.consume", body.entity_id);
    Ok(ApiResponse::success(record))
}

/// POST /credits/locations/:id/share
pub async fn share(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(location_id): Path<Uuid>,
    Json(body): Json<ShareRequest>,
) -> ApiResult<Vec<CreditTransaction>> {
    let ctx = user.access_context();
    let location = state.locations.get_location(ctx.tenant_id, location_id).await?;
    state.gate.ensure_location(&ctx, &location).await?;

    let transactions = state
        .ledger
        .transfer_with_sharing(ctx.tenant_id, location_id, body.amount)
        .await?;
    ctx.audit("credits.share", location_id);
    Ok(ApiResponse::success(transactions))
}

/// GET /credits/:entityId/balance
pub async fn balance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(entity_id): Path<Uuid>,
) -> ApiResult<BalanceView> {
    let ctx = user.access_context();
    state.gate.ensure_entity(&ctx, entity_id).await?;

    let general = state.ledger.balance(ctx.tenant_id, entity_id).await?;
    state.gate.ensure_account(&ctx, &general)?;
    let accounts = ctx.filter_accounts(state.ledger.accounts(ctx.tenant_id, entity_id).await?);

    Ok(ApiResponse::success(BalanceView {
        entity_id,
        available_credits: general.available_credits,
        total_credits: general.total_credits,
        overage_used: general.overage_used,
        accounts,
    }))
}

/// GET /credits/:entityId/transactions?limit=N
pub async fn transactions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(entity_id): Path<Uuid>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Vec<CreditTransaction>> {
    let ctx = user.access_context();
    state.gate.ensure_entity(&ctx, entity_id).await?;

    let limit = query.limit.unwrap_or(100);
    if limit < 1 {
        return Err(ApiError::bad_request("limit must be positive"));
    }
    let rows = state.ledger.transactions(ctx.tenant_id, entity_id, limit).await?;
    Ok(ApiResponse::success(rows))
}
