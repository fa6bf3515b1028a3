mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use wrapper_api::admin::{AdminState, PromoteRequest};
use wrapper_api::error::CoreError;

async fn active_admins(ctx: &common::TestContext) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM user_role_assignments WHERE tenant_id = $1 AND is_system_admin AND is_active",
    )
    .bind(ctx.tenant_id())
    .fetch_one(&ctx.pool)
    .await?;
    Ok(count)
}

fn promote(target: uuid::Uuid, force: bool, code: Option<String>) -> PromoteRequest {
    PromoteRequest {
        target_user_id: target,
        reason: "handover".to_string(),
        force_transfer: force,
        confirmation_code: code,
    }
}

#[tokio::test]
async fn onboarding_assigns_exactly_one_admin() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let current = ctx.state.admin.current(ctx.tenant_id()).await?;
    assert_eq!(current.state, AdminState::HasAdmin(ctx.admin_id()));
    assert_eq!(active_admins(&ctx).await?, 1);
    Ok(())
}

#[tokio::test]
async fn transfer_requires_force_and_the_issued_code() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let admin = &ctx.state.admin;
    let tenant = ctx.tenant_id();
    let successor = ctx.add_user("Successor").await?;

    let impact = admin.preview_promotion(tenant, successor).await?;
    assert_eq!(impact.would_demote, Some(ctx.admin_id()));
    assert!(impact.requires_confirmation);

    // First attempt issues a code and changes nothing
    let code = match admin.promote(tenant, ctx.admin_id(), promote(successor, false, None)).await {
        Err(CoreError::ConfirmationRequired { current_admin, required_code, force_requested, .. }) => {
            assert_eq!(current_admin, ctx.admin_id());
            assert!(!force_requested);
            required_code
        }
        other => panic!("expected ConfirmationRequired, got {:?}", other),
    };
    assert_eq!(active_admins(&ctx).await?, 1);

    // Force with a wrong code is still refused, and the same code is reissued
    match admin
        .promote(tenant, ctx.admin_id(), promote(successor, true, Some("WRONG000".to_string())))
        .await
    {
        Err(CoreError::ConfirmationRequired { required_code, force_requested, .. }) => {
            assert!(force_requested);
            assert_eq!(required_code, code);
        }
        other => panic!("expected ConfirmationRequired, got {:?}", other),
    }

    let outcome = admin
        .promote(tenant, ctx.admin_id(), promote(successor, true, Some(code.to_lowercase())))
        .await?;
    assert!(outcome.changed);
    assert_eq!(outcome.previous_admin, Some(ctx.admin_id()));
    assert_eq!(admin.current(tenant).await?.state, AdminState::HasAdmin(successor));
    assert_eq!(active_admins(&ctx).await?, 1);

    // Promoting the sitting admin again is a no-op
    let again = admin.promote(tenant, successor, promote(successor, false, None)).await?;
    assert!(!again.changed);
    Ok(())
}

#[tokio::test]
async fn the_only_admin_cannot_be_deactivated() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let err = ctx
        .state
        .admin
        .deactivate_user(ctx.tenant_id(), ctx.admin_id(), ctx.admin_id())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CannotDeleteOnlyAdmin(_)), "{:?}", err);

    let err = ctx
        .state
        .admin
        .revoke_admin(ctx.tenant_id(), ctx.admin_id(), ctx.admin_id(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CannotDeleteOnlyAdmin(_)), "{:?}", err);

    // Ordinary users can be deactivated
    let user = ctx.add_user("Leaver").await?;
    let deactivated = ctx.state.admin.deactivate_user(ctx.tenant_id(), ctx.admin_id(), user).await?;
    assert!(!deactivated.is_active);
    Ok(())
}

#[tokio::test]
async fn promotion_endpoint_reports_the_confirmation_code() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let successor = ctx.add_user("Successor").await?;

    let (status, body) = ctx
        .request(
            ctx.admin_id(),
            "POST",
            "/admin-promotion/promote-system-admin",
            Some(json!({ "targetUserId": successor, "reason": "handover" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);
    assert_eq!(body["code"], "CONFIRMATION_REQUIRED");
    let code = body["details"]["requiredConfirmationCode"].as_str().unwrap_or_default().to_string();
    assert_eq!(code.len(), 8);

    let (status, body) = ctx
        .request(
            ctx.admin_id(),
            "POST",
            "/admin-promotion/promote-system-admin",
            Some(json!({
                "targetUserId": successor,
                "reason": "handover",
                "forceTransfer": true,
                "confirmationCode": code
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", body);

    // The previous admin lost the role and with it access to admin routes
    let (status, _) = ctx.request(ctx.admin_id(), "GET", "/admin-promotion/current", None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = ctx.request(successor, "GET", "/admin-promotion/current", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"]["userId"], json!(successor));

    // Deleting the new sole admin over HTTP is refused
    let (status, body) = ctx
        .request(successor, "DELETE", &format!("/users/{}", successor), None)
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CANNOT_DELETE_ONLY_ADMIN");
    Ok(())
}

#[tokio::test]
async fn revoking_hands_the_role_to_the_successor() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let admin = ctx.admin_id();
    let successor = ctx.add_user("Successor").await?;

    // Only the sitting admin can be revoked
    let err = ctx
        .state
        .admin
        .revoke_admin(ctx.tenant_id(), admin, successor, Some(admin))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)), "{:?}", err);

    let (status, body) = ctx
        .request(
            admin,
            "POST",
            "/admin-promotion/revoke",
            Some(json!({ "userId": admin, "successorUserId": successor })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["previousAdmin"], json!(admin));
    assert_eq!(body["data"]["state"]["userId"], json!(successor));

    let current = ctx.state.admin.current(ctx.tenant_id()).await?;
    assert_eq!(current.state.admin(), Some(successor));

    // The old admin is now an ordinary user the new one may remove
    let (status, _) = ctx.request(admin, "GET", "/admin-promotion/current", None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = ctx.request(successor, "DELETE", &format!("/users/{}", admin), None).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    Ok(())
}
