mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;
use wrapper_api::error::CoreError;
use wrapper_api::hierarchy::NewOrganization;

fn org(name: &str, parent: Option<uuid::Uuid>) -> NewOrganization {
    NewOrganization {
        parent_organization_id: parent,
        name: name.to_string(),
        ..NewOrganization::default()
    }
}

#[tokio::test]
async fn root_child_grandchild_scenario() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let hierarchy = &ctx.state.hierarchy;
    let tenant = ctx.tenant_id();

    let root = hierarchy.create_organization(tenant, org("Root", None)).await?;
    let child = hierarchy.create_organization(tenant, org("Child", Some(root.organization_id))).await?;
    let grandchild = hierarchy
        .create_organization(tenant, org("Grandchild", Some(child.organization_id)))
        .await?;

    assert_eq!(root.organization_level, 0);
    assert_eq!(child.organization_level, 1);
    assert_eq!(grandchild.organization_level, 2);
    assert_eq!(
        grandchild.hierarchy_path.ids(),
        &[root.organization_id, child.organization_id]
    );
    assert!(!grandchild.hierarchy_path.contains(grandchild.organization_id));

    // Root under its own child is a cycle and leaves the tree untouched
    let err = hierarchy
        .move_organization(tenant, root.organization_id, Some(child.organization_id))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CycleDetected { .. }), "{:?}", err);
    let unchanged = hierarchy.get_organization(tenant, root.organization_id).await?;
    assert_eq!(unchanged.parent_organization_id, None);
    assert_eq!(unchanged.organization_level, 0);

    // Deleting Root while descendants are active is refused
    let err = hierarchy
        .deactivate_organization(tenant, root.organization_id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidHierarchy(_)), "{:?}", err);
    assert!(hierarchy.get_organization(tenant, child.organization_id).await?.is_active);

    // Cascading deactivates the whole subtree
    let removed = hierarchy.deactivate_organization(tenant, root.organization_id, true).await?;
    assert_eq!(removed, 3);
    Ok(())
}

#[tokio::test]
async fn moving_a_subtree_rewrites_descendant_paths() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let hierarchy = &ctx.state.hierarchy;
    let tenant = ctx.tenant_id();

    let a = hierarchy.create_organization(tenant, org("A", None)).await?;
    let b = hierarchy.create_organization(tenant, org("B", None)).await?;
    let a1 = hierarchy.create_organization(tenant, org("A1", Some(a.organization_id))).await?;
    let a2 = hierarchy.create_organization(tenant, org("A2", Some(a1.organization_id))).await?;

    let moved = hierarchy
        .move_organization(tenant, a1.organization_id, Some(b.organization_id))
        .await?;
    assert_eq!(moved.parent_organization_id, Some(b.organization_id));
    assert_eq!(moved.organization_level, 1);

    let a2 = hierarchy.get_organization(tenant, a2.organization_id).await?;
    assert_eq!(a2.organization_level, 2);
    assert_eq!(a2.hierarchy_path.ids(), &[b.organization_id, a1.organization_id]);

    let subtree = hierarchy.get_subtree(tenant, b.organization_id).await?;
    let ids: Vec<_> = subtree.iter().map(|o| o.organization_id).collect();
    assert_eq!(ids, vec![a1.organization_id, a2.organization_id]);

    let tree = hierarchy.get_hierarchy(tenant).await?;
    assert_eq!(tree.total_organizations, 4);
    assert_eq!(tree.hierarchy.len(), 2);
    Ok(())
}

#[tokio::test]
async fn organizations_are_invisible_across_tenants() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let other = common::onboard(
        &ctx.state,
        wrapper_api::types::TenantOrganizationType::Standalone,
        rust_decimal::Decimal::ZERO,
    )
    .await?;

    let foreign = ctx
        .state
        .hierarchy
        .create_organization(other.tenant.tenant_id, org("Foreign", None))
        .await?;

    let (status, _) = ctx
        .request(
            ctx.admin_id(),
            "GET",
            &format!("/organizations/{}/subtree", foreign.organization_id),
            None,
        )
        .await?;
    assert!(
        status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN,
        "unexpected status {}",
        status
    );

    let (status, body) = ctx.request(ctx.admin_id(), "GET", "/organizations", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn members_only_see_their_subtree() -> Result<()> {
    let Some(ctx) = common::setup().await? else { return Ok(()) };
    let admin = ctx.admin_id();

    let (status, root) = ctx
        .request(admin, "POST", "/organizations/parent", Some(json!({ "name": "Root" })))
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let root_id = root["data"]["organizationId"].as_str().unwrap_or_default().to_string();

    let (_, east) = ctx
        .request(
            admin,
            "POST",
            "/organizations/sub",
            Some(json!({ "name": "East", "parentOrganizationId": root_id })),
        )
        .await?;
    let east_id = east["data"]["organizationId"].as_str().unwrap_or_default().to_string();
    ctx.request(
        admin,
        "POST",
        "/organizations/sub",
        Some(json!({ "name": "West", "parentOrganizationId": root_id })),
    )
    .await?;

    let member = ctx.add_user("Member").await?;
    let (status, _) = ctx
        .request(
            admin,
            "POST",
            &format!("/organizations/{}/members", east_id),
            Some(json!({ "userId": member })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = ctx.request(member, "GET", "/organizations", None).await?;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|o| o["name"].as_str())
        .collect();
    assert_eq!(names, vec!["East"]);

    // Non-admins cannot create roots
    let (status, _) = ctx
        .request(member, "POST", "/organizations/parent", Some(json!({ "name": "Rogue" })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}
