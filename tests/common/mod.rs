#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use wrapper_api::auth::{generate_jwt, Claims};
use wrapper_api::database::DatabaseManager;
use wrapper_api::services::{AdminUserInput, OnboardRequest, OnboardedTenant};
use wrapper_api::state::AppState;
use wrapper_api::types::{TenantOrganizationType, TenantStatus};

/// A migrated database plus one freshly onboarded tenant.
///
/// Integration tests need a Postgres instance. When `DATABASE_URL` is not
/// set `setup` returns `None` and the test passes without doing anything.
pub struct TestContext {
    pub pool: PgPool,
    pub state: AppState,
    pub tenant: OnboardedTenant,
}

pub async fn setup() -> Result<Option<TestContext>> {
    setup_with(TenantOrganizationType::Standalone, Decimal::new(1000, 0)).await
}

pub async fn setup_with(organization_type: TenantOrganizationType, credits: Decimal) -> Result<Option<TestContext>> {
    let _ = dotenvy::dotenv();
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping database test");
        return Ok(None);
    };

    let pool = DatabaseManager::connect(&url).await.context("connect to DATABASE_URL")?;
    DatabaseManager::migrate(&pool).await.context("apply migrations")?;

    let state = AppState::new(pool.clone());
    let tenant = onboard(&state, organization_type, credits).await?;
    Ok(Some(TestContext { pool, state, tenant }))
}

/// Onboard another tenant against the same database
pub async fn onboard(
    state: &AppState,
    organization_type: TenantOrganizationType,
    credits: Decimal,
) -> Result<OnboardedTenant> {
    let suffix = unique_suffix();
    let tenant = state
        .tenants
        .onboard(OnboardRequest {
            name: format!("Test Tenant {}", suffix),
            domain: format!("t{}.wrapper.test", suffix),
            organization_type,
            status: TenantStatus::Active,
            admin: AdminUserInput {
                email: format!("admin+{}@wrapper.test", suffix),
                name: "Test Admin".to_string(),
            },
            initial_credits: Some(credits),
            trial_days: Some(0),
        })
        .await?;
    Ok(tenant)
}

/// Lower-case token safe for domains and operation codes
pub fn unique_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

impl TestContext {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant.tenant.tenant_id
    }

    pub fn admin_id(&self) -> Uuid {
        self.tenant.admin.user_id
    }

    pub fn token_for(&self, user_id: Uuid) -> Result<String> {
        let claims = Claims::new(self.tenant_id(), user_id, None, Duration::hours(1));
        Ok(generate_jwt(&claims)?)
    }

    /// Insert a plain active user into the tenant
    pub async fn add_user(&self, name: &str) -> Result<Uuid> {
        let user_id = Uuid::new_v4();
        sqlx::query("INSERT INTO tenant_users (user_id, tenant_id, email, name) VALUES ($1, $2, $3, $4)")
            .bind(user_id)
            .bind(self.tenant_id())
            .bind(format!("{}+{}@wrapper.test", name.to_lowercase(), unique_suffix()))
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(user_id)
    }

    /// Send one request through the full router as `user_id`
    pub async fn request(
        &self,
        user_id: Uuid,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", self.token_for(user_id)?));
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json)?)
            }
            None => Body::empty(),
        };

        let response = wrapper_api::build_router(self.state.clone())
            .oneshot(builder.body(body)?)
            .await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, json))
    }
}
