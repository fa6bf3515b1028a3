use anyhow::Context;
use chrono::Duration;
use clap::Subcommand;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{generate_jwt, Claims};
use crate::cli::utils::{output_record, output_success};
use crate::cli::OutputFormat;
use crate::services::{AdminUserInput, OnboardRequest, TenantService};
use crate::types::{TenantOrganizationType, TenantStatus};

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "Onboard a tenant with its administrator and trial credits")]
    Create {
        #[arg(help = "Tenant display name")]
        name: String,

        #[arg(long, help = "Unique tenant domain, e.g. acme.example.com")]
        domain: String,

        #[arg(long, help = "Administrator email")]
        admin_email: String,

        #[arg(long, help = "Administrator display name")]
        admin_name: String,

        #[arg(long, default_value = "standalone", help = "standalone or parent")]
        organization_type: TenantOrganizationType,

        #[arg(long, default_value = "trial", help = "trial or active")]
        status: TenantStatus,

        #[arg(long, help = "Initial credits (defaults to the configured trial credits)")]
        credits: Option<Decimal>,

        #[arg(long, help = "Trial length in days; 0 disables expiry")]
        trial_days: Option<i64>,

        #[arg(long, default_value_t = 24, help = "Lifetime in hours of the printed admin token")]
        token_hours: i64,
    },

    #[command(about = "Show a tenant, or change its status")]
    Status {
        #[arg(help = "Tenant ID")]
        tenant_id: Uuid,

        #[arg(long, help = "New status: active, suspended or trial")]
        set: Option<TenantStatus>,
    },

    #[command(about = "Delete every row owned by a tenant")]
    Purge {
        #[arg(help = "Tenant ID")]
        tenant_id: Uuid,

        #[arg(long, help = "Confirm the purge; nothing is deleted without it")]
        yes: bool,
    },
}

pub async fn handle(cmd: TenantCommands, pool: &PgPool, output_format: OutputFormat) -> anyhow::Result<()> {
    let tenants = TenantService::new(pool.clone());

    match cmd {
        TenantCommands::Create {
            name,
            domain,
            admin_email,
            admin_name,
            organization_type,
            status,
            credits,
            trial_days,
            token_hours,
        } => {
            if token_hours < 1 {
                anyhow::bail!("--token-hours must be at least 1");
            }

            let onboarded = tenants
                .onboard(OnboardRequest {
                    name,
                    domain,
                    organization_type,
                    status,
                    admin: AdminUserInput {
                        email: admin_email,
                        name: admin_name,
                    },
                    initial_credits: credits,
                    trial_days,
                })
                .await
                .context("tenant onboarding failed")?;

            let claims = Claims::new(
                onboarded.tenant.tenant_id,
                onboarded.admin.user_id,
                Some(onboarded.admin.email.clone()),
                Duration::hours(token_hours),
            );
            let token = generate_jwt(&claims)?;

            output_success(
                &output_format,
                &format!("Tenant '{}' created ({})", onboarded.tenant.name, onboarded.tenant.tenant_id),
                Some(json!({
                    "tenantId": onboarded.tenant.tenant_id,
                    "adminUserId": onboarded.admin.user_id,
                    "availableCredits": onboarded.account.available_credits,
                    "rootOrganizationId": onboarded.root_organization.as_ref().map(|o| o.organization_id),
                    "token": token
                })),
            )?;
            if let OutputFormat::Text = output_format {
                println!("Admin token: {}", token);
            }
            Ok(())
        }
        TenantCommands::Status { tenant_id, set } => {
            let tenant = match set {
                Some(status) => tenants.set_status(tenant_id, status).await?,
                None => tenants.get(tenant_id).await?,
            };
            output_record(&output_format, &format!("Tenant {}", tenant.tenant_id), &tenant)
        }
        TenantCommands::Purge { tenant_id, yes } => {
            if !yes {
                anyhow::bail!("Refusing to purge tenant {} without --yes", tenant_id);
            }

            let report = tenants.purge(tenant_id).await?;
            match output_format {
                OutputFormat::Json => output_record(&output_format, "Purge", &report),
                OutputFormat::Text => {
                    println!(
                        "✓ Purged tenant {} in {} passes ({} rows)",
                        report.tenant_id,
                        report.passes,
                        report.total()
                    );
                    for (table, count) in &report.deleted {
                        println!("  {:<32} {}", table, count);
                    }
                    for table in &report.skipped_tables {
                        println!("  {:<32} skipped (missing)", table);
                    }
                    Ok(())
                }
            }
        }
    }
}
