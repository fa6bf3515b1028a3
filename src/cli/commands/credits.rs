use chrono::{Duration, Utc};
use clap::Subcommand;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::cli::utils::{output_record, output_success};
use crate::cli::OutputFormat;
use crate::credits::LedgerService;
use crate::types::PoolSource;

#[derive(Subcommand)]
pub enum CreditsCommands {
    #[command(about = "Add credits to an entity's account, e.g. after a purchase")]
    Grant {
        #[arg(help = "Tenant ID")]
        tenant_id: Uuid,

        #[arg(help = "Entity whose account receives the credits")]
        entity_id: Uuid,

        #[arg(long, help = "Credits to add")]
        amount: Decimal,

        #[arg(long, default_value = "purchase", help = "Pool source: purchase, allocation, trial, ...")]
        source: PoolSource,

        #[arg(long, help = "Days until the granted credits expire")]
        expires_in_days: Option<i64>,

        #[arg(long, default_value = "Operator grant")]
        description: String,
    },

    #[command(about = "Return credits to an entity's account")]
    Refund {
        #[arg(help = "Tenant ID")]
        tenant_id: Uuid,

        #[arg(help = "Entity to refund")]
        entity_id: Uuid,

        #[arg(long, help = "Credits to return")]
        amount: Decimal,

        #[arg(long, default_value = "Operator refund")]
        description: String,
    },

    #[command(about = "Zero an entity's expired credit pools")]
    Expire {
        #[arg(help = "Tenant ID")]
        tenant_id: Uuid,

        #[arg(help = "Entity whose pools are swept")]
        entity_id: Uuid,
    },
}

pub async fn handle(cmd: CreditsCommands, pool: &PgPool, output_format: OutputFormat) -> anyhow::Result<()> {
    let ledger = LedgerService::new(pool.clone());

    match cmd {
        CreditsCommands::Grant {
            tenant_id,
            entity_id,
            amount,
            source,
            expires_in_days,
            description,
        } => {
            let expires_at = expires_in_days.map(|days| Utc::now() + Duration::days(days));
            let row = ledger
                .grant(tenant_id, entity_id, amount, source, expires_at, &description)
                .await?;
            output_record(&output_format, "Credits granted", &row)
        }
        CreditsCommands::Refund {
            tenant_id,
            entity_id,
            amount,
            description,
        } => {
            let row = ledger.refund(tenant_id, entity_id, amount, &description).await?;
            output_record(&output_format, "Credits refunded", &row)
        }
        CreditsCommands::Expire { tenant_id, entity_id } => match ledger.expire_pools(tenant_id, entity_id).await? {
            Some(row) => output_record(&output_format, "Expired pools", &row),
            None => output_success(
                &output_format,
                "No expired pools",
                Some(json!({ "tenantId": tenant_id, "entityId": entity_id })),
            ),
        },
    }
}
