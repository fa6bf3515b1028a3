use clap::Subcommand;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::cli::utils::{output_record, output_success};
use crate::cli::OutputFormat;
use crate::credits::{ConfigValues, CreditConfigService};
use crate::types::AllowancePeriod;

#[derive(Subcommand)]
pub enum CreditConfigCommands {
    #[command(about = "Create or replace the global default for an operation")]
    SetGlobal {
        #[arg(help = "Operation code, e.g. crm.lead.create")]
        operation_code: String,

        #[arg(long, help = "Credits per unit")]
        cost: Decimal,

        #[arg(long, help = "Unit label, e.g. request")]
        unit: Option<String>,

        #[arg(long, help = "Units covered by one charge")]
        unit_multiplier: Option<Decimal>,

        #[arg(long, help = "Free units per period")]
        free_allowance: Option<i64>,

        #[arg(long, help = "Allowance period: day, week, month or year")]
        period: Option<AllowancePeriod>,

        #[arg(long, help = "Allow the balance to go into overage")]
        allow_overage: Option<bool>,

        #[arg(long, help = "Maximum overage in credits")]
        overage_limit: Option<Decimal>,

        #[arg(long, help = "Restrict the default to one application")]
        application: Option<String>,
    },

    #[command(about = "Delete a tenant's uncustomized rows that match the global default")]
    Prune {
        #[arg(help = "Tenant ID")]
        tenant_id: Uuid,
    },
}

pub async fn handle(cmd: CreditConfigCommands, pool: &PgPool, output_format: OutputFormat) -> anyhow::Result<()> {
    let configs = CreditConfigService::new(pool.clone());

    match cmd {
        CreditConfigCommands::SetGlobal {
            operation_code,
            cost,
            unit,
            unit_multiplier,
            free_allowance,
            period,
            allow_overage,
            overage_limit,
            application,
        } => {
            let values = ConfigValues {
                credit_cost: cost,
                unit,
                unit_multiplier,
                free_allowance,
                free_allowance_period: period,
                allow_overage,
                overage_limit,
                application_code: application.map(|code| code.trim().to_lowercase()),
                ..ConfigValues::default()
            };
            let row = configs.upsert_global(&operation_code, values).await?;
            output_record(&output_format, &format!("Global default for {}", row.operation_code), &row)
        }
        CreditConfigCommands::Prune { tenant_id } => {
            let pruned = configs.prune_inherited_overrides(tenant_id).await?;
            output_success(
                &output_format,
                &format!("Pruned {} inherited row(s)", pruned),
                Some(json!({ "tenantId": tenant_id, "pruned": pruned })),
            )
        }
    }
}
