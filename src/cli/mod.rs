pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config;
use crate::database::DatabaseManager;

#[derive(Parser)]
#[command(name = "wrapper")]
#[command(about = "Wrapper CLI - operator commands for the multi-tenant platform database")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true, help = "Postgres connection URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply embedded database migrations")]
    Migrate,

    #[command(about = "Tenant onboarding, status and purge")]
    Tenant {
        #[command(subcommand)]
        cmd: commands::tenant::TenantCommands,
    },

    #[command(name = "credit-config", about = "Platform-wide credit pricing")]
    CreditConfig {
        #[command(subcommand)]
        cmd: commands::credit_config::CreditConfigCommands,
    },

    #[command(about = "Operator credit grants, refunds and expiry sweeps")]
    Credits {
        #[command(subcommand)]
        cmd: commands::credits::CreditsCommands,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let pool = connect(cli.database_url.as_deref()).await?;

    match cli.command {
        Commands::Migrate => commands::migrate::handle(&pool, output_format).await,
        Commands::Tenant { cmd } => commands::tenant::handle(cmd, &pool, output_format).await,
        Commands::CreditConfig { cmd } => commands::credit_config::handle(cmd, &pool, output_format).await,
        Commands::Credits { cmd } => commands::credits::handle(cmd, &pool, output_format).await,
    }
}

async fn connect(database_url: Option<&str>) -> anyhow::Result<PgPool> {
    let url = database_url
        .map(str::to_string)
        .or_else(|| config::config().database.url.clone())
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set; pass --database-url or export it"))?;

    DatabaseManager::connect(&url)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to {}: {}", DatabaseManager::redact(&url), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::credits::CreditsCommands;
    use crate::types::PoolSource;

    #[test]
    fn parses_credit_grants() {
        let tenant = uuid::Uuid::new_v4();
        let entity = uuid::Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "wrapper",
            "credits",
            "grant",
            &tenant.to_string(),
            &entity.to_string(),
            "--amount",
            "250.5",
            "--expires-in-days",
            "30",
        ])
        .unwrap();

        match cli.command {
            Commands::Credits {
                cmd:
                    CreditsCommands::Grant {
                        tenant_id,
                        entity_id,
                        amount,
                        source,
                        expires_in_days,
                        ..
                    },
            } => {
                assert_eq!(tenant_id, tenant);
                assert_eq!(entity_id, entity);
                assert_eq!(amount, rust_decimal::Decimal::new(2505, 1));
                assert_eq!(source, PoolSource::Purchase);
                assert_eq!(expires_in_days, Some(30));
            }
            _ => panic!("expected credits grant"),
        }
    }

    #[test]
    fn parses_expiry_and_prune() {
        let id = uuid::Uuid::new_v4().to_string();
        assert!(Cli::try_parse_from(["wrapper", "credits", "expire", &id, &id]).is_ok());
        assert!(Cli::try_parse_from(["wrapper", "--json", "credit-config", "prune", &id]).is_ok());
        // Refunds need an amount
        assert!(Cli::try_parse_from(["wrapper", "credits", "refund", &id, &id]).is_err());
    }
}
