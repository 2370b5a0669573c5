//! # Database Migration Support
//!
//! Schema lives in the root `migrations/` directory and is embedded at compile time.
//!
//! ```rust,ignore
//! use granule_orchestrator::database::migrations;
//!
//! migrations::run(&pool).await?;
//! ```

use sqlx::PgPool;
use tracing::info;

use crate::error::OrchestratorResult;

/// Migrator over every file in `migrations/`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply outstanding migrations
pub async fn run(pool: &PgPool) -> OrchestratorResult<()> {
    info!(
        migration_count = MIGRATOR.iter().count(),
        "Running database migrations"
    );
    MIGRATOR.run(pool).await?;
    info!("Database migrations complete");
    Ok(())
}
