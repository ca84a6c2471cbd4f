use crate::services::lookup_table::SeaOrmLookupTable;
use anyhow::Context;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub async fn connect() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    info!("📂 Lookup table database: {}", db_url);

    let mut opt = ConnectOptions::new(&db_url);
    opt.max_connections(50)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");
    Ok(db)
}

/// Connects and makes sure the lookup table exists.
pub async fn setup_lookup_table(table_name: &str) -> anyhow::Result<Arc<SeaOrmLookupTable>> {
    let db = connect().await?;
    let table = SeaOrmLookupTable::new(db, table_name);
    table.ensure_table().await?;
    info!("✅ Lookup table '{}' is ready", table.table_name());
    Ok(Arc::new(table))
}
