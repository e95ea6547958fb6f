// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upkeep Scheduler - Periodic Maintenance Service
//!
//! A background service responsible for:
//! - Daily maintenance Copy generation
//! - Daily and weekly checklist generation
//! - Notification reminders
//! - Background jobs (Origin propagation, notifications, history)

use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};

use upkeep_core::migrations;
use upkeep_core::persistence::{JobQueue, Persistence, PostgresPersistence, SqlitePersistence};
use upkeep_scheduler::config::Config;
use upkeep_scheduler::runtime::SchedulerRuntime;

type Stores = (Arc<dyn Persistence>, Arc<dyn JobQueue>);

fn stores<S: Persistence + JobQueue + 'static>(store: S) -> Stores {
    let store = Arc::new(store);
    (store.clone(), store)
}

async fn connect(config: &Config) -> anyhow::Result<Stores> {
    if config.is_sqlite() {
        let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect_with(options)
            .await?;
        migrations::run_sqlite(&pool).await?;
        Ok(stores(SqlitePersistence::new(pool)))
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await?;
        migrations::run_postgres(&pool).await?;
        Ok(stores(PostgresPersistence::new(pool)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upkeep_scheduler=info,upkeep_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        sqlite = config.is_sqlite(),
        generation_schedule = %config.scheduler.generation_schedule,
        reminder_schedule = %config.scheduler.reminder_schedule,
        "Starting Upkeep Scheduler"
    );

    let (persistence, queue) = connect(&config).await?;
    info!("Connected to database, migrations applied");

    let runtime = SchedulerRuntime::builder()
        .persistence(persistence)
        .queue(queue)
        .scheduler_config(config.scheduler)
        .worker_config(config.worker)
        .build()?
        .start()
        .await?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Upkeep Scheduler shut down");

    Ok(())
}
