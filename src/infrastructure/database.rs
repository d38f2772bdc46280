//! Pooled SQLite connection

use crate::config::AppConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use sqlx::SqlitePool;
use sqlx::migrate::MigrateError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

/// SQL expression for the store clock, in the same text form as [`store_timestamp`].
pub const STORE_NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

pub struct DatabaseConnection {
    connection: SqlitePool,
}

impl DatabaseConnection {
    pub fn from_pool(pool: SqlitePool) -> DatabaseConnection {
        DatabaseConnection { connection: pool }
    }

    /// Opens the pool described by `config` and brings the schema up to date.
    pub async fn connect(config: &AppConfig) -> Result<DatabaseConnection, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        info!("database ready at {}", config.database_url);

        Ok(DatabaseConnection { connection: pool })
    }
}

impl Deref for DatabaseConnection {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for DatabaseConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), MigrateError> {
    sqlx::migrate!().run(pool).await
}

/// Canonical text form of every timestamp the store writes.
///
/// Millisecond precision with a `Z` suffix, identical to what [`STORE_NOW`]
/// produces, so string comparison in SQL orders chronologically.
pub fn store_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
