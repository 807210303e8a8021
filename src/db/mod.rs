//! Database connection pool, migrations, and health check.
//!
//! Shared Postgres connection pool used by the reservation engine, the
//! LISTEN wrapper, and the worker runtime.

pub mod jobs;
pub mod listen;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres with the default pool size.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, 10).await
    }

    /// Connect with an explicit pool cap. Worker daemons size this above
    /// their concurrency so claims and outcome writes never starve the
    /// reconcile pass.
    pub async fn connect_with_pool_size(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool (for submodules).
    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
