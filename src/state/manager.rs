//! PostgreSQL state manager

use super::{
    DeploymentRecord, DeploymentStats, DeploymentStatus, DeploymentStore, DeploymentUpdate,
    RescueRecord,
};
use crate::config::DatabaseConfig;
use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> DeployerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> DeployerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS token_deployments (
                id UUID PRIMARY KEY,
                token_name VARCHAR(64) NOT NULL,
                token_symbol VARCHAR(11) NOT NULL,
                standard VARCHAR(10) NOT NULL,
                network VARCHAR(40) NOT NULL,
                chain_id BIGINT NOT NULL,
                strategy VARCHAR(20) NOT NULL,
                deployer_address VARCHAR(42) NOT NULL,
                status VARCHAR(20) NOT NULL,
                contract_address VARCHAR(42),
                tx_hash VARCHAR(66),
                error TEXT,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_deployments_created
            ON token_deployments (created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transaction_rescues (
                id BIGSERIAL PRIMARY KEY,
                network VARCHAR(40) NOT NULL,
                nonce BIGINT NOT NULL,
                tx_hash VARCHAR(66),
                status VARCHAR(20) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

fn record_from_row(row: PgRow) -> DeployerResult<DeploymentRecord> {
    let status: String = row.try_get("status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(DeploymentRecord {
        id: row.try_get::<Uuid, _>("id")?,
        token_name: row.try_get("token_name")?,
        token_symbol: row.try_get("token_symbol")?,
        standard: row.try_get("standard")?,
        network: row.try_get("network")?,
        chain_id: row.try_get::<i64, _>("chain_id")? as u64,
        strategy: row.try_get("strategy")?,
        deployer_address: row.try_get("deployer_address")?,
        status: status.parse()?,
        contract_address: row.try_get("contract_address")?,
        tx_hash: row.try_get("tx_hash")?,
        error: row.try_get("error")?,
        payload: row.try_get("payload")?,
        created_at,
    })
}

#[async_trait]
impl DeploymentStore for StateManager {
    async fn record_deployment(&self, record: &DeploymentRecord) -> DeployerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO token_deployments
                (id, token_name, token_symbol, standard, network, chain_id, strategy,
                 deployer_address, status, contract_address, tx_hash, error, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.id)
        .bind(&record.token_name)
        .bind(&record.token_symbol)
        .bind(&record.standard)
        .bind(&record.network)
        .bind(record.chain_id as i64)
        .bind(&record.strategy)
        .bind(&record.deployer_address)
        .bind(record.status.as_str())
        .bind(&record.contract_address)
        .bind(&record.tx_hash)
        .bind(&record.error)
        .bind(&record.payload)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        debug!("Recorded deployment {}", record.id);
        Ok(())
    }

    async fn update_deployment(&self, update: &DeploymentUpdate) -> DeployerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE token_deployments
            SET status = $2, contract_address = COALESCE($3, contract_address),
                tx_hash = COALESCE($4, tx_hash), error = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(update.id)
        .bind(update.status.as_str())
        .bind(&update.contract_address)
        .bind(&update.tx_hash)
        .bind(&update.error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeployerError::Internal(format!(
                "deployment {} not found",
                update.id
            )));
        }
        Ok(())
    }

    async fn list_deployments(&self, limit: i64) -> DeployerResult<Vec<DeploymentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, token_name, token_symbol, standard, network, chain_id, strategy,
                   deployer_address, status, contract_address, tx_hash, error, payload, created_at
            FROM token_deployments
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn record_rescue(&self, rescue: &RescueRecord) -> DeployerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transaction_rescues (network, nonce, tx_hash, status)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&rescue.network)
        .bind(rescue.nonce as i64)
        .bind(&rescue.tx_hash)
        .bind(&rescue.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stats(&self) -> DeployerResult<DeploymentStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = $1) as pending,
                COUNT(*) FILTER (WHERE status = $2) as deployed,
                COUNT(*) FILTER (WHERE status = $3) as failed,
                (SELECT COUNT(*) FROM transaction_rescues) as rescues
            FROM token_deployments
            "#,
        )
        .bind(DeploymentStatus::Pending.as_str())
        .bind(DeploymentStatus::Deployed.as_str())
        .bind(DeploymentStatus::Failed.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(DeploymentStats {
            pending: row.try_get::<i64, _>("pending")? as u64,
            deployed: row.try_get::<i64, _>("deployed")? as u64,
            failed: row.try_get::<i64, _>("failed")? as u64,
            rescues: row.try_get::<i64, _>("rescues")? as u64,
        })
    }

    async fn health_check(&self) -> DeployerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
