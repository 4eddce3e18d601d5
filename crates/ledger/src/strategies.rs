//! Strategy definition CRUD.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use model::{StrategyDefinition, StrategyKind, StrategyStatus};

use crate::codec;
use crate::error::LedgerError;
use crate::Ledger;

fn map_strategy(row: &SqliteRow) -> Result<StrategyDefinition, LedgerError> {
    Ok(StrategyDefinition {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: codec::parse::<StrategyKind>(&row.try_get::<String, _>("kind")?)?,
        config_yaml: row.try_get("config_yaml")?,
        status: codec::parse::<StrategyStatus>(&row.try_get::<String, _>("status")?)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

impl Ledger {
    pub async fn create_strategy(
        &self,
        name: &str,
        description: Option<&str>,
        kind: StrategyKind,
        config_yaml: &str,
    ) -> Result<StrategyDefinition, LedgerError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO strategies (name, description, kind, config_yaml, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(kind.as_str())
        .bind(config_yaml)
        .bind(StrategyStatus::Stopped.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_strategy(result.last_insert_rowid()).await
    }

    pub async fn get_strategy(&self, id: i64) -> Result<StrategyDefinition, LedgerError> {
        let row = sqlx::query("SELECT * FROM strategies WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(LedgerError::NotFound {
                entity: "strategy",
                id,
            })?;
        map_strategy(&row)
    }

    pub async fn list_strategies(&self) -> Result<Vec<StrategyDefinition>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM strategies ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(map_strategy).collect()
    }

    /// Edit name, description, or configuration. Allowed only while the
    /// strategy is stopped.
    pub async fn update_strategy(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
        config_yaml: Option<&str>,
    ) -> Result<StrategyDefinition, LedgerError> {
        let current = self.get_strategy(id).await?;
        if current.status != StrategyStatus::Stopped {
            return Err(LedgerError::StrategyActive { strategy_id: id });
        }

        sqlx::query(
            "UPDATE strategies SET name = ?, description = ?, config_yaml = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(name.unwrap_or(&current.name))
        .bind(description.or(current.description.as_deref()))
        .bind(config_yaml.unwrap_or(&current.config_yaml))
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;

        self.get_strategy(id).await
    }

    pub async fn set_strategy_status(
        &self,
        id: i64,
        status: StrategyStatus,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE strategies SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound {
                entity: "strategy",
                id,
            });
        }
        Ok(())
    }

    /// Delete a stopped strategy. Fails while the strategy runs or has an
    /// open run row.
    pub async fn delete_strategy(&self, id: i64) -> Result<(), LedgerError> {
        let current = self.get_strategy(id).await?;
        if current.status != StrategyStatus::Stopped {
            return Err(LedgerError::StrategyActive { strategy_id: id });
        }
        let open_run: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM strategy_runs WHERE strategy_id = ? AND stopped_at IS NULL",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        if open_run.is_some() {
            return Err(LedgerError::OpenRunExists { strategy_id: id });
        }

        sqlx::query("DELETE FROM strategies WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
