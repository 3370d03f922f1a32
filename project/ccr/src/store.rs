//! SQLite persistence for checkpoint rows.

use sqlx::SqlitePool;
use sqlx::prelude::FromRow;

use crate::model::{Checkpoint, CcrMount};

#[derive(FromRow)]
struct CheckpointRow {
    id: String,
    sandbox: String,
    container: String,
    round: i64,
    #[sqlx(rename = "ref")]
    reference: String,
    committed: bool,
    mount_type: String,
    mount_source: String,
    mount_options: String,
}

impl From<CheckpointRow> for Checkpoint {
    fn from(row: CheckpointRow) -> Self {
        Checkpoint {
            id: row.id,
            sandbox: row.sandbox,
            container: row.container,
            round: row.round,
            reference: row.reference,
            committed: row.committed,
            mount: CcrMount {
                typ: row.mount_type,
                source: row.mount_source,
                options: serde_json::from_str(&row.mount_options).unwrap_or_default(),
            },
        }
    }
}

#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    /// Connect-time schema setup; idempotent.
    pub async fn init(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                sandbox TEXT NOT NULL,
                container TEXT NOT NULL,
                round INTEGER NOT NULL,
                ref TEXT NOT NULL,
                committed BOOLEAN NOT NULL DEFAULT FALSE,
                mount_type TEXT NOT NULL DEFAULT '',
                mount_source TEXT NOT NULL DEFAULT '',
                mount_options TEXT NOT NULL DEFAULT '[]'
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn insert(&self, cp: &Checkpoint) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO checkpoints
             (id, sandbox, container, round, ref, committed, mount_type, mount_source, mount_options)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&cp.id)
        .bind(&cp.sandbox)
        .bind(&cp.container)
        .bind(cp.round)
        .bind(&cp.reference)
        .bind(cp.committed)
        .bind(&cp.mount.typ)
        .bind(&cp.mount.source)
        .bind(serde_json::to_string(&cp.mount.options).unwrap_or_else(|_| "[]".into()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Checkpoint>, sqlx::Error> {
        let row = sqlx::query_as::<_, CheckpointRow>("SELECT * FROM checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    /// The newest committed round for a (sandbox, container) pair.
    pub async fn latest_committed(
        &self,
        sandbox: &str,
        container: &str,
    ) -> Result<Option<Checkpoint>, sqlx::Error> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT * FROM checkpoints
             WHERE sandbox = ? AND container = ? AND committed = TRUE
             ORDER BY round DESC LIMIT 1",
        )
        .bind(sandbox)
        .bind(container)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn set_committed(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE checkpoints SET committed = TRUE WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_mount(&self, id: &str, mount: &CcrMount) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE checkpoints SET mount_type = ?, mount_source = ?, mount_options = ?
             WHERE id = ?",
        )
        .bind(&mount.typ)
        .bind(&mount.source)
        .bind(serde_json::to_string(&mount.options).unwrap_or_else(|_| "[]".into()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> CheckpointStore {
    use sqlx::sqlite::SqlitePoolOptions;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    CheckpointStore::init(pool).await.unwrap()
}
