//! News server CRUD.

use crate::error::{DatabaseError, Error, Result};

use super::{Database, NewServer, NewsServer};

fn query_failed(context: &str, e: sqlx::Error) -> Error {
    if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
        return Error::Database(DatabaseError::ConstraintViolation(format!("{context}: {e}")));
    }
    Error::Database(DatabaseError::QueryFailed(format!("{context}: {e}")))
}

const SERVER_COLUMNS: &str =
    "id, name, host, port, tls, username, password, connections, enabled";

impl Database {
    /// Insert a new server, returning its id. Names are unique.
    pub async fn insert_server(&self, server: &NewServer) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO servers (name, host, port, tls, username, password, connections, enabled)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&server.name)
        .bind(&server.host)
        .bind(server.port)
        .bind(server.tls)
        .bind(&server.username)
        .bind(&server.password)
        .bind(server.connections)
        .bind(server.enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("failed to insert server", e))?;

        Ok(result.last_insert_rowid())
    }

    /// Get a server by id
    pub async fn get_server(&self, id: i64) -> Result<Option<NewsServer>> {
        sqlx::query_as::<_, NewsServer>(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("failed to get server", e))
    }

    /// All servers, ascending id
    pub async fn list_servers(&self) -> Result<Vec<NewsServer>> {
        sqlx::query_as::<_, NewsServer>(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("failed to list servers", e))
    }

    /// Enabled servers only, ascending id (the pool manager's reconcile input)
    pub async fn enabled_servers(&self) -> Result<Vec<NewsServer>> {
        sqlx::query_as::<_, NewsServer>(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers WHERE enabled = 1 ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("failed to list enabled servers", e))
    }

    /// Replace every mutable field of a server.
    pub async fn update_server(&self, id: i64, server: &NewServer) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE servers
            SET name = ?, host = ?, port = ?, tls = ?, username = ?, password = ?,
                connections = ?, enabled = ?
            WHERE id = ?
            "#,
        )
        .bind(&server.name)
        .bind(&server.host)
        .bind(server.port)
        .bind(server.tls)
        .bind(&server.username)
        .bind(&server.password)
        .bind(server.connections)
        .bind(server.enabled)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("failed to update server", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a server
    pub async fn delete_server(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("failed to delete server", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Seed the servers table from static configuration, first run only.
    pub async fn seed_servers(&self, servers: &[crate::config::ServerConfig]) -> Result<()> {
        if !self.list_servers().await?.is_empty() {
            return Ok(());
        }

        for config in servers {
            self.insert_server(&NewServer::from(config)).await?;
        }

        Ok(())
    }
}
