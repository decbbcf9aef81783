//! Sistema de migrações para banco de dados
//!
//! Este módulo gerencia as migrações do banco de dados SQLite

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{error, info};

/// Lista de migrações SQL a serem aplicadas
const MIGRATIONS: &[&str] = &[
    // 001_documents.sql
    r#"
    -- Documentos JSON endereçados por caminho (coleção/id[/subcoleção/id...])
    CREATE TABLE IF NOT EXISTS documents (
        path TEXT PRIMARY KEY NOT NULL,
        collection TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents (collection);
    "#,
    // 002_accounts.sql
    r#"
    -- Contas do provedor de autenticação
    CREATE TABLE IF NOT EXISTS accounts (
        uid TEXT PRIMARY KEY NOT NULL,
        email TEXT UNIQUE,
        phone TEXT UNIQUE,
        password_hash TEXT,
        display_name TEXT,
        photo_url TEXT,
        provider TEXT NOT NULL CHECK (provider IN ('password', 'phone', 'federated')),
        provider_subject TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(provider, provider_subject)
    );

    -- Desafios de verificação por telefone (OTP)
    CREATE TABLE IF NOT EXISTS phone_verifications (
        verification_id TEXT PRIMARY KEY NOT NULL,
        phone TEXT NOT NULL,
        code_tag BLOB NOT NULL,
        expires_at TIMESTAMP NOT NULL,
        consumed BOOLEAN NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_phone_verifications_phone ON phone_verifications (phone);
    "#,
];

/// Executa todas as migrações pendentes no banco de dados
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Aplicando migrações de banco de dados...");

    let mut version: i64 = 0;
    match sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
    {
        Ok(v) => version = v,
        Err(e) => {
            error!("Erro ao obter versão do banco: {}", e);
            // Pode ser a primeira execução
        }
    }

    info!("Versão atual do banco: {}", version);

    for (i, migration_sql) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as i64;

        if migration_version <= version {
            info!("Migração {} já aplicada", migration_version);
            continue;
        }

        info!("Aplicando migração {}...", migration_version);

        let mut transaction = pool.begin().await.context(format!(
            "Falha ao iniciar transação para migração {}",
            migration_version
        ))?;

        sqlx::query(migration_sql)
            .execute(&mut *transaction)
            .await
            .context(format!("Falha ao executar migração {}", migration_version))?;

        sqlx::query(&format!("PRAGMA user_version = {}", migration_version))
            .execute(&mut *transaction)
            .await
            .context(format!(
                "Falha ao atualizar versão para {}",
                migration_version
            ))?;

        transaction.commit().await.context(format!(
            "Falha ao confirmar transação para migração {}",
            migration_version
        ))?;

        info!("Migração {} aplicada com sucesso", migration_version);
    }

    info!("Migrações concluídas. Versão atual: {}", MIGRATIONS.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqliteConnectOptions;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test_migrations.db");

        let conn_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(conn_options).await?;

        run_migrations(&pool).await?;

        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;

        assert_eq!(version, MIGRATIONS.len() as i64);

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&pool)
        .await?;

        assert!(tables.contains(&"documents".to_string()));
        assert!(tables.contains(&"accounts".to_string()));
        assert!(tables.contains(&"phone_verifications".to_string()));

        // Reaplicar não deve falhar nem mudar a versão
        run_migrations(&pool).await?;
        let again: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;
        assert_eq!(again, version);

        Ok(())
    }
}
