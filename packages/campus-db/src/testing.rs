//! Utilitários de teste: banco temporário já migrado

use anyhow::Result;
use tempfile::TempDir;

use crate::{init_db_pool, DbConfig, DocumentStore};

/// Cria um [`DocumentStore`] num diretório temporário.
///
/// O `TempDir` deve viver enquanto o store for usado.
pub async fn temp_store() -> Result<(TempDir, DocumentStore)> {
    let dir = tempfile::tempdir()?;
    let config = DbConfig {
        db_path: dir.path().join("campus.db").to_string_lossy().to_string(),
        max_connections: 4,
    };
    let pool = init_db_pool(&config).await?;
    Ok((dir, DocumentStore::new(pool)))
}
