//! Armazenamento de fotos enviadas pelos alunos
//!
//! Cada envio vira um arquivo com nome uuid e uma URL pública estável.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PortalError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Only image uploads are accepted (got {0})")]
    UnsupportedType(String),

    #[error("File is too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("The uploaded file is empty")]
    Empty,

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Photo upload failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for PortalError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnsupportedType(_) | StorageError::TooLarge { .. } | StorageError::Empty => {
                PortalError::invalid_field("photo", &err.to_string())
            }
            StorageError::NotFound(name) => PortalError::NotFound(name),
            StorageError::Io(_) => PortalError::Upstream(err.to_string()),
        }
    }
}

/// Objeto gravado e sua URL pública
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectContent {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, content_type: &str, bytes: &[u8]) -> Result<StoredObject, StorageError>;

    async fn get(&self, name: &str) -> Result<ObjectContent, StorageError>;
}

/// Tipos aceitos e a extensão usada no nome do arquivo
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/heic", "heic"),
];

fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    IMAGE_TYPES
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(essence))
        .map(|(_, ext)| *ext)
}

fn content_type_for(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext)?;
    IMAGE_TYPES
        .iter()
        .find(|(_, known)| *known == ext)
        .map(|(mime, _)| *mime)
}

/// Armazenamento em diretório local
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
    max_bytes: usize,
}

impl LocalObjectStorage {
    pub async fn open(
        root: impl Into<PathBuf>,
        public_base_url: &str,
        max_bytes: usize,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!("Diretório de uploads: {}", root.display());
        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            max_bytes,
        })
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(&self, content_type: &str, bytes: &[u8]) -> Result<StoredObject, StorageError> {
        let ext = extension_for(content_type)
            .ok_or_else(|| StorageError::UnsupportedType(content_type.to_string()))?;
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(StorageError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let name = format!("{}.{}", Uuid::new_v4().simple(), ext);
        fs::write(self.root.join(&name), bytes).await?;
        debug!("Upload gravado: {} ({} bytes)", name, bytes.len());

        Ok(StoredObject {
            url: format!("{}/{}", self.public_base_url, name),
            name,
        })
    }

    async fn get(&self, name: &str) -> Result<ObjectContent, StorageError> {
        // Só nomes gerados por `put`; nada de caminhos
        let content_type = content_type_for(name)
            .filter(|_| !name.contains(['/', '\\']) && !name.starts_with('.'))
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        match fs::read(self.root.join(name)).await {
            Ok(bytes) => Ok(ObjectContent {
                content_type,
                bytes,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
