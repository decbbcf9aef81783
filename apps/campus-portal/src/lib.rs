//! Campus Portal - Serviços do campus sobre o banco de documentos
//!
//! Esta biblioteca fornece:
//! - Consultas ao vivo tipadas sobre coleções e documentos
//! - Agregações das avaliações do refeitório e do hospital
//! - Formulários validados com uma única escrita por envio
//! - Canal de diagnóstico de negações de permissão
//! - Autenticação por e-mail, telefone e provedor externo
//! - Assistente de saúde e armazenamento de fotos
//! - API HTTP com visões ao vivo em SSE

pub mod actions;
pub mod aggregate;
pub mod assistant;
pub mod auth;
pub mod binder;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod forms;
pub mod routes;
pub mod storage;
pub mod submit;
pub mod widgets;

pub use config::PortalConfig;
pub use context::{PortalContext, SharedContext};
pub use error::{PortalError, Reply};

/// Informações coletadas em tempo de build
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
