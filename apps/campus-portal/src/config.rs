//! Configuração do portal carregada de variáveis de ambiente

use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Context, Result};
use campus_db::DbConfig;
use tracing::{info, warn};

/// Formato dos logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("formato de log desconhecido: {other}")),
        }
    }
}

impl LogFormat {
    /// Lido antes de o subscriber existir, sem registrar nada
    pub fn from_env() -> Self {
        env::var("PORTAL_LOG_FORMAT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(LogFormat::Pretty)
    }
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Configuração do assistente de IA
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub bind_addr: SocketAddr,
    pub db: DbConfig,
    pub jwt_secret: String,
    pub session_ttl_secs: i64,
    pub otp_secret: String,
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub assistant: AssistantConfig,
    /// Liga o ouvinte de diagnóstico de permissões
    pub dev_overlay: bool,
    pub log_format: LogFormat,
    pub concurrency_limit: usize,
    /// Usuários promovidos a administrador na inicialização
    pub admin_uids: Vec<String>,
}

impl PortalConfig {
    pub fn load() -> Result<Self> {
        Ok(Self {
            bind_addr: try_load("PORTAL_BIND_ADDR", "0.0.0.0:8080")?,
            db: DbConfig {
                db_path: try_load("PORTAL_DB_PATH", "data/campus.db")?,
                max_connections: try_load("PORTAL_DB_MAX_CONNECTIONS", "5")?,
            },
            jwt_secret: require_secret("PORTAL_JWT_SECRET")?,
            session_ttl_secs: try_load("PORTAL_SESSION_TTL_SECS", "86400")?,
            otp_secret: require_secret("PORTAL_OTP_SECRET")?,
            upload_dir: try_load("PORTAL_UPLOAD_DIR", "data/uploads")?,
            public_base_url: try_load("PORTAL_PUBLIC_BASE_URL", "http://localhost:8080/files")?,
            max_upload_bytes: try_load("PORTAL_MAX_UPLOAD_BYTES", "5242880")?,
            assistant: AssistantConfig {
                endpoint: try_load(
                    "GENAI_ENDPOINT",
                    "https://generativelanguage.googleapis.com",
                )?,
                api_key: require_secret("GENAI_API_KEY")?,
                model: try_load("GENAI_MODEL", "gemini-2.0-flash")?,
            },
            dev_overlay: try_load("PORTAL_DEV_OVERLAY", "false")?,
            log_format: try_load("PORTAL_LOG_FORMAT", "pretty")?,
            concurrency_limit: try_load("PORTAL_CONCURRENCY_LIMIT", "256")?,
            admin_uids: env::var("PORTAL_ADMIN_UIDS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} não definido, usando padrão: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e: T::Err| {
        warn!("Valor inválido para {key}: {e}");
        anyhow!("valor inválido para {key}: {e}")
    })
}

fn require_secret(key: &str) -> Result<String> {
    let value = env::var(key).with_context(|| format!("segredo {key} não definido"))?;
    if value.trim().is_empty() {
        return Err(anyhow!("segredo {key} está vazio"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_try_load_falls_back_to_default() {
        let port: u16 = try_load("CAMPUS_PORTAL_TEST_UNSET_VAR", "8080").unwrap();
        assert_eq!(port, 8080);
        assert!(try_load::<u16>("CAMPUS_PORTAL_TEST_UNSET_VAR", "not-a-port").is_err());
    }
}
