//! Provedor de contas: e-mail/senha, telefone com OTP e login federado
//!
//! Toda autenticação termina numa sessão JWT (HS256) que carrega a
//! identidade usada pelas escritas no banco.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use campus_db::Caller;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PortalError;

type HmacSha256 = Hmac<Sha256>;

/// Validade de um código enviado por SMS
const OTP_TTL_SECS: i64 = 5 * 60;
const COUNTRY_PREFIX: &str = "+91";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("An account already exists for {0}")]
    AccountExists(String),

    #[error("Invalid credentials. Please try again.")]
    InvalidCredentials,

    #[error("Please enter a valid 10-digit phone number.")]
    InvalidPhone,

    #[error("The code is invalid or has expired.")]
    InvalidCode,

    #[error("You must be logged in.")]
    MissingToken,

    #[error("Your session is invalid or has expired.")]
    InvalidToken,

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Could not deliver the code: {0}")]
    Delivery(String),

    #[error("Falha ao processar senha: {0}")]
    Hashing(String),

    #[error("Falha ao emitir sessão: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Erro de banco de dados: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AuthError> for PortalError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AccountExists(_) => PortalError::invalid_field("email", &err.to_string()),
            AuthError::InvalidPhone => PortalError::invalid_field("phone_number", &err.to_string()),
            AuthError::InvalidCode => PortalError::invalid_field("code", &err.to_string()),
            AuthError::InvalidCredentials | AuthError::MissingToken | AuthError::InvalidToken => {
                PortalError::Unauthenticated(err.to_string())
            }
            AuthError::AccountNotFound(uid) => PortalError::NotFound(uid),
            AuthError::Delivery(_) => PortalError::Upstream(err.to_string()),
            AuthError::Hashing(_) | AuthError::Token(_) | AuthError::Database(_) => {
                PortalError::Internal(err.to_string())
            }
        }
    }
}

/// Identidade exposta às telas e usada como dono das escritas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn caller(&self) -> Caller {
        Caller::new(self.uid.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: Identity,
}

/// Desafio OTP pendente; o código segue por SMS
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneChallenge {
    pub verification_id: String,
    pub phone: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    Password,
    Phone,
    Federated,
}

impl ProviderKind {
    fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Password => "password",
            ProviderKind::Phone => "phone",
            ProviderKind::Federated => "federated",
        }
    }
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    email: Option<String>,
    password_hash: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
}

impl FromRow<'_, SqliteRow> for Account {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Account {
            uid: row.try_get("uid")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            display_name: row.try_get("display_name")?,
            photo_url: row.try_get("photo_url")?,
        })
    }
}

impl Account {
    fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            photo_url: self.photo_url.clone(),
        }
    }
}

const ACCOUNT_COLUMNS: &str = "uid, email, password_hash, display_name, photo_url";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    picture: Option<String>,
}

/// Entrega de códigos OTP
#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send_code(&self, phone: &str, code: &str) -> Result<(), AuthError>;
}

/// Entrega de desenvolvimento: o código vai para o log
#[derive(Debug, Default, Clone)]
pub struct LogCodeSender;

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send_code(&self, phone: &str, code: &str) -> Result<(), AuthError> {
        info!(phone = %phone, "Código de verificação: {}", code);
        Ok(())
    }
}

/// Normaliza para `+91XXXXXXXXXX`
pub fn normalize_phone(raw: &str) -> Result<String, AuthError> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = compact.strip_prefix(COUNTRY_PREFIX).unwrap_or(&compact);
    if digits.len() == 10 && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(format!("{COUNTRY_PREFIX}{digits}"))
    } else {
        Err(AuthError::InvalidPhone)
    }
}

#[derive(Clone)]
pub struct AuthProvider {
    pool: SqlitePool,
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    otp_secret: Arc<Vec<u8>>,
    codes: Arc<dyn CodeSender>,
}

impl AuthProvider {
    pub fn new(
        pool: SqlitePool,
        jwt_secret: &str,
        session_ttl_secs: i64,
        otp_secret: &str,
        codes: Arc<dyn CodeSender>,
    ) -> Self {
        Self {
            pool,
            encoding: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(jwt_secret.as_bytes()),
            session_ttl: Duration::seconds(session_ttl_secs),
            otp_secret: Arc::new(otp_secret.as_bytes().to_vec()),
            codes,
        }
    }

    pub async fn sign_up_email(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Session, AuthError> {
        let email = email.trim().to_lowercase();
        let hash = hash_password(password)?;
        let uid = Uuid::new_v4().simple().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO accounts (uid, email, password_hash, display_name, provider, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&uid)
        .bind(&email)
        .bind(&hash)
        .bind(display_name)
        .bind(ProviderKind::Password.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AuthError::AccountExists(email));
            }
            Err(e) => return Err(e.into()),
        }

        info!("Conta criada: {}", uid);
        self.issue(&self.account(&uid).await?)
    }

    pub async fn sign_in_email(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = email.trim().to_lowercase();
        let account: Option<Account> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?"
        ))
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let account = account.ok_or(AuthError::InvalidCredentials)?;
        let hash = account
            .password_hash
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password, hash) {
            debug!("Senha incorreta para {}", account.uid);
            return Err(AuthError::InvalidCredentials);
        }

        self.issue(&account)
    }

    /// Gera um código de 6 dígitos e o envia ao telefone
    pub async fn start_phone(&self, raw_phone: &str) -> Result<PhoneChallenge, AuthError> {
        let phone = normalize_phone(raw_phone)?;
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let verification_id = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + Duration::seconds(OTP_TTL_SECS);
        let tag = self.code_tag(&verification_id, &code)?;

        sqlx::query(
            r#"
            INSERT INTO phone_verifications (verification_id, phone, code_tag, expires_at, consumed)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(&verification_id)
        .bind(&phone)
        .bind(&tag)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        self.codes.send_code(&phone, &code).await?;

        Ok(PhoneChallenge {
            verification_id,
            phone,
            expires_at,
        })
    }

    /// Consome o desafio; um código só vale uma vez
    pub async fn verify_phone(&self, verification_id: &str, code: &str) -> Result<Session, AuthError> {
        let row: Option<(String, Vec<u8>, DateTime<Utc>, bool)> = sqlx::query_as(
            "SELECT phone, code_tag, expires_at, consumed FROM phone_verifications WHERE verification_id = ?",
        )
        .bind(verification_id)
        .fetch_optional(&self.pool)
        .await?;

        let (phone, tag, expires_at, consumed) = row.ok_or(AuthError::InvalidCode)?;
        if consumed || expires_at <= Utc::now() {
            return Err(AuthError::InvalidCode);
        }
        if !self.code_matches(verification_id, code, &tag)? {
            return Err(AuthError::InvalidCode);
        }

        let claimed = sqlx::query(
            "UPDATE phone_verifications SET consumed = 1 WHERE verification_id = ? AND consumed = 0",
        )
        .bind(verification_id)
        .execute(&self.pool)
        .await?;
        if claimed.rows_affected() != 1 {
            return Err(AuthError::InvalidCode);
        }

        let existing: Option<Account> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE phone = ?"
        ))
        .bind(&phone)
        .fetch_optional(&self.pool)
        .await?;

        let account = match existing {
            Some(account) => account,
            None => {
                let uid = Uuid::new_v4().simple().to_string();
                let now = Utc::now();
                sqlx::query(
                    r#"
                    INSERT INTO accounts (uid, phone, provider, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&uid)
                .bind(&phone)
                .bind(ProviderKind::Phone.as_str())
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
                info!("Conta criada por telefone: {}", uid);
                self.account(&uid).await?
            }
        };

        self.issue(&account)
    }

    /// Aceita uma asserção de provedor externo já verificada
    pub async fn sign_in_federated(
        &self,
        provider: &str,
        subject: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<Session, AuthError> {
        let provider_subject = format!("{provider}:{subject}");
        let existing: Option<Account> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE provider = ? AND provider_subject = ?"
        ))
        .bind(ProviderKind::Federated.as_str())
        .bind(&provider_subject)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(account) = existing {
            return self.issue(&account);
        }

        let uid = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let email = email.map(|e| e.trim().to_lowercase());
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (uid, email, display_name, photo_url, provider, provider_subject, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&uid)
        .bind(&email)
        .bind(display_name)
        .bind(photo_url)
        .bind(ProviderKind::Federated.as_str())
        .bind(&provider_subject)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                warn!("E-mail federado já usado por outra conta");
                return Err(AuthError::AccountExists(email.unwrap_or_default()));
            }
            Err(e) => return Err(e.into()),
        }

        info!("Conta federada criada: {} ({})", uid, provider);
        self.issue(&self.account(&uid).await?)
    }

    /// Atualiza nome e foto da conta e emite nova sessão
    pub async fn update_profile(
        &self,
        uid: &str,
        display_name: &str,
        photo_url: Option<&str>,
    ) -> Result<Session, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET display_name = ?, photo_url = COALESCE(?, photo_url), updated_at = ?
            WHERE uid = ?
            "#,
        )
        .bind(display_name)
        .bind(photo_url)
        .bind(Utc::now())
        .bind(uid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::AccountNotFound(uid.to_string()));
        }
        self.issue(&self.account(uid).await?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                debug!("Token rejeitado: {}", e);
                AuthError::InvalidToken
            })?;
        let claims = data.claims;
        Ok(Identity {
            uid: claims.sub,
            display_name: claims.name,
            email: claims.email,
            photo_url: claims.picture,
        })
    }

    async fn account(&self, uid: &str) -> Result<Account, AuthError> {
        let account: Option<Account> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE uid = ?"
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        account.ok_or_else(|| AuthError::AccountNotFound(uid.to_string()))
    }

    fn issue(&self, account: &Account) -> Result<Session, AuthError> {
        let now = Utc::now();
        let expires_at = now + self.session_ttl;
        let claims = Claims {
            sub: account.uid.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            name: account.display_name.clone(),
            email: account.email.clone(),
            picture: account.photo_url.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;

        Ok(Session {
            token,
            expires_at,
            user: account.identity(),
        })
    }

    fn code_mac(&self, verification_id: &str, code: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.otp_secret)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        mac.update(verification_id.as_bytes());
        mac.update(b":");
        mac.update(code.as_bytes());
        Ok(mac)
    }

    fn code_tag(&self, verification_id: &str, code: &str) -> Result<Vec<u8>, AuthError> {
        Ok(self
            .code_mac(verification_id, code)?
            .finalize()
            .into_bytes()
            .to_vec())
    }

    fn code_matches(&self, verification_id: &str, code: &str, tag: &[u8]) -> Result<bool, AuthError> {
        Ok(self.code_mac(verification_id, code)?.verify_slice(tag).is_ok())
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Hash de senha ilegível: {}", e);
            false
        }
    }
}
