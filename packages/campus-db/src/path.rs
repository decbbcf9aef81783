//! Caminhos de coleções e documentos
//!
//! Um caminho de coleção tem número ímpar de segmentos (`appointments`,
//! `userProfile/{uid}/nutritionLogs`); um caminho de documento tem número par
//! (`campusInfo/hospital`).

use std::fmt;

use crate::error::DbError;

pub const EMERGENCY_REPORTS: &str = "emergencyReports";
pub const HOSPITAL_FEEDBACKS: &str = "hospitalFeedbacks";
pub const MESS_FOOD_RATINGS: &str = "messFoodRatings";
pub const APPOINTMENTS: &str = "appointments";
pub const USER_PROFILE: &str = "userProfile";
pub const NUTRITION_LOGS: &str = "nutritionLogs";
pub const CAMPUS_INFO: &str = "campusInfo";
pub const ROLES_ADMIN: &str = "roles_admin";

fn split_segments(path: &str) -> Result<Vec<String>, DbError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(DbError::InvalidPath("caminho vazio".to_string()));
    }
    let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(DbError::InvalidPath(format!("segmento vazio em '{}'", path)));
    }
    Ok(segments)
}

/// Referência a uma coleção
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    segments: Vec<String>,
}

impl CollectionRef {
    pub fn parse(path: &str) -> Result<Self, DbError> {
        let segments = split_segments(path)?;
        if segments.len() % 2 == 0 {
            return Err(DbError::InvalidPath(format!(
                "'{}' não é um caminho de coleção",
                path
            )));
        }
        Ok(Self { segments })
    }

    /// Coleção de nível raiz (sem validação de caracteres)
    pub fn root(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    pub fn emergency_reports() -> Self {
        Self::root(EMERGENCY_REPORTS)
    }

    pub fn hospital_feedbacks() -> Self {
        Self::root(HOSPITAL_FEEDBACKS)
    }

    pub fn mess_food_ratings() -> Self {
        Self::root(MESS_FOOD_RATINGS)
    }

    pub fn appointments() -> Self {
        Self::root(APPOINTMENTS)
    }

    /// `userProfile/{uid}/nutritionLogs`
    pub fn nutrition_logs(uid: &str) -> Self {
        Self {
            segments: vec![
                USER_PROFILE.to_string(),
                uid.to_string(),
                NUTRITION_LOGS.to_string(),
            ],
        }
    }

    pub fn doc(&self, id: &str) -> DocRef {
        let mut segments = self.segments.clone();
        segments.push(id.to_string());
        DocRef { segments }
    }

    /// Nome do último segmento (ex.: `nutritionLogs`)
    pub fn id(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Referência a um documento
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    segments: Vec<String>,
}

impl DocRef {
    pub fn parse(path: &str) -> Result<Self, DbError> {
        let segments = split_segments(path)?;
        if segments.len() % 2 != 0 {
            return Err(DbError::InvalidPath(format!(
                "'{}' não é um caminho de documento",
                path
            )));
        }
        Ok(Self { segments })
    }

    /// `userProfile/{uid}`
    pub fn user_profile(uid: &str) -> Self {
        CollectionRef::root(USER_PROFILE).doc(uid)
    }

    /// `campusInfo/hospital`
    pub fn hospital_status() -> Self {
        CollectionRef::root(CAMPUS_INFO).doc("hospital")
    }

    /// `roles_admin/{uid}`
    pub fn admin_role(uid: &str) -> Self {
        CollectionRef::root(ROLES_ADMIN).doc(uid)
    }

    pub fn id(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    pub fn parent(&self) -> CollectionRef {
        CollectionRef {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}
